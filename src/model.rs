//! The data model from §3: connection credentials, the accumulated exec
//! configuration, and the tty size. These are plain value types; the
//! invariants around them (at most one exec, env append gating, ...) live
//! in `session.rs`, which is the sole owner of the mutable state.

/// Stamped on the SSH connection at authentication time and never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Opaque identifier the container runtime accepts.
    pub container_id: String,
    /// Row id in the container registry.
    pub account_id: i64,
    /// Id of the owning user; used to resolve default shell and authorized
    /// keys.
    pub owner_id: i64,
    /// Executable to invoke for bare `shell` requests. Resolved once per
    /// connection by the precedence chain in §4.G.
    pub default_shell: String,
}

/// Exec configuration accumulated per session channel before the exec
/// starts.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// `NAME=VALUE` strings, order preserved from the client.
    pub env: Vec<String>,
    /// argv tokens; empty until a `shell` or `exec` request is seen.
    pub cmd: Vec<String>,
    /// True if a `pty-req` was seen before the exec started.
    pub tty: bool,
}

impl ExecConfig {
    pub fn attach_stdin(&self) -> bool {
        true
    }
    pub fn attach_stdout(&self) -> bool {
        true
    }
    pub fn attach_stderr(&self) -> bool {
        true
    }
}

/// A TTY size in character cells. `(0, 0)` means "unknown, do not resize".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtySize {
    pub width: u32,
    pub height: u32,
}

impl TtySize {
    pub const ZERO: TtySize = TtySize { width: 0, height: 0 };

    pub fn is_unknown(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}
