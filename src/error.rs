//! Typed error taxonomies for the parts of the gateway that need to hand a
//! specific, stable message back across a process boundary (the SSH auth
//! callback, the channel-request codec). Everything else uses `anyhow`.

use thiserror::Error;

/// Failures the public-key auth callback can produce. The `Display` text of
/// each variant is the literal string the SSH layer reports to the client,
/// matching the strings the original gateway returned from its
/// `PublicKeyCallback`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("id must be integer")]
    IdNotInteger,

    #[error("not found")]
    NotFound,

    #[error("Permission denied(public key)")]
    PermissionDenied,

    #[error("internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failures from decoding a raw SSH channel-request payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed request payload")]
    Malformed,
}

/// Failures bridging a session channel onto a container-runtime exec.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to create exec: {0}")]
    Create(#[source] anyhow::Error),

    #[error("failed to attach exec: {0}")]
    Attach(#[source] anyhow::Error),

    #[error("failed to resize exec: {0}")]
    Resize(#[source] anyhow::Error),
}

impl ExecError {
    /// The text written onto the channel before the session terminates, per
    /// §7: runtime errors are surfaced to the user as human-readable text.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}
