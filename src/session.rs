//! §4.D Session FSM: one instance per accepted `session` channel, owning
//! the exec configuration, the started [`ExecBridge`] (if any), and the
//! last observed size. `handler.rs` holds one of these per `ChannelId` and
//! forwards each channel request into the matching `on_*` method; nothing
//! else touches this state, per the ownership rule in the design notes.
//!
//! None of these methods touch `russh::server::Session` directly: each
//! request-handling method returns a [`ChannelReply`] describing what the
//! wire layer should do, and `handler.rs` is the only place that turns that
//! into real `channel_success`/`channel_failure`/`data`/`close` calls. That
//! split is what makes the gating logic here (at-most-one-exec, resize
//! gating, env ordering) testable without a live SSH connection.

use std::sync::Arc;

use tracing::warn;

use crate::codec::split_exec_command;
use crate::exec::{ChannelSink, ExecBridge};
use crate::model::{Credentials, ExecConfig, TtySize};
use crate::runtime::ContainerRuntime;
use crate::tty_size;

/// What the wire layer should do in response to a channel request, once
/// `SessionState` has decided. `handler.rs` is the sole consumer.
pub enum ChannelReply {
    /// Reply `SSH_MSG_CHANNEL_SUCCESS`.
    Success,
    /// Reply `SSH_MSG_CHANNEL_FAILURE`.
    Failure,
    /// Write `message` onto the channel, then close it (a runtime error
    /// surfaced to the user per §7).
    CloseWithMessage(String),
    /// Write `message` onto the channel, reply `SSH_MSG_CHANNEL_FAILURE`,
    /// then close it (an unsupported request, e.g. a subsystem).
    RejectAndClose(String),
}

pub struct SessionState {
    credentials: Credentials,
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn ChannelSink>,
    config: ExecConfig,
    bridge: Option<ExecBridge>,
    pending_size: TtySize,
}

impl SessionState {
    pub fn new(credentials: Credentials, runtime: Arc<dyn ContainerRuntime>, sink: Arc<dyn ChannelSink>) -> Self {
        Self {
            credentials,
            runtime,
            sink,
            config: ExecConfig::default(),
            bridge: None,
            pending_size: TtySize::ZERO,
        }
    }

    fn exec_started(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn on_env(&mut self, name: &str, value: &str) {
        self.config.env.push(format!("{name}={value}"));
    }

    pub async fn on_pty_req(&mut self, cols: u32, rows: u32) -> ChannelReply {
        if self.exec_started() {
            return ChannelReply::Failure;
        }
        self.pending_size = TtySize { width: cols, height: rows };
        self.config.tty = true;
        let _ = tty_size::resize(self.runtime.as_ref(), "", self.pending_size).await;
        ChannelReply::Success
    }

    pub async fn on_window_change(&mut self, cols: u32, rows: u32) -> ChannelReply {
        self.pending_size = TtySize { width: cols, height: rows };
        let exec_id = self.bridge.as_ref().map(ExecBridge::exec_id).unwrap_or("");
        if let Err(err) = tty_size::resize(self.runtime.as_ref(), exec_id, self.pending_size).await {
            warn!(%err, "window-change resize failed");
        }
        ChannelReply::Success
    }

    pub async fn on_shell(&mut self) -> ChannelReply {
        if self.exec_started() {
            return ChannelReply::Failure;
        }
        self.config.cmd = vec![self.credentials.default_shell.clone()];
        self.start_exec().await
    }

    pub async fn on_exec(&mut self, command: &str) -> ChannelReply {
        if self.exec_started() {
            return ChannelReply::Failure;
        }
        self.config.cmd = split_exec_command(command);
        self.start_exec().await
    }

    async fn start_exec(&mut self) -> ChannelReply {
        match ExecBridge::start(
            Arc::clone(&self.runtime),
            &self.credentials.container_id,
            &self.config,
            Arc::clone(&self.sink),
            self.pending_size,
        )
        .await
        {
            Ok(bridge) => {
                self.bridge = Some(bridge);
                ChannelReply::Success
            }
            Err(err) => ChannelReply::CloseWithMessage(err.client_message()),
        }
    }

    pub fn on_subsystem(&self) -> ChannelReply {
        ChannelReply::RejectAndClose("Not supported".to_string())
    }

    pub fn on_signal(&self) {}

    pub async fn on_data(&self, data: &[u8]) {
        if let Some(bridge) = &self.bridge {
            if let Err(err) = bridge.write_stdin(data).await {
                warn!(%err, "failed to forward data to exec stdin");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::FakeRuntime;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl ChannelSink for NullSink {
        async fn data(&self, _bytes: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn extended_data(&self, _ext: u32, _bytes: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            container_id: "container-1".to_string(),
            account_id: 1,
            owner_id: 1,
            default_shell: "/bin/sh".to_string(),
        }
    }

    fn state(runtime: Arc<FakeRuntime>) -> SessionState {
        SessionState::new(credentials(), runtime, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn second_shell_request_does_not_create_a_second_exec() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        assert!(matches!(session.on_shell().await, ChannelReply::Success));
        assert_eq!(runtime.create_calls(), 1);

        assert!(matches!(session.on_shell().await, ChannelReply::Failure));
        assert_eq!(runtime.create_calls(), 1);
    }

    #[tokio::test]
    async fn exec_after_shell_is_also_rejected() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        assert!(matches!(session.on_shell().await, ChannelReply::Success));
        assert!(matches!(session.on_exec("echo hi").await, ChannelReply::Failure));
        assert_eq!(runtime.create_calls(), 1);
    }

    #[tokio::test]
    async fn pty_req_after_exec_started_is_rejected_without_resize() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        assert!(matches!(session.on_exec("echo hi").await, ChannelReply::Success));
        let resize_calls_before = runtime.resize_calls();

        assert!(matches!(session.on_pty_req(80, 24).await, ChannelReply::Failure));
        assert_eq!(runtime.resize_calls(), resize_calls_before);
    }

    #[tokio::test]
    async fn zero_size_window_change_never_resizes() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        session.on_window_change(0, 0).await;
        assert_eq!(runtime.resize_calls(), 0);

        session.on_exec("echo hi").await;
        assert_eq!(runtime.resize_calls(), 0, "pending size was still zero going into exec start");

        session.on_window_change(0, 0).await;
        assert_eq!(runtime.resize_calls(), 0, "zero size never reaches the runtime even after exec starts");
    }

    #[tokio::test]
    async fn window_change_after_exec_resizes_with_exact_dimensions() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        session.on_exec("echo hi").await;
        let calls_before = runtime.resize_calls();
        session.on_window_change(132, 43).await;

        assert_eq!(runtime.resize_calls(), calls_before + 1);
        assert_eq!(runtime.last_resize(), Some((132, 43)));
    }

    #[tokio::test]
    async fn env_vars_reach_exec_config_in_arrival_order() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        session.on_env("FIRST", "1");
        session.on_env("SECOND", "2");
        session.on_exec("echo hi").await;

        assert_eq!(
            runtime.last_env(),
            Some(vec!["FIRST=1".to_string(), "SECOND=2".to_string()])
        );
    }

    #[tokio::test]
    async fn pty_req_before_exec_primes_pending_size_for_start() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut session = state(Arc::clone(&runtime));

        session.on_pty_req(80, 24).await;
        session.on_shell().await;

        assert_eq!(runtime.last_resize(), Some((80, 24)));
    }

    #[tokio::test]
    async fn runtime_failure_on_start_closes_with_message_and_does_not_mark_started() {
        let runtime = Arc::new(FakeRuntime {
            fail_create: true,
            ..Default::default()
        });
        let mut session = state(Arc::clone(&runtime));

        match session.on_shell().await {
            ChannelReply::CloseWithMessage(message) => assert!(message.contains("failed to create exec")),
            _ => panic!("expected CloseWithMessage"),
        }
        assert!(!session.exec_started());
    }

    #[tokio::test]
    async fn subsystem_is_always_rejected_and_closed() {
        let runtime = Arc::new(FakeRuntime::default());
        let session = state(runtime);

        match session.on_subsystem() {
            ChannelReply::RejectAndClose(message) => assert_eq!(message, "Not supported"),
            _ => panic!("expected RejectAndClose"),
        }
    }
}
