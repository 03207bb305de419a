//! §4.B Exec bridge. `russh`'s handler is callback-driven rather than
//! read-loop-driven, so the downstream and upstream pumps take different
//! shapes here: downstream (exec -> channel) is a genuine spawned task that
//! drains the attached output stream, while upstream (channel -> exec) has
//! no stream to read from in the first place. The SSH layer already hands
//! client bytes to [`crate::handler`]'s `data`/`extended_data` callbacks one
//! frame at a time, so "pumping" upstream bytes is just forwarding each
//! callback straight to the exec's stdin. Either direction observing EOF (or
//! the channel closing) closes the other, per the one-closer-per-direction
//! rule in the design notes.
//!
//! The downstream pump writes through a [`ChannelSink`] rather than a raw
//! `russh::server::Handle`/`ChannelId` pair, so the create/attach/pump
//! sequence can be driven in tests against a fake sink with no live SSH
//! connection involved.

use std::sync::Arc;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ExecError;
use crate::model::{ExecConfig, TtySize};
use crate::runtime::{AttachedExec, ContainerRuntime, ExecOutputFrame};
use crate::tty_size;

/// The SSH extended-data type code for stderr (RFC 4254 §5.2).
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Destination for downstream exec bytes and the channel's lifecycle,
/// abstracting over `russh::server::Handle` so the bridge itself never names
/// a connection-bound type.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn data(&self, bytes: &[u8]) -> anyhow::Result<()>;
    async fn extended_data(&self, ext: u32, bytes: &[u8]) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// The real `ChannelSink`, writing onto a live SSH channel via its `Handle`.
pub struct RusshChannelSink {
    channel_id: ChannelId,
    handle: Handle,
}

impl RusshChannelSink {
    pub fn new(channel_id: ChannelId, handle: Handle) -> Self {
        Self { channel_id, handle }
    }
}

#[async_trait]
impl ChannelSink for RusshChannelSink {
    async fn data(&self, bytes: &[u8]) -> anyhow::Result<()> {
        self.handle
            .data(self.channel_id, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| anyhow::anyhow!("channel data send failed"))
    }

    async fn extended_data(&self, ext: u32, bytes: &[u8]) -> anyhow::Result<()> {
        self.handle
            .extended_data(self.channel_id, ext, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| anyhow::anyhow!("channel extended-data send failed"))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.handle
            .close(self.channel_id)
            .await
            .map_err(|_| anyhow::anyhow!("channel close failed"))
    }
}

/// One running exec, bridged onto a session channel. Owns the exec's stdin;
/// the downstream pump that drains its stdout/stderr runs as a background
/// task for as long as the bridge is alive.
pub struct ExecBridge {
    exec_id: String,
    stdin: Mutex<Pin>,
}

type Pin = std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>;

impl ExecBridge {
    /// Runs the full §4.B sequence: create, attach, spawn the downstream
    /// pump, apply the initial resize, and return the bridge.
    pub async fn start(
        runtime: Arc<dyn ContainerRuntime>,
        container_id: &str,
        config: &ExecConfig,
        sink: Arc<dyn ChannelSink>,
        initial_size: TtySize,
    ) -> Result<Self, ExecError> {
        let exec_id = runtime
            .exec_create(container_id, config)
            .await
            .map_err(ExecError::Create)?;

        let attached = runtime
            .exec_attach(&exec_id, config.tty)
            .await
            .map_err(ExecError::Attach)?;

        let AttachedExec { input, output } = attached;
        spawn_downstream_pump(output, sink);

        tty_size::resize(runtime.as_ref(), &exec_id, initial_size)
            .await
            .map_err(ExecError::Resize)?;

        Ok(Self {
            exec_id,
            stdin: Mutex::new(input),
        })
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Forwards one frame of client bytes to the exec's stdin. This is the
    /// upstream pump: called once per `data` (or `extended_data`) callback
    /// rather than run as its own task.
    pub async fn write_stdin(&self, data: &[u8]) -> anyhow::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Routes one demultiplexed exec-output frame to the sink, returning whether
/// the send succeeded (the pump stops draining once it doesn't).
async fn forward_frame(sink: &dyn ChannelSink, frame: ExecOutputFrame) -> bool {
    let sent = match frame {
        ExecOutputFrame::Stdout(bytes) => sink.data(&bytes).await,
        ExecOutputFrame::Stderr(bytes) => sink.extended_data(SSH_EXTENDED_DATA_STDERR, &bytes).await,
    };
    sent.is_ok()
}

fn spawn_downstream_pump(
    mut output: std::pin::Pin<Box<dyn futures::Stream<Item = anyhow::Result<ExecOutputFrame>> + Send>>,
    sink: Arc<dyn ChannelSink>,
) {
    use futures::StreamExt;

    tokio::spawn(async move {
        while let Some(frame) = output.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(%err, "exec output stream ended with an error");
                    break;
                }
            };
            if !forward_frame(sink.as_ref(), frame).await {
                break;
            }
        }
        let _ = sink.close().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::FakeRuntime;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        data_calls: StdMutex<Vec<Vec<u8>>>,
        extended_calls: StdMutex<Vec<(u32, Vec<u8>)>>,
        closed: StdMutex<bool>,
    }

    #[async_trait]
    impl ChannelSink for RecordingSink {
        async fn data(&self, bytes: &[u8]) -> anyhow::Result<()> {
            self.data_calls.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
        async fn extended_data(&self, ext: u32, bytes: &[u8]) -> anyhow::Result<()> {
            self.extended_calls.lock().unwrap().push((ext, bytes.to_vec()));
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn forward_frame_routes_stdout_to_data() {
        let sink = RecordingSink::default();
        assert!(forward_frame(&sink, ExecOutputFrame::Stdout(b"hi".to_vec())).await);
        assert_eq!(sink.data_calls.lock().unwrap().as_slice(), &[b"hi".to_vec()]);
        assert!(sink.extended_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forward_frame_routes_stderr_to_extended_data() {
        let sink = RecordingSink::default();
        assert!(forward_frame(&sink, ExecOutputFrame::Stderr(b"oops".to_vec())).await);
        assert_eq!(
            sink.extended_calls.lock().unwrap().as_slice(),
            &[(SSH_EXTENDED_DATA_STDERR, b"oops".to_vec())]
        );
        assert!(sink.data_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_propagates_create_failure() {
        let runtime = Arc::new(FakeRuntime {
            fail_create: true,
            ..Default::default()
        });
        let sink: Arc<dyn ChannelSink> = Arc::new(RecordingSink::default());
        let err = ExecBridge::start(runtime, "container-1", &ExecConfig::default(), sink, TtySize::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Create(_)));
    }

    #[tokio::test]
    async fn start_propagates_attach_failure() {
        let runtime = Arc::new(FakeRuntime {
            fail_attach: true,
            ..Default::default()
        });
        let sink: Arc<dyn ChannelSink> = Arc::new(RecordingSink::default());
        let err = ExecBridge::start(runtime, "container-1", &ExecConfig::default(), sink, TtySize::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Attach(_)));
    }

    #[tokio::test]
    async fn start_succeeds_and_applies_initial_resize() {
        let runtime = Arc::new(FakeRuntime::default());
        let sink: Arc<dyn ChannelSink> = Arc::new(RecordingSink::default());
        let size = TtySize { width: 80, height: 24 };
        let bridge = ExecBridge::start(Arc::clone(&runtime), "container-1", &ExecConfig::default(), sink, size)
            .await
            .unwrap();
        assert!(!bridge.exec_id().is_empty());
        assert_eq!(runtime.create_calls(), 1);
        assert_eq!(runtime.last_resize(), Some((80, 24)));
    }

    #[tokio::test]
    async fn start_skips_resize_for_unknown_size() {
        let runtime = Arc::new(FakeRuntime::default());
        let sink: Arc<dyn ChannelSink> = Arc::new(RecordingSink::default());
        ExecBridge::start(
            Arc::clone(&runtime),
            "container-1",
            &ExecConfig::default(),
            sink,
            TtySize::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(runtime.resize_calls(), 0);
    }
}
