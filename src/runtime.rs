//! The container-runtime client contract from §6, plus a `bollard`-backed
//! implementation. `bollard` already demultiplexes the Docker exec stream's
//! `stdcopy` framing into a typed `LogOutput` stream, so the "split the
//! runtime's multiplexed stream" step in §4.B is implemented by matching on
//! that enum rather than hand-parsing the `(tag, reserved, length)` frame
//! header ourselves.

use std::pin::Pin;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWrite;

use crate::model::{ExecConfig, TtySize};

/// One frame of exec output, after runtime-specific demultiplexing.
pub enum ExecOutputFrame {
    /// Stdout bytes (or the single combined stream, when `tty = true`).
    Stdout(Vec<u8>),
    /// Stderr bytes. Never produced when `tty = true`.
    Stderr(Vec<u8>),
}

/// A live exec attachment: a writer for upstream bytes and a stream of
/// downstream frames.
pub struct AttachedExec {
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: Pin<Box<dyn Stream<Item = anyhow::Result<ExecOutputFrame>> + Send>>,
}

/// The operations the gateway needs from a container runtime: create an
/// exec, attach to its stream, and resize its tty.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn exec_create(&self, container_id: &str, config: &ExecConfig) -> anyhow::Result<String>;
    async fn exec_attach(&self, exec_id: &str, tty: bool) -> anyhow::Result<AttachedExec>;
    async fn exec_resize(&self, exec_id: &str, size: TtySize) -> anyhow::Result<()>;
}

/// `ContainerRuntime` backed by a real Docker-API-compatible daemon via
/// `bollard`.
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect(socket_path: &str, api_version: &str) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_socket(socket_path, 120, &parse_api_version(api_version)?)?;
        Ok(Self { docker })
    }
}

fn parse_api_version(v: &str) -> anyhow::Result<bollard::ClientVersion> {
    let v = v.trim_start_matches('v');
    let mut parts = v.splitn(2, '.');
    let major = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty docker api version"))?
        .parse()?;
    let minor = parts.next().unwrap_or("0").parse()?;
    Ok(bollard::ClientVersion {
        major_version: major,
        minor_version: minor,
    })
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn exec_create(&self, container_id: &str, config: &ExecConfig) -> anyhow::Result<String> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(config.env.clone()),
            attach_stdin: Some(config.attach_stdin()),
            attach_stdout: Some(config.attach_stdout()),
            attach_stderr: Some(config.attach_stderr()),
            tty: Some(config.tty),
            ..Default::default()
        };
        let result = self.docker.create_exec(container_id, options).await?;
        Ok(result.id)
    }

    async fn exec_attach(&self, exec_id: &str, tty: bool) -> anyhow::Result<AttachedExec> {
        let options = StartExecOptions {
            detach: false,
            tty,
            ..Default::default()
        };
        match self.docker.start_exec(exec_id, Some(options)).await? {
            StartExecResults::Attached { input, output } => {
                let output = output.map(|item| {
                    item.map(|log| match log {
                        LogOutput::StdOut { message } => ExecOutputFrame::Stdout(message.to_vec()),
                        LogOutput::Console { message } => ExecOutputFrame::Stdout(message.to_vec()),
                        LogOutput::StdErr { message } => ExecOutputFrame::Stderr(message.to_vec()),
                        LogOutput::StdIn { message } => ExecOutputFrame::Stdout(message.to_vec()),
                    })
                    .map_err(anyhow::Error::from)
                });
                Ok(AttachedExec {
                    input,
                    output: Box::pin(output),
                })
            }
            StartExecResults::Detached => {
                Err(anyhow::anyhow!("exec started detached, expected attached stream"))
            }
        }
    }

    async fn exec_resize(&self, exec_id: &str, size: TtySize) -> anyhow::Result<()> {
        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    width: size.width as u16,
                    height: size.height as u16,
                },
            )
            .await?;
        Ok(())
    }
}
