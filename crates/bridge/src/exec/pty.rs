//! PTY-backed remote execution.
//!
//! Runs a launcher command (by default `kubectl exec -i -t ...`) inside a local
//! pseudo-terminal. Terminal resizes land on the local PTY and the launcher
//! propagates them to the container.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::TerminalSize;
use tokio::sync::{mpsc, Mutex};

use super::{
    ByteSink, ByteSource, ExecClientProvider, ExecError, ExecStream, ExecTarget, RemoteExecutor,
    SizeEvent, SizeQueue, StreamOptions,
};
use crate::config::ExecConfig;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Chunks buffered between the blocking reader and the output sink.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Hands out [`PtyExecutor`]s once the launcher is found on `PATH`.
#[derive(Debug, Clone)]
pub struct PtyExecProvider {
    config: ExecConfig,
}

impl PtyExecProvider {
    /// Creates a provider for the given launcher configuration.
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecClientProvider for PtyExecProvider {
    async fn acquire(&self) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let launcher = which::which(&self.config.launcher).map_err(|e| {
            ExecError::ClientUnavailable(format!("{}: {}", self.config.launcher, e))
        })?;

        Ok(Arc::new(PtyExecutor {
            launcher,
            launcher_args: self.config.launcher_args.clone(),
        }))
    }
}

/// Spawns the launcher under a fresh PTY for every stream.
#[derive(Debug, Clone)]
pub struct PtyExecutor {
    launcher: PathBuf,
    launcher_args: Vec<String>,
}

impl PtyExecutor {
    /// Full argument list for `target`: the substituted template followed by `command`.
    pub fn render_args(&self, target: &ExecTarget, command: &[String]) -> Vec<String> {
        render_args(&self.launcher_args, target, command)
    }
}

fn render_args(template: &[String], target: &ExecTarget, command: &[String]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{namespace}", &target.namespace)
                .replace("{pod}", &target.pod)
                .replace("{container}", &target.container)
        })
        .chain(command.iter().cloned())
        .collect()
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.height,
        cols: size.width,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[async_trait]
impl RemoteExecutor for PtyExecutor {
    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<Box<dyn ExecStream>, ExecError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(TerminalSize::default()))
            .map_err(|e| ExecError::Setup(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.launcher);
        cmd.args(self.render_args(target, command));

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ExecError::Setup(e.to_string()))?;

        // The reader only sees EOF once no slave handle is left open here.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ExecError::Setup(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ExecError::Setup(e.to_string()))?;

        tracing::debug!(
            target = %target,
            pid = ?child.process_id(),
            "Spawned exec launcher"
        );

        Ok(Box::new(PtyExecStream {
            killer: KillOnDrop(Some(child.clone_killer())),
            master: Arc::new(Mutex::new(pair.master)),
            child: Some(child),
            reader: Some(reader),
            writer: Some(writer),
        }))
    }
}

/// Terminates the launcher if the stream is abandoned before it exits.
struct KillOnDrop(Option<Box<dyn ChildKiller + Send + Sync>>);

impl KillOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(mut killer) = self.0.take() {
            if let Err(e) = killer.kill() {
                tracing::debug!(error = %e, "Failed to kill exec launcher");
            }
        }
    }
}

/// A launcher process attached to a PTY.
pub struct PtyExecStream {
    killer: KillOnDrop,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

#[async_trait]
impl ExecStream for PtyExecStream {
    async fn stream(&mut self, options: StreamOptions) -> Result<(), ExecError> {
        let StreamOptions {
            stdin,
            stdout,
            stderr: _,
            tty: _,
            size,
        } = options;

        let (Some(reader), Some(writer), Some(mut child)) =
            (self.reader.take(), self.writer.take(), self.child.take())
        else {
            return Err(ExecError::Stream("stream already consumed".to_string()));
        };

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        let read_task = tokio::task::spawn_blocking(move || read_loop(reader, output_tx));
        let input_task = tokio::spawn(pump_input(stdin, writer));

        let master = Arc::clone(&self.master);
        let resize_task = tokio::spawn(async move {
            loop {
                match size.next_size().await {
                    SizeEvent::Resize(new_size) => {
                        let master = master.lock().await;
                        if let Err(e) = master.resize(pty_size(new_size)) {
                            tracing::debug!(error = %e, "Failed to resize PTY");
                        } else {
                            tracing::trace!(
                                cols = new_size.width,
                                rows = new_size.height,
                                "Resized PTY"
                            );
                        }
                    }
                    SizeEvent::Unchanged => continue,
                    SizeEvent::Closed => break,
                }
            }
        });

        let mut relay_result = Ok(());
        while let Some(chunk) = output_rx.recv().await {
            if let Err(e) = stdout.write_chunk(&chunk).await {
                relay_result = Err(e);
                break;
            }
        }
        drop(output_rx);

        input_task.abort();
        resize_task.abort();

        if let Err(e) = relay_result {
            // Dropping self.killer on the way out takes the launcher down.
            return Err(e);
        }

        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(|e| ExecError::Stream(format!("wait task failed: {}", e)))??;
        self.killer.disarm();

        match read_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ExecError::Io(e)),
            Err(e) => return Err(ExecError::Stream(format!("read task failed: {}", e))),
        }

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Exited {
                code: status.exit_code(),
            })
        }
    }
}

/// Blocking PTY read loop. Returns once the slave side is gone.
fn read_loop(mut reader: Box<dyn Read + Send>, output: mpsc::Sender<Vec<u8>>) -> std::io::Result<()> {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if output.blocking_send(buffer[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // Linux reports a hung-up PTY master as EIO.
            Err(e) if e.raw_os_error() == Some(5) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Copies stdin chunks into the PTY until input ends.
///
/// Dropping the writer afterwards delivers end-of-file to the launcher.
async fn pump_input(mut stdin: Box<dyn ByteSource>, mut writer: Box<dyn Write + Send>) {
    while let Some(chunk) = stdin.next_chunk().await {
        if let Err(e) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
            tracing::debug!(error = %e, "Failed to write to PTY");
            break;
        }
    }
    tracing::trace!("Input ended");
}
