//! Remote execution seam.
//!
//! The bridge never talks to a container runtime directly. A session asks an
//! [`ExecClientProvider`] for a [`RemoteExecutor`], opens an [`ExecStream`]
//! for a target container and then drives it with capability objects:
//!
//! - [`ByteSource`]: stdin, fed by the control-frame demultiplexer
//! - [`ByteSink`]: stdout and stderr, relayed to the client socket
//! - [`SizeQueue`]: terminal size updates, fed by resize frames
//!
//! The bundled implementation in [`pty`] launches a configurable command
//! (by default `kubectl exec`) inside a local pseudo-terminal.

pub mod pty;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::TerminalSize;
use thiserror::Error;

pub use pty::{PtyExecProvider, PtyExecutor};

/// Errors raised by the remote execution collaborator.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The execution client could not be acquired.
    #[error("client unavailable: {0}")]
    ClientUnavailable(String),

    /// The exec stream could not be set up.
    #[error("setup failed: {0}")]
    Setup(String),

    /// The stream failed while running.
    #[error("stream failed: {0}")]
    Stream(String),

    /// The remote command exited with a non-zero status.
    #[error("command terminated with exit code {code}")]
    Exited {
        /// Exit status reported by the remote side.
        code: u32,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The container a session attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecTarget {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
    /// Container name inside the pod.
    pub container: String,
}

impl ExecTarget {
    /// Creates a new target.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Result of one terminal size query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeEvent {
    /// A new size is available.
    Resize(TerminalSize),
    /// Nothing arrived within the poll interval; ask again.
    Unchanged,
    /// The session is over; stop asking.
    Closed,
}

/// Ordered source of stdin chunks.
#[async_trait]
pub trait ByteSource: Send {
    /// Returns the next chunk, or `None` once input has ended.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;
}

/// Destination for remote output.
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Writes one chunk and returns how many bytes were accepted.
    async fn write_chunk(&self, data: &[u8]) -> Result<usize, ExecError>;
}

/// Source of terminal size changes.
#[async_trait]
pub trait SizeQueue: Send + Sync {
    /// Waits for the next size event.
    async fn next_size(&self) -> SizeEvent;
}

/// Everything an exec stream needs to run.
pub struct StreamOptions {
    /// Remote stdin.
    pub stdin: Box<dyn ByteSource>,
    /// Remote stdout.
    pub stdout: Arc<dyn ByteSink>,
    /// Remote stderr. With a TTY this is merged into stdout by the remote side.
    pub stderr: Arc<dyn ByteSink>,
    /// Whether to allocate a terminal.
    pub tty: bool,
    /// Terminal size updates.
    pub size: Arc<dyn SizeQueue>,
}

/// Produces executors for opening exec streams.
#[async_trait]
pub trait ExecClientProvider: Send + Sync {
    /// Acquires an executor. Fails when the backend is unreachable or unusable.
    async fn acquire(&self) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// Opens exec streams against containers.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Prepares a stream running `command` in `target`.
    async fn open(
        &self,
        target: &ExecTarget,
        command: &[String],
    ) -> Result<Box<dyn ExecStream>, ExecError>;
}

/// A prepared bidirectional exec stream.
#[async_trait]
pub trait ExecStream: Send {
    /// Runs the stream until the remote command ends.
    ///
    /// Returns an error if the stream breaks or the command exits non-zero.
    /// Dropping the returned future must release the remote process.
    async fn stream(&mut self, options: StreamOptions) -> Result<(), ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_display() {
        assert_eq!(
            ExecError::ClientUnavailable("kubectl not found".to_string()).to_string(),
            "client unavailable: kubectl not found"
        );
        assert_eq!(
            ExecError::Exited { code: 130 }.to_string(),
            "command terminated with exit code 130"
        );
    }

    #[test]
    fn test_exec_target_display() {
        let target = ExecTarget::new("a1ctf-challenges", "web-1", "app");
        assert_eq!(target.to_string(), "a1ctf-challenges/web-1/app");
    }

    #[test]
    fn test_exec_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ExecError = io.into();
        assert!(matches!(err, ExecError::Io(_)));
    }
}
