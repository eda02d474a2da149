//! Per-connection terminal sessions.
//!
//! A session owns one upgraded WebSocket and one exec stream. Its tasks are
//! the demultiplexer (sole socket reader), the keepalive loop, and the
//! exec stream driver, all bound to one [`SessionScope`].

pub mod demux;
pub mod input;
pub mod keepalive;
pub mod orchestrator;
pub mod registry;
pub mod scope;
pub mod size;
pub mod writer;

use protocol::ProtocolError;
use thiserror::Error;

use crate::exec::ExecError;

pub use demux::{forced_exit, DemuxExit, Demultiplexer};
pub use input::{input_queue, InputQueue, QueueReader};
pub use orchestrator::{run_session, SessionContext};
pub use registry::{SessionId, SessionInfo, SessionRegistry};
pub use scope::{SessionScope, SessionState};
pub use size::SizeNegotiator;
pub use writer::SocketWriter;

/// Errors that end or disturb a session.
///
/// The display string of the fatal variants is what the client receives in
/// the error frame.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Writing to the client socket failed.
    #[error("socket write failed: {0}")]
    Write(String),

    /// A socket write did not finish within its deadline.
    #[error("socket write timed out")]
    WriteTimeout,

    /// An outbound message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The exec client could not be acquired.
    #[error("Failed to get exec client: {0}")]
    Acquire(#[source] ExecError),

    /// The exec stream could not be opened.
    #[error("Failed to create executor: {0}")]
    Setup(#[source] ExecError),

    /// The exec stream ended abnormally.
    #[error("Exec stream error: {0}")]
    Stream(#[source] ExecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_error_messages() {
        let err = SessionError::Setup(ExecError::Setup("no such pod".to_string()));
        assert_eq!(
            err.to_string(),
            "Failed to create executor: setup failed: no such pod"
        );

        let err = SessionError::Stream(ExecError::Exited { code: 1 });
        assert_eq!(
            err.to_string(),
            "Exec stream error: command terminated with exit code 1"
        );
    }
}
