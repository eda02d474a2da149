//! Control-frame demultiplexer: the only reader of the client socket.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Stream, StreamExt};
use protocol::{ControlFrame, EXIT_COMMAND, INTERRUPT};

use super::input::InputQueue;
use super::scope::SessionScope;
use super::size::SizeNegotiator;

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxExit {
    /// The client sent `{"op":"exit"}`.
    ExitRequested,
    /// The client sent a close frame.
    ClientClosed,
    /// The socket errored or ended without a close frame.
    Disconnected,
    /// The session scope was cancelled, or stdin has no consumer left.
    Cancelled,
}

enum Flow {
    Continue,
    Stop(DemuxExit),
}

/// Routes inbound socket messages to stdin, the size negotiator or the exit sequence.
pub struct Demultiplexer {
    queue: InputQueue,
    sizes: Arc<SizeNegotiator>,
    scope: Arc<SessionScope>,
    exit_grace: Duration,
}

impl Demultiplexer {
    /// Creates a demultiplexer feeding `queue` and `sizes`.
    pub fn new(
        queue: InputQueue,
        sizes: Arc<SizeNegotiator>,
        scope: Arc<SessionScope>,
        exit_grace: Duration,
    ) -> Self {
        Self {
            queue,
            sizes,
            scope,
            exit_grace,
        }
    }

    /// Reads `stream` until the session ends.
    ///
    /// Unless the scope was cancelled, the forced-exit sequence runs before
    /// returning. The input queue is closed on return in every case.
    pub async fn run<St, E>(self, mut stream: St) -> DemuxExit
    where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break DemuxExit::Cancelled,
                next = stream.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    break DemuxExit::Disconnected;
                }
                None => {
                    tracing::debug!("WebSocket stream ended");
                    break DemuxExit::Disconnected;
                }
            };

            let flow = match message {
                Message::Text(text) => self.dispatch(text.as_str().as_bytes()).await,
                Message::Binary(data) => self.dispatch(&data).await,
                Message::Ping(_) | Message::Pong(_) => Flow::Continue,
                Message::Close(frame) => {
                    log_close(frame.as_ref());
                    Flow::Stop(DemuxExit::ClientClosed)
                }
            };

            if let Flow::Stop(reason) = flow {
                break reason;
            }
        };

        if reason != DemuxExit::Cancelled {
            forced_exit(&self.queue, &self.scope, self.exit_grace).await;
        }

        tracing::debug!(reason = ?reason, "Demultiplexer stopped");
        reason
    }

    async fn dispatch(&self, payload: &[u8]) -> Flow {
        match ControlFrame::decode(payload) {
            ControlFrame::Resize(size) => {
                tracing::trace!(cols = size.width, rows = size.height, "Resize requested");
                self.sizes.offer(size).await;
                Flow::Continue
            }
            ControlFrame::Ping => Flow::Continue,
            ControlFrame::Exit => {
                tracing::info!("Client requested exit");
                Flow::Stop(DemuxExit::ExitRequested)
            }
            ControlFrame::Input(data) | ControlFrame::Raw(data) => {
                if self.queue.enqueue(data).await {
                    Flow::Continue
                } else {
                    Flow::Stop(DemuxExit::Cancelled)
                }
            }
            ControlFrame::Invalid { op, reason } => {
                tracing::debug!(op, reason, "Dropping malformed control frame");
                Flow::Continue
            }
        }
    }
}

fn log_close(frame: Option<&CloseFrame>) {
    match frame {
        Some(frame) if frame.code != close_code::NORMAL && frame.code != close_code::AWAY => {
            tracing::warn!(
                code = frame.code,
                reason = %frame.reason.as_str(),
                "WebSocket closed unexpectedly"
            );
        }
        _ => tracing::debug!("WebSocket closed by client"),
    }
}

/// Interrupts the remote foreground job, asks the shell to exit, then
/// cancels the session regardless of whether the shell complied.
///
/// Runs at most once per session.
pub async fn forced_exit(queue: &InputQueue, scope: &SessionScope, grace: Duration) {
    if !scope.begin_exit() {
        return;
    }
    tracing::debug!("Forcing remote shell exit");

    queue.try_enqueue(vec![INTERRUPT]);

    tokio::select! {
        _ = scope.cancelled() => {}
        _ = tokio::time::sleep(grace) => {
            queue.try_enqueue(EXIT_COMMAND.to_vec());
        }
    }

    scope.close();
}
