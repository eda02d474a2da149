//! Session orchestration: wires the socket, the exec stream and the
//! supporting tasks together for one connection.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, Stream};
use tracing::Instrument;

use super::demux::Demultiplexer;
use super::input::input_queue;
use super::keepalive::run_keepalive;
use super::registry::SessionId;
use super::scope::SessionScope;
use super::size::SizeNegotiator;
use super::writer::SocketWriter;
use super::SessionError;
use crate::config::SessionConfig;
use crate::exec::{ByteSink, ExecClientProvider, ExecTarget, StreamOptions};

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct SessionContext {
    /// Registry id, used for log correlation.
    pub id: SessionId,
    /// Container to attach to.
    pub target: ExecTarget,
    /// Command run in the container.
    pub command: Vec<String>,
    /// Timing and limits.
    pub config: SessionConfig,
    /// Source of exec clients.
    pub provider: Arc<dyn ExecClientProvider>,
}

/// Runs one session to completion.
///
/// Returns once the exec stream has ended or the scope was cancelled, every
/// session task has stopped and the socket has been closed. A failure is
/// reported to the client as an error frame unless the session was already
/// being torn down.
pub async fn run_session<S, St, E>(
    sink: S,
    stream: St,
    ctx: SessionContext,
    scope: Arc<SessionScope>,
) -> Result<(), SessionError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let span = tracing::info_span!(
        "session",
        session_id = %ctx.id,
        pod = %ctx.target.pod,
        container = %ctx.target.container,
    );

    async move {
        tracing::info!("Session started");
        let writer = SocketWriter::new(sink);
        let token = scope.token().clone();

        let keepalive = tokio::spawn(
            run_keepalive(
                writer.clone(),
                token.clone(),
                ctx.config.keepalive_interval(),
                ctx.config.ping_write_timeout(),
            )
            .in_current_span(),
        );

        let mut demux_task = None;
        let result: Result<(), SessionError> = async {
            let executor = ctx
                .provider
                .acquire()
                .await
                .map_err(SessionError::Acquire)?;

            let (queue, reader) = input_queue(ctx.config.input_queue_capacity, token.clone());
            let sizes = Arc::new(SizeNegotiator::new(
                token.clone(),
                ctx.config.resize_handoff(),
                ctx.config.size_poll(),
            ));
            let demux = Demultiplexer::new(
                queue,
                Arc::clone(&sizes),
                Arc::clone(&scope),
                ctx.config.exit_grace(),
            );
            demux_task = Some(tokio::spawn(demux.run(stream).in_current_span()));

            let mut exec = executor
                .open(&ctx.target, &ctx.command)
                .await
                .map_err(SessionError::Setup)?;

            let output: Arc<dyn ByteSink> = Arc::new(writer.clone());
            let options = StreamOptions {
                stdin: Box::new(reader),
                stdout: Arc::clone(&output),
                stderr: output,
                tty: true,
                size: sizes,
            };

            tokio::select! {
                biased;
                _ = scope.cancelled() => Ok(()),
                streamed = exec.stream(options) => streamed.map_err(SessionError::Stream),
            }
        }
        .await;

        if let Err(e) = &result {
            if scope.is_cancelled() {
                tracing::debug!(error = %e, "Session failed after cancellation");
            } else {
                tracing::error!(error = %e, "Session failed");
                if let Err(send_err) = writer.send_error(&e.to_string()).await {
                    tracing::debug!(error = %send_err, "Failed to send error frame");
                }
            }
        }

        scope.close();
        if let Some(task) = demux_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Demultiplexer task failed");
            }
        }
        if let Err(e) = keepalive.await {
            tracing::warn!(error = %e, "Keepalive task failed");
        }
        writer.close().await;

        tracing::info!("Session ended");
        result
    }
    .instrument(span)
    .await
}
