//! Periodic protocol pings to keep intermediaries from idling the socket out.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::Sink;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::writer::SocketWriter;

/// Sends a ping every `period` until `token` is cancelled.
///
/// Failed pings are logged and otherwise ignored.
pub async fn run_keepalive<S>(
    writer: SocketWriter<S>,
    token: CancellationToken,
    period: Duration,
    write_deadline: Duration,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = writer.send_ping(write_deadline).await {
                    tracing::debug!(error = %e, "Keepalive ping failed");
                }
            }
        }
    }
    tracing::trace!("Keepalive stopped");
}
