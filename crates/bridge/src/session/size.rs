//! Terminal size handoff between resize frames and the exec stream.
//!
//! Holds at most one pending size. A newer resize overwrites an older one
//! that has not been consumed yet.

use std::time::Duration;

use async_trait::async_trait;
use protocol::TerminalSize;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::exec::{SizeEvent, SizeQueue};

/// Single-slot, last-write-wins size channel.
#[derive(Debug)]
pub struct SizeNegotiator {
    pending: Mutex<Option<TerminalSize>>,
    notify: Notify,
    token: CancellationToken,
    handoff_timeout: Duration,
    poll_timeout: Duration,
}

impl SizeNegotiator {
    /// Creates a negotiator bound to a session token.
    pub fn new(token: CancellationToken, handoff_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
            token,
            handoff_timeout,
            poll_timeout,
        }
    }

    /// Offers a new size.
    ///
    /// Returns false if the slot could not be taken within the handoff
    /// timeout, in which case the resize is dropped.
    pub async fn offer(&self, size: TerminalSize) -> bool {
        match tokio::time::timeout(self.handoff_timeout, self.pending.lock()).await {
            Ok(mut slot) => {
                *slot = Some(size);
                drop(slot);
                self.notify.notify_one();
                true
            }
            Err(_) => {
                tracing::debug!(
                    cols = size.width,
                    rows = size.height,
                    "Resize handoff timed out, dropping"
                );
                false
            }
        }
    }

    async fn take(&self) -> Option<TerminalSize> {
        self.pending.lock().await.take()
    }
}

#[async_trait]
impl SizeQueue for SizeNegotiator {
    async fn next_size(&self) -> SizeEvent {
        if self.token.is_cancelled() {
            return SizeEvent::Closed;
        }
        if let Some(size) = self.take().await {
            return SizeEvent::Resize(size);
        }

        // A permit left by an offer that was consumed through the fast path
        // wakes us with an empty slot. Keep waiting until the deadline.
        let deadline = tokio::time::sleep(self.poll_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return SizeEvent::Closed,
                _ = self.notify.notified() => {
                    if let Some(size) = self.take().await {
                        return SizeEvent::Resize(size);
                    }
                }
                _ = &mut deadline => return SizeEvent::Unchanged,
            }
        }
    }
}
