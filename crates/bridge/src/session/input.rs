//! Bounded stdin queue between the demultiplexer and the exec stream.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::exec::ByteSource;

/// Producer half of the input queue.
///
/// Dropping it closes the queue; the reader then reports end of input.
#[derive(Debug)]
pub struct InputQueue {
    tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
}

/// Consumer half of the input queue, handed to the exec stream as stdin.
#[derive(Debug)]
pub struct QueueReader {
    rx: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
}

/// Creates a queue holding at most `capacity` pending chunks.
pub fn input_queue(capacity: usize, token: CancellationToken) -> (InputQueue, QueueReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        InputQueue {
            tx,
            token: token.clone(),
        },
        QueueReader { rx, token },
    )
}

impl InputQueue {
    /// Enqueues a chunk, waiting for room.
    ///
    /// Returns false if the scope was cancelled or the reader is gone.
    pub async fn enqueue(&self, data: Vec<u8>) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(data) => sent.is_ok(),
        }
    }

    /// Enqueues a chunk only if there is room right now.
    pub fn try_enqueue(&self, data: Vec<u8>) -> bool {
        match self.tx.try_send(data) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Input queue full, dropping injected bytes");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[async_trait]
impl ByteSource for QueueReader {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            chunk = self.rx.recv() => chunk,
            _ = self.token.cancelled() => None,
        }
    }
}
