//! Serialized writes to the client socket.
//!
//! Output relay, keepalive pings and the final error frame all go through one
//! [`SocketWriter`]; each frame is written while holding the write mutex.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use protocol::ServerMessage;
use tokio::sync::Mutex;

use super::SessionError;
use crate::exec::{ByteSink, ExecError};

/// Payload carried by keepalive pings.
const PING_PAYLOAD: &[u8] = b"ping";

/// Shared, mutex-guarded handle to the outbound half of a socket.
pub struct SocketWriter<S> {
    sink: Arc<Mutex<S>>,
}

impl<S> Clone for SocketWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S> SocketWriter<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    /// Wraps the outbound half of a socket.
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    async fn send(&self, message: Message) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        sink.send(message)
            .await
            .map_err(|e| SessionError::Write(e.to_string()))
    }

    /// Sends one chunk of remote output as a binary frame.
    pub async fn send_output(&self, data: &[u8]) -> Result<usize, SessionError> {
        self.send(Message::Binary(Bytes::copy_from_slice(data)))
            .await?;
        Ok(data.len())
    }

    /// Sends a protocol ping, giving up after `deadline`.
    pub async fn send_ping(&self, deadline: Duration) -> Result<(), SessionError> {
        tokio::time::timeout(
            deadline,
            self.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))),
        )
        .await
        .map_err(|_| SessionError::WriteTimeout)?
    }

    /// Sends the `{"op":"error","data":...}` text frame.
    pub async fn send_error(&self, message: &str) -> Result<(), SessionError> {
        let json = ServerMessage::error(message).to_json()?;
        self.send(Message::Text(json.into())).await
    }

    /// Flushes and closes the outbound half.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::trace!(error = %e, "Socket close failed");
        }
    }
}

#[async_trait]
impl<S> ByteSink for SocketWriter<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    async fn write_chunk(&self, data: &[u8]) -> Result<usize, ExecError> {
        self.send_output(data)
            .await
            .map_err(|e| ExecError::Stream(e.to_string()))
    }
}
