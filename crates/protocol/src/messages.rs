//! Wire message definitions for the podshell terminal bridge.
//!
//! Client to server traffic is a single logical stream mixing JSON control
//! objects tagged by `op` with raw keystroke payloads. Every inbound message is
//! decoded exactly once into a [`ControlFrame`]; anything that is not a
//! recognizable control object is kept verbatim as [`ControlFrame::Raw`].
//!
//! Server to client traffic is binary output frames plus, on fatal error, one
//! JSON text frame described by [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Interrupt byte (ASCII ETX, Ctrl+C) injected to abort the foreground process.
pub const INTERRUPT: u8 = 0x03;

/// Shell command injected to leave the remote shell.
pub const EXIT_COMMAND: &[u8] = b"exit\n";

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

impl TerminalSize {
    /// Creates a terminal size from columns and rows.
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

/// A classified inbound client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// `{"op":"resize","cols":N,"rows":N}`
    Resize(TerminalSize),
    /// `{"op":"ping"}` heartbeat from the client.
    Ping,
    /// `{"op":"input","data":"..."}` keystrokes for the remote stdin.
    Input(Vec<u8>),
    /// `{"op":"exit"}` request to tear the remote shell down.
    Exit,
    /// Anything that is not a recognized control object, forwarded verbatim.
    Raw(Vec<u8>),
    /// A recognized operation whose fields could not be used. Dropped.
    Invalid {
        /// The operation tag.
        op: &'static str,
        /// Why the frame was rejected.
        reason: &'static str,
    },
}

impl ControlFrame {
    /// Decodes one inbound payload.
    ///
    /// Never fails: payloads that are not JSON objects with a string `op`, or
    /// whose `op` is unknown, become [`ControlFrame::Raw`] carrying the whole
    /// payload. JSON arrays and scalars are keystrokes too.
    pub fn decode(payload: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(fields)) => {
                Self::classify(&fields).unwrap_or_else(|| ControlFrame::Raw(payload.to_vec()))
            }
            _ => ControlFrame::Raw(payload.to_vec()),
        }
    }

    /// Maps a decoded object onto a frame. `None` means there is no usable
    /// `op` tag.
    ///
    /// Field values stay untyped so that a recognized `op` with bad fields is
    /// reported as invalid instead of silently becoming keystrokes.
    fn classify(fields: &Map<String, Value>) -> Option<Self> {
        let frame = match fields.get("op")?.as_str()? {
            "resize" => {
                let cols = fields.get("cols").and_then(Value::as_f64);
                let rows = fields.get("rows").and_then(Value::as_f64);
                match (cols, rows) {
                    (Some(cols), Some(rows)) => {
                        ControlFrame::Resize(TerminalSize::new(cols as u16, rows as u16))
                    }
                    _ => ControlFrame::Invalid {
                        op: "resize",
                        reason: "cols and rows must be numbers",
                    },
                }
            }
            "ping" => ControlFrame::Ping,
            "input" => match fields.get("data") {
                Some(Value::String(data)) => ControlFrame::Input(data.as_bytes().to_vec()),
                _ => ControlFrame::Invalid {
                    op: "input",
                    reason: "data must be a string",
                },
            },
            "exit" => ControlFrame::Exit,
            _ => return None,
        };
        Some(frame)
    }
}

/// Structured messages sent from the bridge to the client as text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Fatal session error, sent once right before the socket is closed.
    Error {
        /// Human readable description.
        data: String,
    },
}

impl ServerMessage {
    /// Creates an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: message.into(),
        }
    }

    /// Serializes the message to its JSON text form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON body returned for requests rejected before the WebSocket upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code mirrored into the body.
    pub code: u16,
    /// Human readable description.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response body.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
