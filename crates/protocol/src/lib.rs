//! # podshell Protocol Library
//!
//! Wire definitions shared by the podshell bridge and its clients.
//!
//! ## Overview
//!
//! A browser terminal talks to the bridge over one WebSocket. In the client to
//! server direction the socket carries a mix of:
//!
//! - **Control objects**: JSON text tagged by `op` (`resize`, `ping`, `input`, `exit`)
//! - **Raw keystrokes**: any payload that is not a recognizable control object
//!
//! In the server to client direction it carries binary frames with the remote
//! process output, protocol-level pings, and at most one JSON error object.
//!
//! ```text
//! client ──text {"op":"input","data":"ls\n"}──▶ bridge ──stdin──▶ container shell
//! client ◀──────────── binary output ────────── bridge ◀─stdout── container shell
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ControlFrame, TerminalSize};
//!
//! let frame = ControlFrame::decode(br#"{"op":"resize","cols":120,"rows":40}"#);
//! assert_eq!(frame, ControlFrame::Resize(TerminalSize::new(120, 40)));
//!
//! // Anything else is forwarded as keystrokes.
//! assert_eq!(ControlFrame::decode(b"ls\r"), ControlFrame::Raw(b"ls\r".to_vec()));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Control frames, server messages, terminal sizes
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ControlFrame, ErrorResponse, ServerMessage, TerminalSize, EXIT_COMMAND, INTERRUPT,
};
