//! # podshell Bridge Library
//!
//! Bridges browser terminals to interactive shells inside containers.
//!
//! ## Overview
//!
//! Each WebSocket connection on `/api/pod/{pod}/{container}/exec` becomes a
//! session that attaches to a shell in the target container:
//!
//! - **Demultiplexer**: splits the inbound stream into keystrokes, resizes and exit requests
//! - **Size Negotiator**: last-resize-wins handoff of terminal sizes
//! - **Socket Writer**: serialized output, keepalive pings and error frames
//! - **Exec Stream**: the remote side, behind the [`exec`] traits
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── BridgeServer ─────────────────────────────┐
//! │                                                                        │
//! │  WebSocket ──▶ Demultiplexer ──▶ InputQueue ──────────▶ ┌───────────┐ │
//! │                     │                                   │           │ │
//! │                     └──────▶ SizeNegotiator ──────────▶ │   Exec    │ │
//! │                                                         │  Stream   │ │
//! │  WebSocket ◀── SocketWriter ◀───────── output ───────── │           │ │
//! │                     ▲                                   └───────────┘ │
//! │                 Keepalive                                             │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bridge::{BridgeServer, Config, PtyExecProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let provider = Arc::new(PtyExecProvider::new(config.exec.clone()));
//!
//!     let mut server = BridgeServer::new(config, provider);
//!     server.start().await?;
//!
//!     // Wait for shutdown signal...
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`exec`]: Remote execution traits and the PTY launcher
//! - [`session`]: Per-connection session components
//! - [`server`]: HTTP routes and server lifecycle

pub mod config;
pub mod exec;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export exec types for convenience
pub use exec::{
    ByteSink, ByteSource, ExecClientProvider, ExecError, ExecStream, ExecTarget, PtyExecProvider,
    PtyExecutor, RemoteExecutor, SizeEvent, SizeQueue, StreamOptions,
};

// Re-export session types for convenience
pub use session::{SessionError, SessionId, SessionInfo, SessionRegistry, SessionScope, SessionState};

// Re-export server types for convenience
pub use server::{router, AppState, BridgeServer, ServerEvent, ServerState};
