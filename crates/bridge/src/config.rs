//! Configuration management for the podshell bridge.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/podshell/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace the challenge containers are scheduled in.
pub const DEFAULT_NAMESPACE: &str = "a1ctf-challenges";

/// Default listen address for the HTTP/WebSocket server.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address like 0.0.0.0:8080, got {0}")]
    InvalidBind(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("launcher must not be empty")]
    EmptyLauncher,

    #[error("command must contain at least one element")]
    EmptyCommand,

    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),

    #[error("input_queue_capacity must be between 1 and 65536, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("max_sessions must be between 1 and 10000, got {0}")]
    InvalidMaxSessions(usize),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// How remote shells are launched.
    pub exec: ExecConfig,

    /// Per-session timing and limits.
    pub session: SessionConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Remote execution configuration.
///
/// The launcher is run inside a local pseudo-terminal. Its arguments are a
/// template in which `{namespace}`, `{pod}` and `{container}` are substituted,
/// followed by `command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Launcher program, resolved on `PATH`.
    pub launcher: String,

    /// Launcher argument template.
    pub launcher_args: Vec<String>,

    /// Namespace substituted for `{namespace}`.
    pub namespace: String,

    /// Command executed inside the container.
    pub command: Vec<String>,
}

/// Per-session timing and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Period between protocol pings to the client.
    pub keepalive_interval_secs: u64,

    /// Write deadline for a single keepalive ping.
    pub ping_write_timeout_secs: u64,

    /// Pause between the interrupt byte and the exit command.
    pub exit_grace_ms: u64,

    /// How long a resize may wait for the size slot before being dropped.
    pub resize_handoff_ms: u64,

    /// How long one size query waits before reporting "unchanged".
    pub size_poll_ms: u64,

    /// Number of pending input chunks before the reader applies backpressure.
    pub input_queue_capacity: usize,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            launcher: "kubectl".to_string(),
            launcher_args: [
                "exec",
                "-i",
                "-t",
                "-n",
                "{namespace}",
                "{pod}",
                "-c",
                "{container}",
                "--",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            command: vec!["/bin/sh".to_string()],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 25,
            ping_write_timeout_secs: 5,
            exit_grace_ms: 200,
            resize_handoff_ms: 100,
            size_poll_ms: 1000,
            input_queue_capacity: 1024,
            max_sessions: 64,
        }
    }
}

impl SessionConfig {
    /// Keepalive period.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Keepalive write deadline.
    pub fn ping_write_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_write_timeout_secs)
    }

    /// Forced-exit grace interval.
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    /// Resize handoff timeout.
    pub fn resize_handoff(&self) -> Duration {
        Duration::from_millis(self.resize_handoff_ms)
    }

    /// Size query timeout.
    pub fn size_poll(&self) -> Duration {
        Duration::from_millis(self.size_poll_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podshell")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PODSHELL_BIND: Override the listen address
    /// - PODSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - PODSHELL_NAMESPACE: Override the container namespace
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("PODSHELL_BIND") {
            if !bind.is_empty() {
                tracing::info!("Overriding bind from environment: {}", bind);
                self.server.bind = bind;
            }
        }

        if let Ok(level) = std::env::var("PODSHELL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }

        if let Ok(namespace) = std::env::var("PODSHELL_NAMESPACE") {
            if !namespace.is_empty() {
                tracing::info!("Overriding namespace from environment: {}", namespace);
                self.exec.namespace = namespace;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBind(self.server.bind.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        if self.exec.launcher.trim().is_empty() {
            return Err(ConfigError::EmptyLauncher);
        }

        if self.exec.command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        let session = &self.session;
        let durations = [
            ("keepalive_interval_secs", session.keepalive_interval_secs),
            ("ping_write_timeout_secs", session.ping_write_timeout_secs),
            ("exit_grace_ms", session.exit_grace_ms),
            ("resize_handoff_ms", session.resize_handoff_ms),
            ("size_poll_ms", session.size_poll_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if session.input_queue_capacity < 1 || session.input_queue_capacity > 65536 {
            return Err(ConfigError::InvalidQueueCapacity(
                session.input_queue_capacity,
            ));
        }

        if session.max_sessions < 1 || session.max_sessions > 10_000 {
            return Err(ConfigError::InvalidMaxSessions(session.max_sessions));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
