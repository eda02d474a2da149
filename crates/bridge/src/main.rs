//! podshell bridge
//!
//! WebSocket to container shell bridge.

use std::path::PathBuf;
use std::sync::Arc;

use bridge::config::default_config_path;
use bridge::{BridgeServer, Config, PtyExecProvider, ServerEvent};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

/// podshell bridge - interactive container terminals over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "podshell-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bridge server
    Serve {
        /// Listen address, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Tracing comes up before the config load; the config level is applied after.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let (filter, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let env_filter_set = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    if let Some(level) = configured_level(cli.verbose, env_filter_set, &config) {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&level)) {
            tracing::warn!("Failed to apply log level {}: {}", level, e);
        }
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            tracing::info!("Using config file: {:?}", config_path);
            run_server(config).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

/// The log level from the configuration, unless `--verbose` or `RUST_LOG`
/// already decided it.
fn configured_level(verbose: bool, env_filter_set: bool, config: &Config) -> Option<String> {
    if verbose || env_filter_set {
        None
    } else {
        Some(config.server.log_level.to_lowercase())
    }
}

/// Run the server until a shutdown signal arrives.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let provider = Arc::new(PtyExecProvider::new(config.exec.clone()));
    let mut server = BridgeServer::new(config, provider);
    let mut events = server.subscribe();

    let addr = server.start().await?;
    tracing::info!("podshell bridge running on {}", addr);

    let token = server.shutdown_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ServerEvent::SessionOpened { session_id, target }) => {
                        tracing::debug!(session_id = %session_id, target = %target, "Session opened");
                    }
                    Ok(ServerEvent::SessionClosed { session_id, error }) => {
                        tracing::debug!(session_id = %session_id, error = ?error, "Session closed");
                    }
                    Ok(ServerEvent::StateChanged(state)) => {
                        tracing::debug!(state = ?state, "Server state changed");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Event listener lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("Received shutdown signal");

    server.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["podshell-bridge", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert!(bind.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_bind() {
        let cli =
            Cli::try_parse_from(["podshell-bridge", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("127.0.0.1:9000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_config_init_force() {
        let cli = Cli::try_parse_from(["podshell-bridge", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Init { force: true })
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "podshell-bridge",
            "config",
            "show",
            "--config",
            "/tmp/podshell.toml",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/podshell.toml")));
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));
    }

    #[test]
    fn test_configured_level_from_config() {
        let mut config = Config::default();
        config.server.log_level = "WARN".to_string();
        assert_eq!(
            configured_level(false, false, &config).as_deref(),
            Some("warn")
        );
    }

    #[test]
    fn test_configured_level_yields_to_flag_and_env() {
        let config = Config::default();
        assert!(configured_level(true, false, &config).is_none());
        assert!(configured_level(false, true, &config).is_none());
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["podshell-bridge"]).is_err());
    }
}
