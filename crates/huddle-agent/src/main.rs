//! # huddle-agent
//!
//! Huddle relay binary: loads settings, sets up logging and metrics, and
//! runs the HTTP/WebSocket server until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_core::logging::{LogFormat, init_subscriber};
use huddle_server::{HuddleServer, ServerConfig};
use huddle_settings::HuddleSettings;

/// How long shutdown waits for the listener and relay tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Huddle interview signaling relay.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Huddle interview signaling relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.huddle/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from the chosen file, then env overrides read through
    /// `env`, then the flags.
    fn resolve_settings<F>(&self, env: F) -> Result<HuddleSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(huddle_settings::settings_path);
        let mut settings = huddle_settings::read_settings_file(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        huddle_settings::apply_overrides_from(&mut settings, env);

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings(|key| std::env::var(key).ok())?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let metrics = huddle_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = HuddleServer::new(ServerConfig::from(&settings), Some(metrics))
        .context("Failed to build server")?;
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        "Huddle relay listening on http://{addr} (ws://{addr}/ws, frontend {})",
        settings.server.frontend_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let mut handles = vec![handle];
    handles.extend(server.take_relay_task());
    let _ = server.shutdown().drain(handles, SHUTDOWN_GRACE).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
