//! beamdrop-server: signaling and fallback-relay hub for peer-to-peer
//! file and text sharing.
//!
//! Peers connect over WebSocket, discover each other through ip, secret
//! and public rooms, negotiate direct connections via relayed signals,
//! and fall back to relaying payloads through the hub when a direct
//! transport is impossible.

mod config;
mod hub;
mod listener;
mod pairing;
mod peer;
mod rate_limit;
mod rooms;
mod server;

use std::path::PathBuf;

use clap::Parser;
use config::HubConfig;
use server::HubServer;
use tracing::{error, info};

/// beamdrop-server — signaling and relay hub
#[derive(Parser, Debug)]
#[command(name = "beamdrop-server", version, about = "Signaling and relay hub for beamdrop")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.beamdrop/config.toml")]
    config: String,

    /// Relay payload traffic for peers without a direct connection
    #[arg(long)]
    ws_fallback: bool,

    /// Path to an RTC configuration JSON blob handed to clients
    #[arg(long)]
    rtc_config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting beamdrop-server"
    );

    // Load config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match HubConfig::load(
        Some(&config_path),
        cli.bind.as_deref(),
        cli.port,
        cli.ws_fallback,
        cli.rtc_config.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = HubServer::new(config);
    let (addr, accept_loop) = match server.start().await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "listening");

    // Run until shutdown signal
    tokio::select! {
        result = accept_loop => {
            if let Err(e) = result {
                error!(error = %e, "accept loop error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("beamdrop-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
