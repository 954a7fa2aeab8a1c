//! murmur-server: end-to-end encrypted message relay.
//!
//! Serves the auth HTTP API and the WebSocket relay, routing opaque
//! envelopes between logged-in users and broadcasting presence.

use clap::Parser;
use murmur_server::config::{Overrides, ServerConfig};
use murmur_server::RelayServer;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// murmur-server: end-to-end encrypted message relay
#[derive(Parser, Debug)]
#[command(name = "murmur-server", version, about = "End-to-end encrypted message relay")]
struct Cli {
    /// Bind address for both listeners
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Auth HTTP API port
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket relay port
    #[arg(long)]
    ws_port: Option<u16>,

    /// WebSocket upgrade path
    #[arg(long)]
    ws_path: Option<String>,

    /// Session token lifetime in seconds
    #[arg(long)]
    token_ttl: Option<u64>,

    /// Hex-encoded token signing secret (overrides the config file)
    #[arg(long)]
    secret: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.murmur/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting murmur-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        bind: cli.bind,
        port: cli.port,
        ws_port: cli.ws_port,
        ws_path: cli.ws_path,
        token_ttl: cli.token_ttl,
        secret: cli.secret,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match RelayServer::new(server_config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let signal_server = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        signal_server.shutdown();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("murmur-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
