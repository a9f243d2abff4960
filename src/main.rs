//! Noughts Server
//!
//! Authoritative session server for two-player tic-tac-toe.
//! Configuration comes from `NOUGHTS_*` environment variables.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use noughts::{
    VERSION,
    network::{GameServer, ServerConfig, PROTOCOL_VERSION},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Noughts Server v{} (protocol v{})", VERSION, PROTOCOL_VERSION);
    info!("Max connections: {}, max sessions: {}", config.max_connections, config.max_sessions);
    if config.session.notify_opponent_left {
        info!("Opponent-left notifications enabled");
    }

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("Server failed")?;
    Ok(())
}
