//! Pong Arena Server
//!
//! Authoritative real-time pong server with matchmaking and round-robin
//! tournaments.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pong_arena::{
    config::ServerConfig,
    network::{
        GameServer, IdentityProvider, JwtIdentityProvider, QueryKeyProvider, TracingResultSink,
    },
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Pong Arena Server v{}", VERSION);
    info!(
        "Physics {} Hz, broadcast {} Hz, first to {}",
        config.physics_hz, config.broadcast_hz, config.max_score
    );

    let identity: Arc<dyn IdentityProvider> = if config.auth.is_configured() {
        info!("JWT authentication enabled");
        Arc::new(JwtIdentityProvider::new(config.auth.clone())?)
    } else {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set, trusting client-supplied session keys");
        Arc::new(QueryKeyProvider)
    };

    let server = Arc::new(GameServer::new(config, identity, Arc::new(TracingResultSink)));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("Server error")?;

    info!("Server stopped");
    Ok(())
}
