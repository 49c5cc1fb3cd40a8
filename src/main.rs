//! Entry point: load config, wire the relay, and run the server.

use recipe_relay::config::Config;
use recipe_relay::repositories::RedisRepository;
use recipe_relay::services::RelaySubscriber;
use recipe_relay::{create_app, AppState, Relay};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let repo = Arc::new(RedisRepository::new(&config.redis_url)?);
    let relay = Relay::new(config.channels.clone());
    let subscriber = RelaySubscriber::new(repo, relay.clone()).spawn();

    let state =
        AppState::new(relay.clone(), config.cors_origin.clone()).with_heartbeat(config.heartbeat);
    let app = create_app(state);

    tracing::info!(
        addr = %config.server_addr,
        channels = config.channels.len(),
        cors_origin = %config.cors_origin,
        "pubsub relay listening"
    );
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay))
        .await?;

    subscriber.abort();
    tracing::info!("pubsub relay stopped");
    Ok(())
}

/// Wait for Ctrl-C, then close WebSocket clients so the server can drain.
async fn shutdown_signal(relay: Relay) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    relay.shutdown();
}
