use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use feedforge::orchestrator::FeedService;
use feedforge::server;
use feedforge::Config;

/// Interval between proactive cache sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        cache_secs = config.cache_duration.as_secs(),
        max_articles = config.max_articles,
        "Starting feedforge"
    );

    let service = Arc::new(FeedService::new(config.clone()).context("Failed to build service")?);

    // Proactive cache sweep; expired entries are also dropped lazily on
    // read, this just bounds how long dead bytes linger.
    let sweeper = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = sweeper.cache().sweep().await;
            if removed > 0 {
                tracing::debug!(removed = removed, "Swept expired cache entries");
            }
        }
    });

    let app = server::router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(addr = %addr, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server error")?;

    Ok(())
}
