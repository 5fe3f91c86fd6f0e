mod api;
mod config;
mod feed;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;
use stamps::{FsTileStore, JsonRecordStore, RateLimiter, StampPipeline};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env()?;

    if let Err(err) = tokio::fs::create_dir_all(&config.data_root).await {
        warn!("failed to create data root: {err}");
    }
    let tiles = Arc::new(FsTileStore::new(&config.data_root));
    let records = Arc::new(JsonRecordStore::new(
        config.data_root.join("stamps.jsonl"),
        config.record_retention,
    ));
    let pipeline = StampPipeline::open(config.pipeline.clone(), tiles, records).await?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    tokio::spawn({
        let limiter = limiter.clone();
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tick.tick().await;
                limiter.prune(Instant::now());
            }
        }
    });

    let state = AppState { pipeline, limiter };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    let app = api::router(state, config.max_body_bytes())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!(
        data_root = %config.data_root.display(),
        "stamp server listening on http://{}",
        config.addr
    );
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
