//! Internal control surface: trigger scrapes and epoch syncs over HTTP.

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::indexer::Indexer;

pub fn router(indexer: Arc<Indexer>) -> Router {
    Router::new()
        .route("/scrape", post(handlers::scrape_range))
        .route("/scrape/latest", post(handlers::scrape_latest))
        .route("/sync", post(handlers::sync))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(indexer)
}

/// Serve the control routes until `cancel` fires.
pub async fn serve(addr: SocketAddr, indexer: Arc<Indexer>, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Control surface listening on {}", addr);
    axum::serve(listener, router(indexer))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
