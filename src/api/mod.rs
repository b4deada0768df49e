//! HTTP surface.

pub mod routes;

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::storage::StoragePort;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StoragePort>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/ingest/tabular", post(routes::ingest_tabular))
        .route("/api/ingest/feed", post(routes::ingest_feed))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(crate::middleware::logging::request_logging))
}
