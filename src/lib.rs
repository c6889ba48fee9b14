pub mod api;
pub mod charts;
pub mod config;
pub mod error;
pub mod filters;
pub mod llm;
pub mod predicate;
pub mod query_parser;
pub mod search;
pub mod stats;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::charts::ChartSelector;
use crate::config::AppConfig;
use crate::query_parser::FilterParser;
use crate::storage::PanelStore;

/// Service context built once at startup and shared read-only by handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PanelStore>,
    pub config: Arc<AppConfig>,
    /// `None` when the configured parser could not be brought up.
    pub parser: Option<Arc<dyn FilterParser>>,
    pub charts: Arc<ChartSelector>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::status::root))
        .route("/metrics", get(api::status::metrics))
        .route("/api/health", get(api::status::health_check))
        .route("/search/natural", post(api::search::natural_search))
        .route("/search/test", get(api::search::list_members))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
