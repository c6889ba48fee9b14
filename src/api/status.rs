use axum::{extract::State, http::StatusCode, response::Json};

use crate::AppState;

const SERVICE_NAME: &str = "panel-search";

pub async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME
    })))
}

pub async fn metrics() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reports `fallback` when natural search cannot run for lack of a parser.
pub async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    if state.parser.is_some() {
        Json(serde_json::json!({
            "status": "ok",
            "message": "panel search server running",
            "parser": state.config.query_parser,
        }))
    } else {
        Json(serde_json::json!({
            "status": "fallback",
            "error": "query parser not available",
            "message": "natural search returns 503 until a query parser is configured",
        }))
    }
}
