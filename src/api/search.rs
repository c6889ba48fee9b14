use axum::{extract::State, response::Json};

use crate::error::SearchError;
use crate::search::{NaturalSearchRequest, NaturalSearchResponse};
use crate::storage::MemberRow;
use crate::AppState;

pub async fn natural_search(
    State(state): State<AppState>,
    Json(request): Json<NaturalSearchRequest>,
) -> Result<Json<NaturalSearchResponse>, SearchError> {
    let response = crate::search::natural_search(&state, &request).await?;
    Ok(Json(response))
}

/// Dumps the membership table; used to check database connectivity.
pub async fn list_members(
    State(state): State<AppState>,
) -> Result<Json<Vec<MemberRow>>, SearchError> {
    let members = state.store.list_members().await?;
    Ok(Json(members))
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::search::tests::{canonical_filters, record, state_with, StubStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn natural_search_over_http() {
        let store = Arc::new(StubStore::new(
            &["p1", "p2", "p3"],
            vec![record("p1", "30s"), record("p2", "40s"), record("p3", "30s")],
        ));
        let app = build_router(state_with(Some(canonical_filters()), store));

        let (status, body) = post_json(
            app,
            "/search/natural",
            json!({"question": "30s women Seoul professional", "mode": "flexible", "filters": {"count": 3}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panelList"], json!(["p1", "p2", "p3"]));
        assert_eq!(body["accuracy"], json!(0.95));
        assert_eq!(body["accuracyList"].as_array().unwrap().len(), 3);
        assert_eq!(body["charts"][0]["panelColumn"], json!("age_group"));
        assert_eq!(body["charts"][0]["yaxis"], json!("count"));
    }

    #[tokio::test]
    async fn zero_results_are_still_ok() {
        let app = build_router(state_with(Some(canonical_filters()), Arc::new(StubStore::new(&[], Vec::new()))));

        let (status, body) = post_json(app, "/search/natural", json!({"question": "x", "mode": "strict"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accuracy"], json!(0.0));
        assert_eq!(body["panelList"], json!([]));
        assert_eq!(body["accuracyList"], json!([]));
        assert_eq!(body["charts"].as_array().unwrap().len(), 1);
        assert_eq!(body["charts"][0]["title"], json!("No results"));
    }

    #[tokio::test]
    async fn missing_parser_returns_503() {
        let app = build_router(state_with(None, Arc::new(StubStore::new(&["p1"], Vec::new()))));

        let (status, body) = post_json(app, "/search/natural", json!({"question": "x", "mode": "flexible"})).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("query parser"));
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let app = build_router(state_with(Some(canonical_filters()), Arc::new(StubStore::new(&[], Vec::new()))));

        let (status, _) = post_json(app, "/search/natural", json!({"question": "x", "mode": "fuzzy"})).await;

        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn members_and_status_endpoints() {
        let store = Arc::new(StubStore::new(&[], Vec::new()));

        let (status, body) = get_json(build_router(state_with(None, store.clone())), "/search/test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"id": 1, "name": "Kim"}]));

        let (_, body) = get_json(build_router(state_with(None, store.clone())), "/").await;
        assert_eq!(body["status"], json!("fallback"));

        let (_, body) = get_json(build_router(state_with(Some(canonical_filters()), store.clone())), "/").await;
        assert_eq!(body["status"], json!("ok"));

        let (status, body) = get_json(build_router(state_with(None, store)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], json!("panel-search"));
    }
}
