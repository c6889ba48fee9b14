use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("query parser is not available; configure QUERY_PARSER=ollama with a reachable model or QUERY_PARSER=pattern")]
    ParserUnavailable,
    #[error("query parsing failed: {0}")]
    Parse(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SearchError {
    pub fn status(&self) -> StatusCode {
        match self {
            SearchError::ParserUnavailable | SearchError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SearchError::Parse(_) | SearchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for SearchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout { .. } => SearchError::StorageUnavailable(err.to_string()),
            other => SearchError::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, self);
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_mapping() {
        assert_eq!(SearchError::ParserUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            SearchError::Storage("disk I/O error".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let timeout = StorageError::Timeout { op: "search_panels", after: Duration::from_secs(5) };
        assert_eq!(SearchError::from(timeout).status(), StatusCode::SERVICE_UNAVAILABLE);

        let sqlite = StorageError::Sqlite(rusqlite::Error::InvalidQuery);
        let err = SearchError::from(sqlite);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("sqlite error"));
    }
}
