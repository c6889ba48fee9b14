use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::charts::ChartSpec;
use crate::error::SearchError;
use crate::filters::{map_filters_to_columns, requested_limit};
use crate::predicate::build_panel_query;
use crate::query_parser::SearchMode;
use crate::stats::aggregate_stats;
use crate::AppState;

/// Placeholder confidence reported whenever panels are found.
pub const MATCH_ACCURACY: f64 = 0.95;
const MAX_ACCURACY_ITEMS: usize = 7;
const ACCURACY_STEP: f64 = 0.01;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFilters {
    pub count: Option<usize>,
    pub gender: Option<String>,
    /// Extra phrases appended to the question before parsing.
    pub filters: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NaturalSearchRequest {
    pub question: String,
    pub mode: SearchMode,
    #[serde(default)]
    pub filters: Option<ClientFilters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalSearchResponse {
    pub accuracy: Option<f64>,
    pub panel_list: Vec<String>,
    pub accuracy_list: Vec<f64>,
    pub charts: Vec<ChartSpec>,
}

impl NaturalSearchResponse {
    pub fn no_results() -> Self {
        Self {
            accuracy: Some(0.0),
            panel_list: Vec::new(),
            accuracy_list: Vec::new(),
            charts: vec![ChartSpec::no_results()],
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Overall score plus a decreasing per-item list for the first few panels.
pub fn accuracy_scores(found: usize) -> (f64, Vec<f64>) {
    if found == 0 {
        return (0.0, Vec::new());
    }
    let list = (0..found.min(MAX_ACCURACY_ITEMS))
        .map(|i| round2(MATCH_ACCURACY - ACCURACY_STEP * i as f64))
        .collect();
    (MATCH_ACCURACY, list)
}

fn question_with_hints(request: &NaturalSearchRequest) -> String {
    let hints = request
        .filters
        .as_ref()
        .and_then(|f| f.filters.as_ref())
        .map(|hints| {
            hints
                .iter()
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    if hints.is_empty() {
        request.question.trim().to_string()
    } else {
        format!("{} {}", request.question.trim(), hints)
    }
}

/// Parse, search, aggregate and chart one natural-language request.
pub async fn natural_search(
    state: &AppState,
    request: &NaturalSearchRequest,
) -> Result<NaturalSearchResponse, SearchError> {
    let parser = state.parser.as_ref().ok_or(SearchError::ParserUnavailable)?;

    let question = question_with_hints(request);
    let mut filters = parser
        .parse(&question, request.mode)
        .await
        .map_err(|e| SearchError::Parse(e.to_string()))?;

    let client = request.filters.clone().unwrap_or_default();
    let limit = state
        .config
        .effective_limit(client.count.or_else(|| requested_limit(&filters)));
    filters.insert("limit".to_string(), Value::from(limit));
    if let Some(gender) = client.gender.filter(|g| !g.trim().is_empty()) {
        filters.insert("gender".to_string(), Value::from(gender));
    }

    let columns = map_filters_to_columns(&filters);
    let query = build_panel_query(&columns, limit);
    tracing::debug!("Panel query: {} with {} params", query.where_clause, query.params.len());

    let panel_ids = state.store.search_panels(&query).await?;
    tracing::info!(
        "Natural search '{}' ({}) matched {} panels",
        request.question,
        request.mode.as_str(),
        panel_ids.len()
    );

    if panel_ids.is_empty() {
        return Ok(NaturalSearchResponse::no_results());
    }

    let stats = aggregate_stats(state.store.as_ref(), &panel_ids).await;
    let charts = state.charts.select(&request.question, &filters, &stats).await;
    let (accuracy, accuracy_list) = accuracy_scores(panel_ids.len());

    Ok(NaturalSearchResponse {
        accuracy: Some(accuracy),
        panel_list: panel_ids,
        accuracy_list,
        charts,
    })
}
