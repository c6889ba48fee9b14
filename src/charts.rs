use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::filters::{FilterMap, PanelColumn, RESIDENCE_COLUMN, REGION_FIELD};
use crate::llm::OllamaClient;
use crate::stats::StatsMap;

pub const MAX_CHARTS: usize = 3;
const MAX_SECONDARY_SUGGESTIONS: usize = 3;
const MAX_SECONDARY_CHARTS: usize = 2;
const SECONDARY_REASON: &str = "additional analysis indicator";

/// Declarative description of one chart; rendering happens client side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart_type: String,
    pub title: String,
    pub reason: String,
    pub xaxis: String,
    pub yaxis: String,
    pub panel_column: String,
}

impl ChartSpec {
    pub fn bar(attribute: &str, title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            chart_type: "bar".to_string(),
            title: title.into(),
            reason: reason.into(),
            xaxis: attribute.to_string(),
            yaxis: "count".to_string(),
            panel_column: attribute.to_string(),
        }
    }

    /// Emitted when nothing else could be charted.
    pub fn default_age_group() -> Self {
        Self::bar(
            PanelColumn::AgeGroup.presentation_name(),
            "Age group distribution",
            "default chart",
        )
    }

    pub fn no_results() -> Self {
        Self::bar(
            PanelColumn::AgeGroup.presentation_name(),
            "No results",
            "no panels matched the query",
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrimaryChoice {
    pub attribute: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartSuggestion {
    pub attribute: String,
    #[serde(default)]
    pub title: String,
}

/// Language-model assisted choice of charted attributes.
#[async_trait]
pub trait AssistedChartDecider: Send + Sync {
    async fn decide_primary(
        &self,
        query: &str,
        filters: &FilterMap,
        stats: &StatsMap,
    ) -> anyhow::Result<Option<PrimaryChoice>>;

    async fn suggest_secondary(
        &self,
        query: &str,
        filters: &FilterMap,
        stats: &StatsMap,
        max: usize,
    ) -> anyhow::Result<Vec<ChartSuggestion>>;
}

/// Fixed-rule choice of a single charted attribute.
pub trait RuleChartDecider: Send + Sync {
    fn decide(&self, filters: &FilterMap, stats: &StatsMap) -> Option<ChartSuggestion>;
}

fn fallback_title(attribute: &str) -> String {
    match PanelColumn::from_presentation_name(attribute) {
        Some(column) => format!("{} distribution", column.display_label()),
        None => format!("{} distribution", attribute),
    }
}

fn title_or_default(title: &str, attribute: &str) -> String {
    if title.trim().is_empty() {
        fallback_title(attribute)
    } else {
        title.trim().to_string()
    }
}

/// Asks an Ollama model which attributes best describe the result set.
pub struct LlmChartAdvisor {
    client: OllamaClient,
}

impl LlmChartAdvisor {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }

    fn context_block(query: &str, filters: &FilterMap, stats: &StatsMap) -> String {
        format!(
            "Question: \"{}\"\nFilters: {}\nValue counts per attribute: {}",
            query,
            serde_json::to_string(filters).unwrap_or_default(),
            serde_json::to_string(stats).unwrap_or_default()
        )
    }
}

#[derive(Deserialize)]
struct SuggestionList {
    #[serde(default)]
    suggestions: Vec<ChartSuggestion>,
}

#[async_trait]
impl AssistedChartDecider for LlmChartAdvisor {
    async fn decide_primary(
        &self,
        query: &str,
        filters: &FilterMap,
        stats: &StatsMap,
    ) -> anyhow::Result<Option<PrimaryChoice>> {
        let prompt = format!(
            r#"A panel search returned the value counts below. Pick the ONE attribute whose bar chart best answers the question. Prefer attributes the question did not already fix.

{}

Return ONLY JSON: {{"attribute": "<attribute name>", "title": "<chart title>", "reason": "<one sentence>"}}"#,
            Self::context_block(query, filters, stats)
        );

        let choice: PrimaryChoice = self.client.generate_json(&prompt).await?;
        if choice.attribute.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(choice))
    }

    async fn suggest_secondary(
        &self,
        query: &str,
        filters: &FilterMap,
        stats: &StatsMap,
        max: usize,
    ) -> anyhow::Result<Vec<ChartSuggestion>> {
        let prompt = format!(
            r#"A panel search returned the value counts below. Suggest up to {} further attributes worth charting, most useful first.

{}

Return ONLY JSON: {{"suggestions": [{{"attribute": "<attribute name>", "title": "<chart title>"}}]}}"#,
            max,
            Self::context_block(query, filters, stats)
        );

        let list: SuggestionList = self.client.generate_json(&prompt).await?;
        Ok(list.suggestions.into_iter().take(max).collect())
    }
}

/// Picks the first chartable attribute, in a fixed priority order, that the
/// filters did not pin to a single value.
pub struct RuleTableDecider {
    priority: Vec<PanelColumn>,
}

impl Default for RuleTableDecider {
    fn default() -> Self {
        Self {
            priority: PanelColumn::ALL.to_vec(),
        }
    }
}

impl RuleTableDecider {
    pub fn with_priority(priority: Vec<PanelColumn>) -> Self {
        Self { priority }
    }

    fn is_pinned(filters: &FilterMap, column: PanelColumn) -> bool {
        let pinned = |key: &str| match filters.get(key) {
            Some(Value::Array(items)) => items.len() == 1,
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        match column {
            PanelColumn::Residence => pinned(REGION_FIELD) || pinned(RESIDENCE_COLUMN),
            other => pinned(other.as_str()),
        }
    }
}

impl RuleChartDecider for RuleTableDecider {
    fn decide(&self, filters: &FilterMap, stats: &StatsMap) -> Option<ChartSuggestion> {
        self.priority
            .iter()
            .filter(|column| !Self::is_pinned(filters, **column))
            .map(|column| column.presentation_name())
            .find(|attribute| stats.is_chartable(attribute))
            .map(|attribute| ChartSuggestion {
                attribute: attribute.to_string(),
                title: fallback_title(attribute),
            })
    }
}

/// Inputs shared by every tier.
pub struct ChartContext<'a> {
    pub query: &'a str,
    pub filters: &'a FilterMap,
    pub stats: &'a StatsMap,
}

/// One strategy in the chart fallback chain. An empty result hands over to
/// the next tier; so does an error, after it is logged.
#[async_trait]
pub trait ChartTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, ctx: &ChartContext<'_>) -> anyhow::Result<Vec<ChartSpec>>;
}

pub struct AssistedTier {
    decider: Arc<dyn AssistedChartDecider>,
}

#[async_trait]
impl ChartTier for AssistedTier {
    fn name(&self) -> &'static str {
        "assisted"
    }

    async fn select(&self, ctx: &ChartContext<'_>) -> anyhow::Result<Vec<ChartSpec>> {
        if ctx.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(primary) = self
            .decider
            .decide_primary(ctx.query, ctx.filters, ctx.stats)
            .await?
        else {
            return Ok(Vec::new());
        };

        if !ctx.stats.is_chartable(&primary.attribute) {
            tracing::debug!(
                "Assisted primary '{}' is not chartable, skipping tier",
                primary.attribute
            );
            return Ok(Vec::new());
        }

        let reason = if primary.reason.trim().is_empty() {
            SECONDARY_REASON.to_string()
        } else {
            primary.reason.clone()
        };
        let mut charts = vec![ChartSpec::bar(
            &primary.attribute,
            title_or_default(&primary.title, &primary.attribute),
            reason,
        )];

        let suggestions = self
            .decider
            .suggest_secondary(ctx.query, ctx.filters, ctx.stats, MAX_SECONDARY_SUGGESTIONS)
            .await?;

        let mut accepted = 0;
        for suggestion in suggestions.into_iter().take(MAX_SECONDARY_SUGGESTIONS) {
            if accepted == MAX_SECONDARY_CHARTS {
                break;
            }
            let duplicate = charts.iter().any(|c| c.panel_column == suggestion.attribute);
            if duplicate || !ctx.stats.is_chartable(&suggestion.attribute) {
                continue;
            }
            charts.push(ChartSpec::bar(
                &suggestion.attribute,
                title_or_default(&suggestion.title, &suggestion.attribute),
                SECONDARY_REASON,
            ));
            accepted += 1;
        }

        Ok(charts)
    }
}

pub struct RuleTier {
    decider: Arc<dyn RuleChartDecider>,
}

#[async_trait]
impl ChartTier for RuleTier {
    fn name(&self) -> &'static str {
        "rule"
    }

    async fn select(&self, ctx: &ChartContext<'_>) -> anyhow::Result<Vec<ChartSpec>> {
        let Some(choice) = self.decider.decide(ctx.filters, ctx.stats) else {
            return Ok(Vec::new());
        };
        if !ctx.stats.is_chartable(&choice.attribute) {
            return Ok(Vec::new());
        }
        Ok(vec![ChartSpec::bar(
            &choice.attribute,
            title_or_default(&choice.title, &choice.attribute),
            "selected by rule table",
        )])
    }
}

/// First attribute, in stats order, with at least two distinct values.
pub struct FirstEligibleTier;

#[async_trait]
impl ChartTier for FirstEligibleTier {
    fn name(&self) -> &'static str {
        "first-eligible"
    }

    async fn select(&self, ctx: &ChartContext<'_>) -> anyhow::Result<Vec<ChartSpec>> {
        Ok(ctx
            .stats
            .attributes()
            .find(|attribute| ctx.stats.is_chartable(attribute))
            .map(|attribute| {
                vec![ChartSpec::bar(
                    attribute,
                    format!("{} distribution", attribute),
                    "first attribute with more than one observed value",
                )]
            })
            .unwrap_or_default())
    }
}

/// Ordered chart strategies with a hard-coded default at the end. Never fails.
pub struct ChartSelector {
    tiers: Vec<Box<dyn ChartTier>>,
}

impl ChartSelector {
    pub fn new(
        assisted: Option<Arc<dyn AssistedChartDecider>>,
        rules: Option<Arc<dyn RuleChartDecider>>,
    ) -> Self {
        let mut tiers: Vec<Box<dyn ChartTier>> = Vec::new();
        if let Some(decider) = assisted {
            tiers.push(Box::new(AssistedTier { decider }));
        }
        if let Some(decider) = rules {
            tiers.push(Box::new(RuleTier { decider }));
        }
        tiers.push(Box::new(FirstEligibleTier));
        Self { tiers }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    pub async fn select(&self, query: &str, filters: &FilterMap, stats: &StatsMap) -> Vec<ChartSpec> {
        let ctx = ChartContext {
            query,
            filters,
            stats,
        };

        for tier in &self.tiers {
            match tier.select(&ctx).await {
                Ok(mut charts) if !charts.is_empty() => {
                    tracing::debug!("Chart tier '{}' produced {} charts", tier.name(), charts.len());
                    charts.truncate(MAX_CHARTS);
                    return charts;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Chart tier '{}' failed, falling through: {:#}", tier.name(), e);
                }
            }
        }

        vec![ChartSpec::default_age_group()]
    }
}
