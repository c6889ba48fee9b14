use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use panel_search_backend::{
    build_router,
    charts::{AssistedChartDecider, ChartSelector, LlmChartAdvisor, RuleTableDecider},
    config::{AppConfig, QueryParserKind},
    llm::OllamaClient,
    query_parser::{FilterParser, QueryParser},
    storage::SqlitePanelStore,
    AppState,
};

#[derive(Parser, Debug)]
#[command(name = "panel-search", about = "Natural language panel search server")]
struct Args {
    /// JSON config file (defaults to ~/.panelsearch/config.json when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database holding the panel table
    #[arg(long)]
    database: Option<PathBuf>,

    /// Query parser: ollama, pattern or disabled
    #[arg(long)]
    parser: Option<QueryParserKind>,
}

async fn build_parser(config: &AppConfig) -> Option<Arc<dyn FilterParser>> {
    match config.query_parser {
        QueryParserKind::Disabled => {
            tracing::warn!("Query parser disabled; natural search will answer 503");
            None
        }
        QueryParserKind::Pattern => Some(Arc::new(QueryParser::pattern_only())),
        QueryParserKind::Ollama => {
            let client = match OllamaClient::new(&config.ollama_url, &config.parser_model, config.llm_timeout()) {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!("Failed to build Ollama client: {}", e);
                    return None;
                }
            };
            match client.check_model_available().await {
                Ok(true) => {
                    tracing::info!("Query parser using Ollama model '{}'", config.parser_model);
                    Some(Arc::new(QueryParser::with_llm(client)))
                }
                Ok(false) => {
                    tracing::error!(
                        "Ollama model '{}' is not installed; natural search will answer 503",
                        config.parser_model
                    );
                    None
                }
                Err(e) => {
                    tracing::error!("Ollama unreachable at {}: {}; natural search will answer 503", config.ollama_url, e);
                    None
                }
            }
        }
    }
}

fn build_chart_selector(config: &AppConfig) -> ChartSelector {
    let assisted = if config.chart_advisor_enabled && config.query_parser == QueryParserKind::Ollama {
        match OllamaClient::new(&config.ollama_url, &config.chart_model, config.llm_timeout()) {
            Ok(client) => Some(Arc::new(LlmChartAdvisor::new(client)) as Arc<dyn AssistedChartDecider>),
            Err(e) => {
                tracing::warn!("Chart advisor unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    ChartSelector::new(assisted, Some(Arc::new(RuleTableDecider::default())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).await?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(parser) = args.parser {
        config.query_parser = parser;
    }
    let config = Arc::new(config);

    let store = SqlitePanelStore::new(&config.database_path, config.storage_timeout())
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    tracing::info!("Using panel database {}", config.database_path.display());

    let parser = build_parser(&config).await;
    let charts = build_chart_selector(&config);
    tracing::info!("Chart tiers: {:?}", charts.tier_names());

    let app_state = AppState {
        store: Arc::new(store),
        config: config.clone(),
        parser,
        charts: Arc::new(charts),
    };

    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Panel search server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
