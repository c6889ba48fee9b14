use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    #[serde(default = "default_result_limit")]
    pub default_result_limit: usize,
    #[serde(default = "default_max_result_limit")]
    pub max_result_limit: usize,
    #[serde(default = "default_query_parser")]
    pub query_parser: QueryParserKind,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_parser_model")]
    pub parser_model: String,
    #[serde(default = "default_chart_model")]
    pub chart_model: String,
    #[serde(default = "default_chart_advisor_enabled")]
    pub chart_advisor_enabled: bool,
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QueryParserKind {
    Ollama,
    Pattern,
    Disabled,
}

impl std::str::FromStr for QueryParserKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(QueryParserKind::Ollama),
            "pattern" => Ok(QueryParserKind::Pattern),
            "disabled" | "none" => Ok(QueryParserKind::Disabled),
            other => anyhow::bail!("unknown query parser '{}'", other),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_database_path() -> PathBuf {
    AppConfig::data_dir().join("panel.db")
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_result_limit() -> usize {
    100
}

fn default_max_result_limit() -> usize {
    1_000
}

fn default_query_parser() -> QueryParserKind {
    QueryParserKind::Ollama
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_parser_model() -> String {
    "llama3.2:1b".to_string()
}

fn default_chart_model() -> String {
    "llama3.2:1b".to_string()
}

fn default_chart_advisor_enabled() -> bool {
    true
}

fn default_llm_timeout_ms() -> u64 {
    20_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            storage_timeout_ms: default_storage_timeout_ms(),
            default_result_limit: default_result_limit(),
            max_result_limit: default_max_result_limit(),
            query_parser: default_query_parser(),
            ollama_url: default_ollama_url(),
            parser_model: default_parser_model(),
            chart_model: default_chart_model(),
            chart_advisor_enabled: default_chart_advisor_enabled(),
            llm_timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".panelsearch")
    }

    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn data_dir() -> PathBuf {
        Self::config_dir().join("data")
    }

    /// `.env`, then the JSON config file if present, then environment
    /// variables.
    pub async fn load(config_file: Option<&Path>) -> Result<Self> {
        // a missing .env file is fine
        let _ = dotenv::dotenv();

        let path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_file);

        let mut config: AppConfig = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else if config_file.is_some() {
            anyhow::bail!("config file {} does not exist", path.display());
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.normalize();
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("STORAGE_TIMEOUT_MS") {
            self.storage_timeout_ms = v.parse().context("STORAGE_TIMEOUT_MS")?;
        }
        if let Some(v) = lookup("DEFAULT_RESULT_LIMIT") {
            self.default_result_limit = v.parse().context("DEFAULT_RESULT_LIMIT")?;
        }
        if let Some(v) = lookup("MAX_RESULT_LIMIT") {
            self.max_result_limit = v.parse().context("MAX_RESULT_LIMIT")?;
        }
        if let Some(v) = lookup("QUERY_PARSER") {
            self.query_parser = v.parse()?;
        }
        if let Some(v) = lookup("OLLAMA_URL") {
            self.ollama_url = v;
        }
        if let Some(v) = lookup("PARSER_MODEL") {
            self.parser_model = v;
        }
        if let Some(v) = lookup("CHART_MODEL") {
            self.chart_model = v;
        }
        if let Some(v) = lookup("CHART_ADVISOR_ENABLED") {
            self.chart_advisor_enabled = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    /// Keep limits and timeouts usable whatever the sources said.
    pub fn normalize(&mut self) {
        if self.max_result_limit == 0 {
            self.max_result_limit = default_max_result_limit();
        }
        if self.default_result_limit == 0 {
            self.default_result_limit = default_result_limit();
        }
        self.default_result_limit = self.default_result_limit.min(self.max_result_limit);
        if self.storage_timeout_ms == 0 {
            self.storage_timeout_ms = default_storage_timeout_ms();
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    /// Requested row cap, or the default, clamped to the configured maximum.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .unwrap_or(self.default_result_limit)
            .min(self.max_result_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("QUERY_PARSER", "pattern"),
            ("DEFAULT_RESULT_LIMIT", "25"),
            ("CHART_ADVISOR_ENABLED", "off"),
            ("DATABASE_PATH", "/tmp/panels.db"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.query_parser, QueryParserKind::Pattern);
        assert_eq!(config.default_result_limit, 25);
        assert!(!config.chart_advisor_enabled);
        assert_eq!(config.database_path, PathBuf::from("/tmp/panels.db"));
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(|k| (k == "QUERY_PARSER").then(|| "gpt".to_string())).is_err());
        assert!(config
            .apply_env(|k| (k == "STORAGE_TIMEOUT_MS").then(|| "soon".to_string()))
            .is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"query_parser": "disabled"}"#).unwrap();

        assert_eq!(config.query_parser, QueryParserKind::Disabled);
        assert_eq!(config.default_result_limit, 100);
        assert_eq!(config.storage_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn limits_are_clamped() {
        let mut config = AppConfig {
            default_result_limit: 5_000,
            max_result_limit: 200,
            ..AppConfig::default()
        };
        config.normalize();

        assert_eq!(config.default_result_limit, 200);
        assert_eq!(config.effective_limit(None), 200);
        assert_eq!(config.effective_limit(Some(0)), 200);
        assert_eq!(config.effective_limit(Some(10)), 10);
        assert_eq!(config.effective_limit(Some(10_000)), 200);
    }
}
