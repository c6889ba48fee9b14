use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl TagsResponse {
    /// `llama3.2` matches an installed `llama3.2:latest`.
    fn lists(&self, model: &str) -> bool {
        self.models.iter().any(|tag| {
            tag.name == model
                || tag
                    .name
                    .strip_prefix(model)
                    .is_some_and(|rest| rest.starts_with(':'))
        })
    }
}

/// Minimal Ollama `/api/generate` client shared by the query parser and the
/// chart advisor.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("calling {} at {}", self.model, self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error: {} - {}", status, error_text);
        }

        let generate_response: GenerateResponse = response
            .json()
            .await
            .context("decoding Ollama generate response")?;
        Ok(generate_response.response)
    }

    /// Generate and decode a JSON answer.
    pub async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        let text = self.generate(prompt).await?;
        Ok(serde_json::from_str(strip_code_fence(&text))?)
    }

    /// Whether the configured model is installed on the Ollama server.
    pub async fn check_model_available(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .with_context(|| format!("listing models at {}", self.base_url))?;

        if !response.status().is_success() {
            tracing::warn!("Ollama model listing answered {}", response.status());
            return Ok(false);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .context("decoding Ollama model list")?;
        Ok(tags.lists(&self.model))
    }
}

/// Models sometimes wrap JSON in markdown fences.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(rest) => rest.strip_suffix("```").unwrap_or(rest).trim(),
        None => text,
    }
}
