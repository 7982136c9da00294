use super::{ExplainRequest, ExplanationProvider, SYSTEM_PROMPT};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Ollama `/api/generate` explainer
pub struct OllamaExplainer {
    client: Client,
    host: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaExplainer {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ExplanationProvider for OllamaExplainer {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String> {
        let url = format!("{}/api/generate", self.host);
        let prompt = request.prompt();

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                system: SYSTEM_PROMPT,
                prompt: &prompt,
                stream: false,
            })
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, body);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        Ok(generated.response)
    }
}
