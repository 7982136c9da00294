use super::{Embedding, EmbeddingProvider};
use crate::config::OpenAIEndpoint;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Azure deployments reject larger input arrays
const MAX_INPUTS_PER_REQUEST: usize = 16;

/// OpenAI-compatible embedding provider (OpenAI or an Azure OpenAI deployment)
pub struct OpenAIEmbedding {
    client: Client,
    endpoint: OpenAIEndpoint,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

impl OpenAIEmbedding {
    pub fn new(endpoint: OpenAIEndpoint, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            model: model.to_string(),
            dimension: model_dimension(model),
        }
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let url = self.endpoint.url("embeddings", &self.model);
        let response = self
            .endpoint
            .authorize(self.client.post(url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!("Embedded {} texts, {} tokens", texts.len(), usage.total_tokens);
        }

        let mut data = parsed.data;
        if data.len() != texts.len() {
            anyhow::bail!(
                "Embedding API returned {} vectors for {} inputs",
                data.len(),
                texts.len()
            );
        }
        data.sort_by_key(|d| d.index);
        Ok(data
            .into_iter()
            .map(|d| Embedding { values: d.embedding })
            .collect())
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .context("No embedding returned")
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            embeddings.extend(self.request(batch).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimension() {
        assert_eq!(model_dimension("text-embedding-3-large"), 3072);
        assert_eq!(model_dimension("text-embedding-ada-002"), 1536);
        assert_eq!(model_dimension("my-azure-deployment"), 1536);
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &["data dm; run;"],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "text-embedding-3-small", "input": ["data dm; run;"]})
        );
    }
}
