use super::{Embedding, EmbeddingProvider};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const MAX_INPUTS_PER_REQUEST: usize = 64;

/// Ollama embedding provider using the batch `/api/embed` endpoint
pub struct OllamaEmbedding {
    client: Client,
    host: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn model_dimension(model: &str) -> usize {
    if model.contains("mxbai") || model.contains("bge-large") {
        1024
    } else if model.contains("all-minilm") {
        384
    } else {
        // nomic-embed-text and most small models
        768
    }
}

impl OllamaEmbedding {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension: model_dimension(model),
        }
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.host))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, body);
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        if parsed.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        Ok(parsed
            .embeddings
            .into_iter()
            .map(|values| Embedding { values })
            .collect())
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .context("Ollama returned no embedding")
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
        assert_eq!(model_dimension("nomic-embed-text"), 768);
        assert_eq!(model_dimension("mxbai-embed-large"), 1024);
        assert_eq!(model_dimension("all-minilm:l6-v2"), 384);
    }

    #[test]
    fn test_host_trailing_slash() {
        let provider = OllamaEmbedding::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(provider.host, "http://localhost:11434");
        assert_eq!(provider.dimension(), 768);
    }
}
