pub mod ollama;
pub mod openai;

use crate::config::{Config, ProviderKind};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Embedding vector result
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Embedding provider trait
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;
    fn dimension(&self) -> usize;
}

/// Build the embedding provider selected by configuration
pub fn from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match config.embedding_provider {
        ProviderKind::Ollama => Arc::new(ollama::OllamaEmbedding::new(
            &config.ollama_host,
            &config.embedding_model,
        )),
        provider => {
            let endpoint = config
                .endpoint_for(provider)
                .context("Embedding provider has no endpoint configured")?
                .clone();
            Arc::new(openai::OpenAIEmbedding::new(endpoint, &config.embedding_model))
        }
    })
}
