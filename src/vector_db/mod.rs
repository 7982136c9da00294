pub mod milvus;

use anyhow::Result;

/// Vector database trait
#[async_trait::async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Create the collection unless it already exists
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;
    /// Store vectors with their metadata; returns one store id per vector
    async fn insert(
        &self,
        collection: &str,
        vectors: &[Vec<f32>],
        metadata: &[serde_json::Value],
    ) -> Result<Vec<String>>;
    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchResult>>;
    /// Remove every record whose metadata `filepath` equals `filepath`
    async fn delete_file(&self, collection: &str, filepath: &str) -> Result<()>;
    async fn drop_collection(&self, name: &str) -> Result<()>;
}

/// Search result from vector database
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}
