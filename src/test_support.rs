//! In-process collaborators for orchestrator and handler tests.

use crate::embedding::{Embedding, EmbeddingProvider};
use crate::explain::{ExplainRequest, ExplanationProvider};
use crate::vector_db::{SearchResult, VectorDatabase};
use anyhow::Result;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const DIMENSION: usize = 64;

/// Explains every chunk as `explains <name>`; chunks named in `failing` always error.
#[derive(Default)]
pub struct FakeExplainer {
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ExplanationProvider for FakeExplainer {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = request.chunk.name.clone().unwrap_or_default();
        if self.failing.contains(&name) {
            anyhow::bail!("model timed out");
        }
        Ok(format!("explains {}", name))
    }
}

/// Bag-of-words hashing embedding; identical texts embed identically.
pub struct FakeEmbedding;

impl FakeEmbedding {
    fn vector(text: &str) -> Vec<f32> {
        let mut values = vec![0.0; DIMENSION];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            values[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
        }
        values
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding {
            values: Self::vector(text),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|t| Embedding {
                values: Self::vector(t),
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// Cosine-similarity store kept in memory
#[derive(Default)]
pub struct MemoryVectorDatabase {
    pub collections: Mutex<HashMap<String, Vec<StoredRecord>>>,
    next_id: AtomicUsize,
}

impl MemoryVectorDatabase {
    pub fn records(&self, collection: &str) -> Vec<StoredRecord> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[async_trait::async_trait]
impl VectorDatabase for MemoryVectorDatabase {
    async fn create_collection(&self, name: &str, _dimension: usize) -> Result<()> {
        self.collections
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn insert(&self, collection: &str, vectors: &[Vec<f32>], metadata: &[Value]) -> Result<Vec<String>> {
        let mut collections = self.collections.lock().unwrap();
        let Some(records) = collections.get_mut(collection) else {
            anyhow::bail!("collection {} does not exist", collection);
        };
        let mut ids = Vec::new();
        for (vector, metadata) in vectors.iter().zip(metadata) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            records.push(StoredRecord {
                id: id.clone(),
                vector: vector.clone(),
                metadata: metadata.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let mut results: Vec<SearchResult> = self
            .records(collection)
            .into_iter()
            .map(|r| SearchResult {
                id: r.id,
                score: cosine(&r.vector, vector),
                metadata: r.metadata,
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_file(&self, collection: &str, filepath: &str) -> Result<()> {
        if let Some(records) = self.collections.lock().unwrap().get_mut(collection) {
            records.retain(|r| r.metadata["filepath"] != filepath);
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }
}
