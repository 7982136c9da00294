use crate::embedding::EmbeddingProvider;
use crate::explain::{explain_with_retry, ExplainRequest, ExplanationProvider};
use crate::parser::error::ParseError;
use crate::parser::sas_parser::SasParser;
use crate::parser::source::SourceText;
use crate::parser::Chunk;
use crate::snapshot::SnapshotManager;
use crate::vector_db::VectorDatabase;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tuning knobs for an indexing run
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub concurrency: usize,
    pub explain_max_attempts: u32,
    pub file_context_chars: usize,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            explain_max_attempts: 3,
            file_context_chars: 6000,
        }
    }
}

/// Outcome of `index_directory`
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub collection: String,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_unreadable: usize,
    pub files_removed: usize,
    pub chunks_stored: usize,
    pub incomplete_chunks: usize,
    /// Chunks stored without an explanation
    pub explanation_gaps: usize,
    /// Files whose chunks could not be embedded or stored
    pub storage_failures: usize,
}

/// A chunk plus what the collaborators derived from it. The chunk itself is never rewritten.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub explanation: Option<String>,
    pub vector_id: Option<String>,
}

/// Metadata stored next to each vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub kind: String,
    pub name: Option<String>,
    pub code: String,
    #[serde(default)]
    pub comments: Vec<String>,
    pub filename: String,
    pub filepath: String,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl ChunkRecord {
    fn new(chunk: &Chunk, explanation: Option<&str>) -> Self {
        Self {
            kind: chunk.kind.as_str().to_string(),
            name: chunk.name.clone(),
            code: chunk.code.clone(),
            comments: chunk.comments.clone(),
            filename: chunk.filename.clone(),
            filepath: chunk.filepath.clone(),
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            incomplete: chunk.incomplete,
            explanation: explanation.map(str::to_string),
        }
    }
}

/// One similarity hit, ranked from 1
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f32,
    pub id: String,
    pub record: ChunkRecord,
}

#[derive(Debug)]
struct ParsedFile {
    path: PathBuf,
    hash: String,
    text: String,
    chunks: Vec<Chunk>,
    previously_indexed: bool,
}

#[derive(Debug, Default)]
struct StoredFile {
    chunks: Vec<IndexedChunk>,
    explanation_gaps: usize,
}

#[derive(Debug)]
enum FileOutcome {
    Unchanged,
    Parsed(ParsedFile),
    Unreadable(ParseError),
}

/// Drives parsing and the external collaborators over a directory of SAS programs
pub struct Indexer {
    explainer: Arc<dyn ExplanationProvider>,
    embedding: Arc<dyn EmbeddingProvider>,
    vector_db: Arc<dyn VectorDatabase>,
    snapshot: Arc<SnapshotManager>,
    parser: SasParser,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(
        explainer: Arc<dyn ExplanationProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        vector_db: Arc<dyn VectorDatabase>,
        snapshot: Arc<SnapshotManager>,
        options: IndexerOptions,
    ) -> Self {
        Self {
            explainer,
            embedding,
            vector_db,
            snapshot,
            parser: SasParser::new(),
            options,
        }
    }

    /// Collection name derived from the indexed root
    pub fn collection_name(root: &Path) -> String {
        let path_hash = SasParser::hash_file(&root.to_string_lossy());
        format!("sas_code_{}", &path_hash[..16])
    }

    /// All `.sas` files under `root`, honouring ignore files and skipping hidden entries.
    pub fn discover(root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root)
            .standard_filters(true)
            .hidden(true)
            .build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| SasParser::is_sas_file(path))
            .collect();
        files.sort();
        files
    }

    /// Parse one file without calling any collaborator.
    pub async fn parse_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ParseError::unreadable(path.to_string_lossy(), e))?;
        let parser = self.parser;
        let path = path.to_path_buf();
        let chunks = tokio::task::spawn_blocking(move || parser.parse_bytes(&path, &bytes))
            .await
            .context("Parser task panicked")??;
        Ok(chunks)
    }

    pub async fn index_directory(&self, root: &Path, force: bool) -> Result<IndexReport> {
        let root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("Path does not exist: {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Path is not a directory: {}", root.display());
        }

        let collection = Self::collection_name(&root);
        let mut report = IndexReport {
            collection: collection.clone(),
            ..Default::default()
        };

        if force {
            tracing::info!("Rebuilding collection {}", collection);
            if let Err(e) = self.vector_db.drop_collection(&collection).await {
                tracing::warn!("Failed to drop collection {}: {}", collection, e);
            }
            self.snapshot.clear().await;
        }

        self.vector_db
            .create_collection(&collection, self.embedding.dimension())
            .await
            .with_context(|| format!("Failed to create collection {}", collection))?;
        self.snapshot.set_collection(root.clone(), collection.clone()).await;

        tracing::info!("Indexing SAS programs under: {}", root.display());
        let files = Self::discover(&root);

        for removed in self.snapshot.retain_files(&files).await {
            tracing::info!("Removing chunks of deleted file {}", removed.display());
            if let Err(e) = self
                .vector_db
                .delete_file(&collection, &removed.to_string_lossy())
                .await
            {
                tracing::warn!("Failed to delete chunks of {:?}: {}", removed, e);
            }
            report.files_removed += 1;
        }

        let mut changed = Vec::new();
        for outcome in self.parse_all(files).await {
            match outcome {
                FileOutcome::Unchanged => report.files_unchanged += 1,
                FileOutcome::Unreadable(e) => {
                    tracing::warn!("{}", e);
                    report.files_unreadable += 1;
                }
                FileOutcome::Parsed(parsed) => changed.push(parsed),
            }
        }

        // Stored on the parsing pool's bound; report and snapshot updates stay serial
        let collection_ref = collection.as_str();
        let mut stored: Vec<(ParsedFile, Result<StoredFile>)> = stream::iter(changed)
            .map(|parsed| async move {
                let result = self.store_file(collection_ref, &parsed).await;
                (parsed, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        stored.sort_by(|a, b| a.0.path.cmp(&b.0.path));

        for (parsed, result) in stored {
            match result {
                Ok(file) => {
                    let incomplete = file.chunks.iter().filter(|c| c.chunk.incomplete).count();
                    report.files_indexed += 1;
                    report.chunks_stored += file.chunks.len();
                    report.incomplete_chunks += incomplete;
                    report.explanation_gaps += file.explanation_gaps;
                    self.snapshot
                        .update_file(parsed.path, parsed.hash, file.chunks.len(), incomplete)
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Failed to store chunks of {:?}: {:#}", parsed.path, e);
                    report.storage_failures += 1;
                }
            }
        }

        self.snapshot.save().await?;
        tracing::info!(
            "Indexed {} files ({} unchanged, {} unreadable), {} chunks",
            report.files_indexed,
            report.files_unchanged,
            report.files_unreadable,
            report.chunks_stored
        );
        Ok(report)
    }

    /// Read and parse files on a bounded worker pool; results come back in path order.
    async fn parse_all(&self, files: Vec<PathBuf>) -> Vec<FileOutcome> {
        let mut outcomes: Vec<(PathBuf, FileOutcome)> = stream::iter(files)
            .map(|path| async move {
                let outcome = self.read_and_parse(&path).await;
                (path, outcome)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn read_and_parse(&self, path: &Path) -> FileOutcome {
        let display = path.to_string_lossy().to_string();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return FileOutcome::Unreadable(ParseError::unreadable(display, e)),
        };

        let parser = self.parser;
        let owned_path = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || {
            let source = SourceText::from_bytes(&display, &bytes)?;
            let chunks = parser.parse_source(&owned_path, &source);
            Ok::<_, ParseError>((source.into_text(), chunks))
        })
        .await;

        let (text, chunks) = match parsed {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(e)) => return FileOutcome::Unreadable(e),
            Err(e) => {
                return FileOutcome::Unreadable(ParseError::unreadable(path.to_string_lossy(), e))
            }
        };

        let hash = SasParser::hash_file(&text);
        let previous = self.snapshot.get_file_hash(path).await;
        if previous.as_deref() == Some(hash.as_str()) {
            return FileOutcome::Unchanged;
        }

        FileOutcome::Parsed(ParsedFile {
            path: path.to_path_buf(),
            hash,
            text,
            chunks,
            previously_indexed: previous.is_some(),
        })
    }

    /// Explain, embed and store every chunk of one file.
    async fn store_file(&self, collection: &str, parsed: &ParsedFile) -> Result<StoredFile> {
        if parsed.previously_indexed {
            self.vector_db
                .delete_file(collection, &parsed.path.to_string_lossy())
                .await
                .context("Failed to remove stale chunks")?;
        }
        if parsed.chunks.is_empty() {
            return Ok(StoredFile::default());
        }

        let file_context = truncate(&parsed.text, self.options.file_context_chars);
        let mut indexed = Vec::with_capacity(parsed.chunks.len());
        let mut explanation_gaps = 0;
        for chunk in &parsed.chunks {
            let request = ExplainRequest { chunk, file_context };
            let explanation = match explain_with_retry(
                self.explainer.as_ref(),
                &request,
                self.options.explain_max_attempts,
            )
            .await
            {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(
                        "No explanation for {} {} ({}:{}-{}), indexing code only: {:#}",
                        chunk.kind,
                        chunk.name.as_deref().unwrap_or("(anonymous)"),
                        chunk.filename,
                        chunk.line_start,
                        chunk.line_end,
                        e
                    );
                    explanation_gaps += 1;
                    None
                }
            };
            indexed.push(IndexedChunk {
                chunk: chunk.clone(),
                explanation,
                vector_id: None,
            });
        }

        let texts: Vec<String> = indexed.iter().map(embedding_text).collect();
        let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let embeddings = self
            .embedding
            .embed_batch(&text_refs)
            .await
            .context("Failed to embed chunks")?;

        let metadata: Vec<serde_json::Value> = indexed
            .iter()
            .map(|c| serde_json::to_value(ChunkRecord::new(&c.chunk, c.explanation.as_deref())))
            .collect::<Result<_, _>>()?;
        let vectors: Vec<Vec<f32>> = embeddings.into_iter().map(|e| e.values).collect();

        let ids = self
            .vector_db
            .insert(collection, &vectors, &metadata)
            .await
            .context("Failed to insert vectors")?;
        for (chunk, id) in indexed.iter_mut().zip(ids) {
            chunk.vector_id = Some(id);
        }
        Ok(StoredFile {
            chunks: indexed,
            explanation_gaps,
        })
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let collection = self
            .snapshot
            .get_collection_name()
            .await
            .context("No indexed codebase found. Please index first.")?;

        let embedding = self.embedding.embed(query).await?;
        let results = self
            .vector_db
            .search(&collection, &embedding.values, limit)
            .await?;

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            match serde_json::from_value::<ChunkRecord>(result.metadata) {
                Ok(record) => hits.push(SearchHit {
                    rank: hits.len() + 1,
                    score: result.score,
                    id: result.id,
                    record,
                }),
                Err(e) => tracing::warn!("Skipping result {} with malformed metadata: {}", result.id, e),
            }
        }
        Ok(hits)
    }

    /// Drop the indexed collection; returns its name if there was one.
    pub async fn clear(&self) -> Result<Option<String>> {
        let Some(collection) = self.snapshot.get_collection_name().await else {
            return Ok(None);
        };
        self.vector_db.drop_collection(&collection).await?;
        self.snapshot.clear().await;
        self.snapshot.save().await?;
        Ok(Some(collection))
    }
}

/// Text embedded for a chunk: its explanation, or the code and comments when explanation failed.
fn embedding_text(indexed: &IndexedChunk) -> String {
    match &indexed.explanation {
        Some(explanation) => explanation.clone(),
        None => {
            let chunk = &indexed.chunk;
            let mut text = format!("{} {}\n", chunk.kind, chunk.name.as_deref().unwrap_or(""));
            for comment in &chunk.comments {
                text.push_str(comment);
                text.push('\n');
            }
            text.push_str(&chunk.code);
            text
        }
    }
}

/// Truncate to at most `max_chars` characters.
pub fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
