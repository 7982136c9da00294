use crate::indexer::{truncate, Indexer, IndexReport, SearchHit};
use crate::mcp::types::Content;
use crate::snapshot::SnapshotManager;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

pub const DEFAULT_SEARCH_LIMIT: u64 = 3;
pub const MAX_SEARCH_LIMIT: u64 = 50;
const MAX_FILE_CONTEXT_CHARS: usize = 20_000;

/// Tool handlers for MCP server
pub struct ToolHandlers {
    indexer: Arc<Indexer>,
    snapshot_manager: Arc<SnapshotManager>,
}

impl ToolHandlers {
    pub fn new(indexer: Arc<Indexer>, snapshot_manager: Arc<SnapshotManager>) -> Self {
        Self {
            indexer,
            snapshot_manager,
        }
    }

    /// Handle index_sas_codebase tool
    pub async fn handle_index_codebase(&self, args: &Value) -> Result<Vec<Content>> {
        let path = required_str(args, "path")?;
        let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);

        let report = self.indexer.index_directory(Path::new(path), force).await?;
        Ok(vec![Content::Text {
            text: format_report(&report),
        }])
    }

    /// Handle search_sas_code tool
    pub async fn handle_search_code(&self, args: &Value) -> Result<Vec<Content>> {
        let query = required_str(args, "query")?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT) as usize;
        let include_file_context = args
            .get("include_file_context")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let hits = self.indexer.search(query, limit).await?;
        if hits.is_empty() {
            return Ok(vec![Content::Text {
                text: "No results found.".to_string(),
            }]);
        }

        let mut formatted = String::new();
        for hit in &hits {
            let file_content = if include_file_context {
                read_file_context(&hit.record.filepath).await
            } else {
                None
            };
            formatted.push_str(&format_hit(hit, file_content.as_deref()));
        }

        Ok(vec![Content::Text { text: formatted }])
    }

    /// Handle parse_sas_file tool
    pub async fn handle_parse_file(&self, args: &Value) -> Result<Vec<Content>> {
        let path = required_str(args, "path")?;
        let chunks = self.indexer.parse_file(Path::new(path)).await?;
        Ok(vec![Content::Text {
            text: serde_json::to_string_pretty(&chunks)?,
        }])
    }

    /// Handle clear_index tool
    pub async fn handle_clear_index(&self, _args: &Value) -> Result<Vec<Content>> {
        let text = match self.indexer.clear().await? {
            Some(collection) => format!("Cleared index: {}", collection),
            None => "No indexed codebase found.".to_string(),
        };
        Ok(vec![Content::Text { text }])
    }

    /// Handle get_indexing_status tool
    pub async fn handle_get_indexing_status(&self, _args: &Value) -> Result<Vec<Content>> {
        let text = match self.snapshot_manager.summary().await {
            Some(summary) => format!(
                "Status: Indexed\nRoot: {}\nCollection: {}\nFiles: {}\nChunks: {} ({} incomplete)",
                summary
                    .root
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                summary.collection_name,
                summary.files,
                summary.chunks,
                summary.incomplete_chunks
            ),
            None => "Status: Not indexed".to_string(),
        };
        Ok(vec![Content::Text { text }])
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .with_context(|| format!("Missing '{}' argument", key))
}

fn format_report(report: &IndexReport) -> String {
    let mut text = format!(
        "Indexed {} files, {} chunks\nUnchanged: {}\nUnreadable: {}\nRemoved: {}\nCollection: {}",
        report.files_indexed,
        report.chunks_stored,
        report.files_unchanged,
        report.files_unreadable,
        report.files_removed,
        report.collection
    );
    if report.incomplete_chunks > 0 {
        text.push_str(&format!(
            "\nIncomplete blocks (no closing statement): {}",
            report.incomplete_chunks
        ));
    }
    if report.explanation_gaps > 0 {
        text.push_str(&format!(
            "\nChunks indexed without explanation: {}",
            report.explanation_gaps
        ));
    }
    if report.storage_failures > 0 {
        text.push_str(&format!(
            "\nFiles that failed to store (will retry on next run): {}",
            report.storage_failures
        ));
    }
    text
}

async fn read_file_context(filepath: &str) -> Option<String> {
    match fs::read_to_string(filepath).await {
        Ok(content) => Some(truncate(&content, MAX_FILE_CONTEXT_CHARS).to_string()),
        Err(e) => {
            tracing::debug!("File context unavailable for {}: {}", filepath, e);
            Some("File not accessible".to_string())
        }
    }
}

fn format_hit(hit: &SearchHit, file_content: Option<&str>) -> String {
    let record = &hit.record;
    let rule = "=".repeat(70);
    let mut text = format!(
        "\n{rule}\nCHUNK {}: {} - {}\nFile: {} (Lines {}-{}{})\nScore: {:.3}\n{rule}\n",
        hit.rank,
        record.kind,
        record.name.as_deref().unwrap_or("(anonymous)"),
        record.filepath,
        record.line_start,
        record.line_end,
        if record.incomplete { ", unterminated" } else { "" },
        hit.score,
    );
    if let Some(content) = file_content {
        text.push_str(&format!("\n--- FULL FILE CONTEXT ---\n{}\n", content));
    }
    text.push_str("\n--- SPECIFIC CHUNK ---\n");
    if !record.comments.is_empty() {
        text.push_str(&format!("Comments: {}\n", record.comments.join(" | ")));
    }
    text.push_str(&format!(
        "Explanation: {}\n",
        record.explanation.as_deref().unwrap_or("(not available)")
    ));
    text.push_str(&format!("Code:\n```sas\n{}\n```\n", record.code));
    text
}
