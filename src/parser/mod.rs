pub mod comments;
pub mod error;
pub mod extractor;
pub mod sas_parser;
pub mod scanner;
pub mod source;

use serde::Serialize;

/// A semantically complete unit of a SAS program (macro, DATA step or PROC block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub name: Option<String>,
    /// Verbatim source, from the opening keyword through the closing statement
    pub code: String,
    /// Documentation comments in source order, delimiters stripped
    pub comments: Vec<String>,
    pub filename: String,
    pub filepath: String,
    /// 1-based, inclusive
    pub line_start: usize,
    /// 1-based, inclusive
    pub line_end: usize,
    /// Set when end of input was reached before the block was closed;
    /// `line_end` is then the last line of the file, not a real close.
    pub incomplete: bool,
}

/// Type of SAS block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Macro,
    DataStep,
    ProcBlock,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Macro => "macro",
            ChunkKind::DataStep => "data_step",
            ChunkKind::ProcBlock => "proc_block",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
