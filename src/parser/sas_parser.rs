use super::comments::CommentAssociator;
use super::error::Result;
use super::extractor::{BlockExtractor, Span};
use super::source::SourceText;
use super::Chunk;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Segments SAS programs into macro, DATA step and PROC block chunks
#[derive(Debug, Default, Clone, Copy)]
pub struct SasParser;

impl SasParser {
    pub fn new() -> Self {
        Self
    }

    /// Get file hash for change detection
    pub fn hash_file(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_sas_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sas"))
    }

    /// Parse raw file bytes. Fails only if the bytes are not text.
    pub fn parse_bytes(&self, file_path: &Path, bytes: &[u8]) -> Result<Vec<Chunk>> {
        let source = SourceText::from_bytes(&file_path.to_string_lossy(), bytes)?;
        Ok(self.parse_source(file_path, &source))
    }

    /// Parse already decoded content
    pub fn parse(&self, file_path: &Path, content: &str) -> Vec<Chunk> {
        self.parse_source(file_path, &SourceText::new(content))
    }

    pub fn parse_source(&self, file_path: &Path, source: &SourceText) -> Vec<Chunk> {
        let extraction = BlockExtractor::extract(source.text());
        let comments =
            CommentAssociator::new(source.text(), &extraction.comments).associate(&extraction.spans);

        let filepath = file_path.to_string_lossy().to_string();
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filepath.clone());

        let chunks: Vec<Chunk> = extraction
            .spans
            .into_iter()
            .zip(comments)
            .map(|(span, comments)| emit(source, span, comments, &filename, &filepath))
            .collect();

        tracing::debug!(
            "Parsed {}: {} chunks ({} incomplete)",
            filepath,
            chunks.len(),
            chunks.iter().filter(|c| c.incomplete).count()
        );
        chunks
    }
}

fn emit(source: &SourceText, span: Span, comments: Vec<String>, filename: &str, filepath: &str) -> Chunk {
    Chunk {
        kind: span.kind,
        name: span.name,
        code: source.text()[span.start..span.end].to_string(),
        comments,
        filename: filename.to_string(),
        filepath: filepath.to_string(),
        line_start: source.line_of(span.start),
        line_end: source.last_line_of(span.start, span.end),
        incomplete: span.incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::error::ParseError;
    use crate::parser::ChunkKind;

    fn parse(code: &str) -> Vec<Chunk> {
        SasParser::new().parse(Path::new("programs/dm.sas"), code)
    }

    #[test]
    fn test_parse_macro() {
        let code = "%macro init;\n  %let x = 1;\n%mend init;";
        let chunks = parse(code);
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.kind, ChunkKind::Macro);
        assert_eq!(chunk.name.as_deref(), Some("init"));
        assert_eq!(chunk.line_start, 1);
        assert_eq!(chunk.line_end, 3);
        assert_eq!(chunk.code, code);
        assert!(chunk.comments.is_empty());
        assert_eq!(chunk.filename, "dm.sas");
        assert_eq!(chunk.filepath, "programs/dm.sas");
    }

    #[test]
    fn test_parse_documented_data_step() {
        let code = "/* builds DM domain */\ndata dm;\n  set raw.dm;\nrun;";
        let chunks = parse(code);
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.kind, ChunkKind::DataStep);
        assert_eq!(chunk.name.as_deref(), Some("dm"));
        assert_eq!(chunk.comments, vec!["builds DM domain"]);
        assert_eq!(chunk.line_start, 2);
        assert_eq!(chunk.line_end, 4);
        assert_eq!(chunk.code, "data dm;\n  set raw.dm;\nrun;");
    }

    #[test]
    fn test_nested_macro_lines() {
        let code = "%macro outer;\n  %macro inner;\n    %put x;\n  %mend inner;\n%mend outer;\n";
        let chunks = parse(code);
        assert_eq!(chunks.len(), 2);
        let (inner, outer) = (&chunks[0], &chunks[1]);
        assert_eq!(inner.name.as_deref(), Some("inner"));
        assert_eq!((inner.line_start, inner.line_end), (2, 4));
        assert_eq!((outer.line_start, outer.line_end), (1, 5));
        assert!(outer.line_start < inner.line_start && inner.line_end < outer.line_end);
    }

    #[test]
    fn test_keyword_in_string_only() {
        assert!(parse("title \"data dm; run;\";\n").is_empty());
        assert!(parse("'%macro x;'").is_empty());
    }

    #[test]
    fn test_unterminated_block() {
        let code = "options nocenter;\ndata ae;\n  set raw.ae;\n\n";
        let chunks = parse(code);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].incomplete);
        assert_eq!(chunks[0].line_start, 2);
        assert_eq!(chunks[0].line_end, 4);
        assert_eq!(chunks[0].line_end, SourceText::new(code).line_count());
    }

    #[test]
    fn test_chunks_do_not_overlap() {
        let code = "data a; x=1; run; data b; y=2; run;\nproc print data=b; run;\n\
                    %macro m; %put; %mend m;\nproc sql; select 1 from x; quit;";
        let chunks = parse(code);
        assert_eq!(chunks.len(), 5);
        let source = SourceText::new(code);
        let mut spans: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| {
                let start = code.find(&c.code).unwrap();
                (start, start + c.code.len())
            })
            .collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
        assert!(chunks.iter().all(|c| c.line_start <= c.line_end));
        assert!(chunks.iter().all(|c| c.line_end <= source.line_count()));
    }

    #[test]
    fn test_steps_after_macro_calls_without_semicolon() {
        let chunks = parse("%setup\ndata dm;\n  set raw.dm;\nrun;\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::DataStep);
        assert_eq!(chunks[0].name.as_deref(), Some("dm"));
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (2, 4));

        let chunks = parse("%setup(study=1)\nproc print data=x;\nrun;\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::ProcBlock);
        assert_eq!(chunks[0].name.as_deref(), Some("print:x"));
        assert_eq!(chunks[0].code, "proc print data=x;\nrun;");
    }

    #[test]
    fn test_crlf_input() {
        let chunks = parse("data a;\r\n  x = 1;\r\nrun;\r\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].code, "data a;\n  x = 1;\nrun;");
        assert_eq!(chunks[0].line_end, 3);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let code = "/* doc */\n%macro a;\n%mend;\n* doc b;\ndata b;\nrun;";
        assert_eq!(parse(code), parse(code));
    }

    #[test]
    fn test_unreadable_bytes() {
        let err = SasParser::new()
            .parse_bytes(Path::new("bad.sas"), &[0xc3, 0x28])
            .unwrap_err();
        assert!(matches!(err, ParseError::UnreadableSource { .. }));
    }

    #[test]
    fn test_is_sas_file() {
        assert!(SasParser::is_sas_file(Path::new("a/b/ADSL.SAS")));
        assert!(!SasParser::is_sas_file(Path::new("a/b/adsl.log")));
    }
}
