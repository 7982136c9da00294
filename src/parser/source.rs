use super::error::{ParseError, Result};

const UTF8_BOM: &str = "\u{feff}";

/// Normalized text of one source file plus its line index
#[derive(Debug, Clone)]
pub struct SourceText {
    text: String,
    lines: LineIndex,
}

impl SourceText {
    /// Decode raw bytes, strip a BOM and fold `\r\n` / `\r` into `\n`.
    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self> {
        let decoded =
            std::str::from_utf8(bytes).map_err(|e| ParseError::unreadable(path, e))?;
        Ok(Self::new(decoded))
    }

    pub fn new(raw: &str) -> Self {
        let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
        let text = if raw.contains('\r') {
            raw.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            raw.to_string()
        };
        let lines = LineIndex::new(&text);
        Self { text, lines }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 1-based line containing byte `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.lines.line_of(offset)
    }

    /// 1-based line of the last byte in `start..end`, i.e. the inclusive end
    /// line of a half-open byte span.
    pub fn last_line_of(&self, start: usize, end: usize) -> usize {
        self.lines.line_of(end.max(start + 1) - 1)
    }

    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }
}

/// Monotonic table of line start offsets
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            starts,
            len: text.len(),
        }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset).max(1)
    }

    /// Number of lines, counted the way `str::lines` does: a trailing newline
    /// does not open a new line.
    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            return 0;
        }
        self.line_of(self.len - 1)
    }
}
