use super::scanner::{is_word_byte, CommentRegion, Keyword, LexEvent, Scanner};
use super::ChunkKind;

/// A recognized block, in byte offsets over the normalized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub start: usize,
    pub end: usize,
    /// Nesting depth when the block opened; top-level blocks are depth 1
    pub depth: usize,
    pub incomplete: bool,
}

/// Everything the extractor learned from one file
#[derive(Debug, Default)]
pub struct Extraction {
    /// Spans in close order: inner macros precede the macro enclosing them
    pub spans: Vec<Span>,
    /// Every comment region seen in code context, in file order
    pub comments: Vec<CommentRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InMacro(usize),
    InDataStep,
    InProcBlock,
}

#[derive(Debug)]
struct OpenSpan {
    kind: ChunkKind,
    name: Option<String>,
    start: usize,
    depth: usize,
    /// Start of the opening statement's text, until its `;` is seen
    header_from: Option<usize>,
    /// Close keyword seen; the span ends at the next `;`
    closing: bool,
}

/// State machine recognizing macros, DATA steps and PROC blocks
pub struct BlockExtractor<'a> {
    text: &'a str,
    stack: Vec<OpenSpan>,
    extraction: Extraction,
}

impl<'a> BlockExtractor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            stack: Vec::new(),
            extraction: Extraction::default(),
        }
    }

    /// Scan and extract in a single pass.
    pub fn extract(text: &'a str) -> Extraction {
        let mut extractor = Self::new(text);
        for event in Scanner::new(text) {
            extractor.feed(event);
        }
        extractor.finish()
    }

    fn state(&self) -> State {
        match self.stack.last() {
            None => State::Idle,
            Some(top) => match top.kind {
                ChunkKind::Macro => State::InMacro(self.stack.len()),
                ChunkKind::DataStep => State::InDataStep,
                ChunkKind::ProcBlock => State::InProcBlock,
            },
        }
    }

    pub fn feed(&mut self, event: LexEvent) {
        match event {
            LexEvent::Keyword {
                keyword,
                start,
                end,
            } => self.on_keyword(keyword, start, end),
            LexEvent::Terminator { offset } => self.on_terminator(offset),
            LexEvent::Comment(region) => self.extraction.comments.push(region),
            LexEvent::Quote { .. } | LexEvent::RawData { .. } => {}
        }
    }

    fn on_keyword(&mut self, keyword: Keyword, start: usize, end: usize) {
        if self.stack.last().is_some_and(|top| top.closing) {
            return;
        }
        match (self.state(), keyword) {
            (State::Idle | State::InMacro(_), Keyword::MacroOpen) => {
                let name = identifier_after(self.text, end);
                self.open(ChunkKind::Macro, name, start, None);
            }
            (State::Idle, Keyword::DataOpen) => {
                self.open(ChunkKind::DataStep, None, start, Some(end));
            }
            (State::Idle, Keyword::ProcOpen) => {
                self.open(ChunkKind::ProcBlock, None, start, Some(end));
            }
            (State::InMacro(_), Keyword::MacroClose)
            | (State::InDataStep | State::InProcBlock, Keyword::StepClose) => {
                if let Some(top) = self.stack.last_mut() {
                    top.closing = true;
                }
            }
            (state, keyword) => {
                tracing::trace!("Ignoring {:?} at offset {} in state {:?}", keyword, start, state);
            }
        }
    }

    fn open(&mut self, kind: ChunkKind, name: Option<String>, start: usize, header_from: Option<usize>) {
        self.stack.push(OpenSpan {
            kind,
            name,
            start,
            depth: self.stack.len() + 1,
            header_from,
            closing: false,
        });
    }

    fn on_terminator(&mut self, offset: usize) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let header_from = top.header_from.take();
        let closing = top.closing;
        if let Some(from) = header_from {
            self.name_from_header(from, offset);
        }
        if closing {
            self.close(offset + 1, false);
        }
    }

    fn name_from_header(&mut self, from: usize, to: usize) {
        let header = self.header_text(from, to);
        if let Some(top) = self.stack.last_mut() {
            top.name = header_name(top.kind, &header);
        }
    }

    /// Statement text in `from..to` with comments replaced by a space.
    fn header_text(&self, from: usize, to: usize) -> String {
        let mut header = String::with_capacity(to - from);
        let mut pos = from;
        for comment in self
            .extraction
            .comments
            .iter()
            .filter(|c| c.span.start >= from && c.span.start < to)
        {
            header.push_str(&self.text[pos..comment.span.start]);
            header.push(' ');
            pos = comment.span.end.min(to);
        }
        header.push_str(&self.text[pos..to]);
        header
    }

    fn close(&mut self, end: usize, incomplete: bool) {
        if let Some(open) = self.stack.pop() {
            self.extraction.spans.push(Span {
                kind: open.kind,
                name: open.name,
                start: open.start,
                end,
                depth: open.depth,
                incomplete,
            });
        }
    }

    /// Flush spans still open at end of input, innermost first.
    pub fn finish(mut self) -> Extraction {
        let len = self.text.len();
        while let Some(top) = self.stack.last_mut() {
            let header_from = top.header_from.take();
            let incomplete = !top.closing;
            if incomplete {
                tracing::debug!(
                    "Unterminated {} block opened at offset {}",
                    top.kind,
                    top.start
                );
            }
            if let Some(from) = header_from {
                self.name_from_header(from, len);
            }
            self.close(len, incomplete);
        }
        self.extraction
    }
}

/// Identifier directly following a keyword, skipping whitespace.
fn identifier_after(text: &str, from: usize) -> Option<String> {
    let rest = text[from..].trim_start();
    let end = rest
        .bytes()
        .take_while(|b| is_word_byte(*b))
        .count();
    let word = &rest[..end];
    is_identifier(word).then(|| word.to_string())
}

fn header_name(kind: ChunkKind, header: &str) -> Option<String> {
    match kind {
        ChunkKind::DataStep => data_step_name(header),
        ChunkKind::ProcBlock => proc_name(header),
        ChunkKind::Macro => None,
    }
}

/// `data a b(keep=x) lib.c / view=v;` names `a b lib.c`.
fn data_step_name(header: &str) -> Option<String> {
    let mut members = String::new();
    let mut depth = 0usize;
    for c in header.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => break,
            _ if depth == 0 => members.push(c),
            _ => {}
        }
    }

    let names: Vec<&str> = members.split_whitespace().collect();
    if names.is_empty() || !names.iter().all(|n| is_dataset_name(n)) {
        return None;
    }
    Some(names.join(" "))
}

/// `proc sort data=raw out=sorted;` names `sort:sorted`.
fn proc_name(header: &str) -> Option<String> {
    let procedure = identifier_after(header, 0)?;
    let dataset = option_value(header, "out").or_else(|| option_value(header, "data"));
    Some(match dataset {
        Some(dataset) => format!("{}:{}", procedure, dataset),
        None => procedure,
    })
}

/// Value of a `key=value` statement option, matched case-insensitively.
fn option_value(header: &str, key: &str) -> Option<String> {
    let bytes = header.as_bytes();
    let mut from = 0;
    while let Some(found) = find_word_ci(bytes, from, key.as_bytes()) {
        from = found + key.len();
        let rest = header[from..].trim_start();
        if let Some(value) = rest.strip_prefix('=') {
            let value = value.trim_start();
            let end = value
                .bytes()
                .take_while(|b| is_word_byte(*b) || *b == b'.')
                .count();
            let value = &value[..end];
            if is_dataset_name(value) {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn find_word_ci(bytes: &[u8], from: usize, word: &[u8]) -> Option<usize> {
    (from..bytes.len().saturating_sub(word.len() - 1)).find(|&i| {
        bytes[i..i + word.len()].eq_ignore_ascii_case(word)
            && (i == 0 || !is_word_byte(bytes[i - 1]))
            && bytes.get(i + word.len()).map_or(true, |b| !is_word_byte(*b))
    })
}

fn is_identifier(word: &str) -> bool {
    let mut bytes = word.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() || first == b'_' => bytes.all(is_word_byte),
        _ => false,
    }
}

fn is_dataset_name(token: &str) -> bool {
    match token.split_once('.') {
        Some((libref, member)) => is_identifier(libref) && is_identifier(member),
        None => is_identifier(token),
    }
}
