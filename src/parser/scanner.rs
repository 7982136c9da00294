//! Single-pass lexical scanner for SAS source.
//!
//! The scanner is the only component that knows whether a keyword-shaped
//! word is structural: keywords are reported only while the quote context is
//! plain code. Text inside string literals, comments and in-stream data
//! lines never produces a [`LexEvent::Keyword`].

use std::ops::Range;

/// Structural keywords recognized by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `%macro`
    MacroOpen,
    /// `%mend`
    MacroClose,
    /// `data` at statement start
    DataOpen,
    /// `proc` at statement start
    ProcOpen,
    /// `run` or `quit` at statement start
    StepClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `/* ... */`
    Block,
    /// `* ... ;` at statement start
    Statement,
    /// `%* ... ;`
    Macro,
}

impl CommentStyle {
    fn opener_len(self) -> usize {
        match self {
            CommentStyle::Block | CommentStyle::Macro => 2,
            CommentStyle::Statement => 1,
        }
    }
}

/// A comment found in code context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRegion {
    pub style: CommentStyle,
    /// Whole region including delimiters
    pub span: Range<usize>,
    /// Comment text without delimiters
    pub content: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexEvent {
    Keyword {
        keyword: Keyword,
        start: usize,
        end: usize,
    },
    Comment(CommentRegion),
    Quote {
        start: usize,
        end: usize,
    },
    /// In-stream data following `datalines;` / `cards;`
    RawData {
        start: usize,
        end: usize,
    },
    /// A `;` in code context
    Terminator {
        offset: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteContext {
    None,
    SingleQuoted,
    DoubleQuoted,
    Comment(CommentStyle),
    RawData { four: bool },
}

/// Lazy, forward-only stream of [`LexEvent`]s over normalized text.
pub struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    context: QuoteContext,
    region_start: usize,
    statement_start: bool,
    /// Set after a `datalines`-style word; the next `;` starts raw data
    pending_raw: Option<bool>,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            context: QuoteContext::None,
            region_start: 0,
            statement_start: true,
            pending_raw: None,
        }
    }

    fn open_region(&mut self, context: QuoteContext, start: usize, opener_len: usize) {
        self.context = context;
        self.region_start = start;
        self.pos = start + opener_len;
    }

    fn interrupt_statement(&mut self) {
        self.statement_start = false;
        self.pending_raw = None;
    }

    fn scan_code(&mut self) -> Option<LexEvent> {
        let start = self.pos;
        let b = self.bytes[start];
        let next = self.bytes.get(start + 1).copied();

        match b {
            b if b.is_ascii_whitespace() => {
                self.pos += 1;
                None
            }
            b';' => {
                self.pos += 1;
                self.statement_start = true;
                if let Some(four) = self.pending_raw.take() {
                    self.open_region(QuoteContext::RawData { four }, self.pos, 0);
                }
                Some(LexEvent::Terminator { offset: start })
            }
            b'/' if next == Some(b'*') => {
                self.open_region(QuoteContext::Comment(CommentStyle::Block), start, 2);
                None
            }
            b'%' if next == Some(b'*') => {
                self.open_region(QuoteContext::Comment(CommentStyle::Macro), start, 2);
                None
            }
            b'*' if self.statement_start => {
                self.open_region(QuoteContext::Comment(CommentStyle::Statement), start, 1);
                None
            }
            b'\'' => {
                self.interrupt_statement();
                self.open_region(QuoteContext::SingleQuoted, start, 1);
                None
            }
            b'"' => {
                self.interrupt_statement();
                self.open_region(QuoteContext::DoubleQuoted, start, 1);
                None
            }
            b'%' => self.scan_macro_word(start),
            b if is_word_byte(b) => self.scan_word(start),
            _ => {
                self.pos += 1;
                self.interrupt_statement();
                None
            }
        }
    }

    fn scan_word(&mut self, start: usize) -> Option<LexEvent> {
        let end = word_end(self.bytes, start);
        self.pos = end;
        let at_statement_start = self.statement_start;
        self.interrupt_statement();
        if !at_statement_start {
            return None;
        }

        let word = &self.bytes[start..end];
        let keyword = if word.eq_ignore_ascii_case(b"data") {
            Keyword::DataOpen
        } else if word.eq_ignore_ascii_case(b"proc") {
            Keyword::ProcOpen
        } else if word.eq_ignore_ascii_case(b"run") || word.eq_ignore_ascii_case(b"quit") {
            Keyword::StepClose
        } else {
            self.pending_raw = raw_data_marker(word);
            return None;
        };
        Some(LexEvent::Keyword {
            keyword,
            start,
            end,
        })
    }

    fn scan_macro_word(&mut self, start: usize) -> Option<LexEvent> {
        let word_start = start + 1;
        let end = word_end(self.bytes, word_start);
        self.pos = end.max(word_start);
        let at_statement_start = self.statement_start;
        self.interrupt_statement();

        let glued = start > 0 && is_word_byte(self.bytes[start - 1]);
        if glued || end == word_start {
            return None;
        }
        let word = &self.bytes[word_start..end];
        let keyword = if word.eq_ignore_ascii_case(b"macro") {
            Keyword::MacroOpen
        } else if word.eq_ignore_ascii_case(b"mend") {
            Keyword::MacroClose
        } else {
            if at_statement_start && !is_macro_statement(word) {
                self.finish_macro_call(end);
            }
            return None;
        };
        Some(LexEvent::Keyword {
            keyword,
            start,
            end,
        })
    }

    /// A macro call used as a statement (`%setup`, `%load(dm)`) needs no `;`.
    /// Its statement ends with the call when a line break, a comment, another
    /// macro or a step keyword follows.
    fn finish_macro_call(&mut self, name_end: usize) {
        let after_name = skip_blanks(self.bytes, name_end);
        let call_end = if self.bytes.get(after_name) == Some(&b'(') {
            match arguments_end(self.bytes, after_name) {
                Some(end) => end,
                None => return,
            }
        } else {
            name_end
        };
        self.pos = call_end;
        self.statement_start = statement_follows(self.bytes, call_end);
    }

    fn scan_quoted(&mut self, quote: u8) -> Option<LexEvent> {
        let Some(idx) = find_byte(self.bytes, self.pos, quote) else {
            self.pos = self.bytes.len();
            return None;
        };
        // Doubled quote is an escaped quote character
        if self.bytes.get(idx + 1) == Some(&quote) {
            self.pos = idx + 2;
            return None;
        }
        self.pos = idx + 1;
        self.context = QuoteContext::None;
        Some(LexEvent::Quote {
            start: self.region_start,
            end: self.pos,
        })
    }

    fn scan_comment(&mut self, style: CommentStyle) -> Option<LexEvent> {
        let (close, close_len) = match style {
            CommentStyle::Block => (find_seq(self.bytes, self.pos, b"*/"), 2),
            CommentStyle::Statement | CommentStyle::Macro => {
                (find_byte(self.bytes, self.pos, b';'), 1)
            }
        };
        let Some(idx) = close else {
            self.pos = self.bytes.len();
            return None;
        };
        self.pos = idx + close_len;
        self.context = QuoteContext::None;
        Some(LexEvent::Comment(CommentRegion {
            style,
            span: self.region_start..self.pos,
            content: self.region_start + style.opener_len()..idx,
        }))
    }

    fn scan_raw_data(&mut self, four: bool) -> Option<LexEvent> {
        let close = if four {
            find_seq(self.bytes, self.pos, b";;;;")
        } else {
            find_byte(self.bytes, self.pos, b';')
        };
        let Some(idx) = close else {
            self.pos = self.bytes.len();
            return None;
        };
        // The closing `;` is handed back to code context as a terminator
        self.pos = idx;
        self.context = QuoteContext::None;
        Some(LexEvent::RawData {
            start: self.region_start,
            end: idx,
        })
    }

    /// Closes whatever region is still open when input runs out.
    fn close_at_eof(&mut self) -> Option<LexEvent> {
        let len = self.bytes.len();
        let context = std::mem::replace(&mut self.context, QuoteContext::None);
        let start = self.region_start;
        match context {
            QuoteContext::None => None,
            QuoteContext::SingleQuoted | QuoteContext::DoubleQuoted => {
                Some(LexEvent::Quote { start, end: len })
            }
            QuoteContext::Comment(style) => Some(LexEvent::Comment(CommentRegion {
                style,
                span: start..len,
                content: (start + style.opener_len()).min(len)..len,
            })),
            QuoteContext::RawData { .. } => Some(LexEvent::RawData { start, end: len }),
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = LexEvent;

    fn next(&mut self) -> Option<LexEvent> {
        loop {
            if self.pos >= self.bytes.len() {
                return self.close_at_eof();
            }
            let event = match self.context {
                QuoteContext::None => self.scan_code(),
                QuoteContext::SingleQuoted => self.scan_quoted(b'\''),
                QuoteContext::DoubleQuoted => self.scan_quoted(b'"'),
                QuoteContext::Comment(style) => self.scan_comment(style),
                QuoteContext::RawData { four } => self.scan_raw_data(four),
            };
            if event.is_some() {
                return event;
            }
        }
    }
}

pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_end(bytes: &[u8], start: usize) -> usize {
    start
        + bytes[start..]
            .iter()
            .take_while(|b| is_word_byte(**b))
            .count()
}

/// Macro language statements; these end with `;`, unlike macro calls.
fn is_macro_statement(word: &[u8]) -> bool {
    const STATEMENTS: [&[u8]; 30] = [
        b"abort", b"by", b"copy", b"display", b"do", b"else", b"end", b"global", b"goto",
        b"if", b"inc", b"include", b"input", b"label", b"let", b"local", b"put", b"return",
        b"symdel", b"syscall", b"sysexec", b"syslput", b"sysmacdelete", b"sysmstoreclear",
        b"sysrput", b"then", b"to", b"until", b"while", b"window",
    ];
    STATEMENTS.iter().any(|s| word.eq_ignore_ascii_case(s))
}

fn skip_blanks(bytes: &[u8], from: usize) -> usize {
    from + bytes
        .get(from..)
        .map_or(0, |rest| rest.iter().take_while(|b| **b == b' ' || **b == b'\t').count())
}

/// End of a balanced `( ... )` argument list opening at `open`, quotes respected.
/// `None` when the list is unbalanced or a bare `;` shows up first.
fn arguments_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            quote @ (b'\'' | b'"') => i = find_byte(bytes, i + 1, quote)?,
            b';' => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Whether a new statement may begin at `from`, right after a macro call.
fn statement_follows(bytes: &[u8], from: usize) -> bool {
    let next = skip_blanks(bytes, from);
    match bytes.get(next) {
        None | Some(b'\n') | Some(b'%') => true,
        Some(b'/') => bytes.get(next + 1) == Some(&b'*'),
        Some(b) if is_word_byte(*b) => {
            let word = &bytes[next..word_end(bytes, next)];
            [&b"data"[..], b"proc", b"run", b"quit"]
                .iter()
                .any(|k| word.eq_ignore_ascii_case(k))
        }
        Some(_) => false,
    }
}

fn raw_data_marker(word: &[u8]) -> Option<bool> {
    const PLAIN: [&[u8]; 3] = [b"datalines", b"cards", b"lines"];
    const FOUR: [&[u8]; 3] = [b"datalines4", b"cards4", b"lines4"];
    if PLAIN.iter().any(|m| word.eq_ignore_ascii_case(m)) {
        Some(false)
    } else if FOUR.iter().any(|m| word.eq_ignore_ascii_case(m)) {
        Some(true)
    } else {
        None
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|b| *b == needle)
        .map(|i| from + i)
}

fn find_seq(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(text: &str) -> Vec<(Keyword, &str)> {
        Scanner::new(text)
            .filter_map(|event| match event {
                LexEvent::Keyword {
                    keyword,
                    start,
                    end,
                } => Some((keyword, &text[start..end])),
                _ => None,
            })
            .collect()
    }

    fn comments(text: &str) -> Vec<(CommentStyle, &str)> {
        Scanner::new(text)
            .filter_map(|event| match event {
                LexEvent::Comment(region) => Some((region.style, &text[region.content])),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_structural_keywords() {
        let text = "%MACRO a; data x; set y; run; proc print; quit; %mend;";
        assert_eq!(
            keywords(text),
            vec![
                (Keyword::MacroOpen, "%MACRO"),
                (Keyword::DataOpen, "data"),
                (Keyword::StepClose, "run"),
                (Keyword::ProcOpen, "proc"),
                (Keyword::StepClose, "quit"),
                (Keyword::MacroClose, "%mend"),
            ]
        );
    }

    #[test]
    fn test_keywords_inside_literals_are_content() {
        let text = r#"x = "data a; run;"; y = '%macro z; it''s %mend'; put 'proc';"#;
        assert!(keywords(text).is_empty());
    }

    #[test]
    fn test_doubled_quotes_do_not_end_literal() {
        let text = "t = 'it''s; data'; z = 1;";
        let quotes: Vec<_> = Scanner::new(text)
            .filter_map(|e| match e {
                LexEvent::Quote { start, end } => Some(&text[start..end]),
                _ => None,
            })
            .collect();
        assert_eq!(quotes, vec!["'it''s; data'"]);
        let terminators = Scanner::new(text)
            .filter(|e| matches!(e, LexEvent::Terminator { .. }))
            .count();
        assert_eq!(terminators, 2);
    }

    #[test]
    fn test_keywords_only_at_statement_start() {
        let text = "proc sort data=raw out=sorted; by id; run;";
        assert_eq!(
            keywords(text),
            vec![(Keyword::ProcOpen, "proc"), (Keyword::StepClose, "run")]
        );
        assert!(keywords("%put data run quit;").is_empty());
    }

    #[test]
    fn test_comment_forms() {
        let text = "/* block */\n* statement comment;\n%* macro comment;\nx = a * b;";
        assert_eq!(
            comments(text),
            vec![
                (CommentStyle::Block, " block "),
                (CommentStyle::Statement, " statement comment"),
                (CommentStyle::Macro, " macro comment"),
            ]
        );
    }

    #[test]
    fn test_comment_hides_keywords() {
        assert!(keywords("/* data x; run; */").is_empty());
        assert!(keywords("* proc print; \n").is_empty());
    }

    #[test]
    fn test_keyword_after_comment_keeps_statement_start() {
        let text = "run; /* note */ data a;";
        assert_eq!(
            keywords(text),
            vec![(Keyword::StepClose, "run"), (Keyword::DataOpen, "data")]
        );
    }

    #[test]
    fn test_unterminated_regions_run_to_end() {
        let text = "x = 'open data";
        let events: Vec<_> = Scanner::new(text).collect();
        assert_eq!(
            events.last(),
            Some(&LexEvent::Quote {
                start: 4,
                end: text.len()
            })
        );
        assert_eq!(comments("/* never closed"), vec![(CommentStyle::Block, " never closed")]);
    }

    #[test]
    fn test_datalines_are_raw_data() {
        let text = "data names;\ninput n $;\ndatalines;\nO'Brien\nrun\n;\nrun;";
        let kws = keywords(text);
        assert_eq!(kws, vec![(Keyword::DataOpen, "data"), (Keyword::StepClose, "run")]);
        let raw: Vec<_> = Scanner::new(text)
            .filter_map(|e| match e {
                LexEvent::RawData { start, end } => Some(&text[start..end]),
                _ => None,
            })
            .collect();
        assert_eq!(raw, vec!["\nO'Brien\nrun\n"]);
    }

    #[test]
    fn test_macro_call_without_semicolon_ends_statement() {
        assert_eq!(
            keywords("%setup\ndata dm;\nrun;"),
            vec![(Keyword::DataOpen, "data"), (Keyword::StepClose, "run")]
        );
        assert_eq!(
            keywords("%load(study=1, title='a)b')\nproc print;\nrun;"),
            vec![(Keyword::ProcOpen, "proc"), (Keyword::StepClose, "run")]
        );
        assert_eq!(
            keywords("data a;\n  set b;\n  %derive(x) run;"),
            vec![(Keyword::DataOpen, "data"), (Keyword::StepClose, "run")]
        );
        assert_eq!(
            keywords("%init %setup /* go */\ndata a; run;"),
            vec![(Keyword::DataOpen, "data"), (Keyword::StepClose, "run")]
        );
    }

    #[test]
    fn test_macro_statements_still_need_semicolon() {
        assert!(keywords("%put data\nrun;").is_empty());
        assert!(keywords("%let x = data\nproc;").is_empty());
        assert!(keywords("x = %upcase(a)\ndata").is_empty());
        assert!(keywords("%setup x = 1\ndata").is_empty());
    }

    #[test]
    fn test_unbalanced_macro_arguments_are_not_a_call() {
        assert_eq!(
            keywords("%setup(a\ndata x; run;"),
            vec![(Keyword::StepClose, "run")]
        );
    }

    #[test]
    fn test_glued_percent_is_not_a_macro_keyword() {
        assert!(keywords("x%macro").is_empty());
        assert!(keywords("%macros;").is_empty());
    }
}
