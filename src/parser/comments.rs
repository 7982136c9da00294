use super::extractor::Span;
use super::scanner::CommentRegion;

/// Attaches documentation comments to spans.
///
/// A span first claims the run of comments directly above its opening
/// keyword, back to the previous sibling (or the opening of the enclosing
/// macro). Spans left without documentation then take one trailing comment
/// after their close. Each comment is claimed at most once.
pub struct CommentAssociator<'a> {
    text: &'a str,
    comments: &'a [CommentRegion],
    consumed: Vec<bool>,
}

impl<'a> CommentAssociator<'a> {
    pub fn new(text: &'a str, comments: &'a [CommentRegion]) -> Self {
        Self {
            text,
            comments,
            consumed: vec![false; comments.len()],
        }
    }

    /// Comments for each span, indexed like `spans`.
    pub fn associate(mut self, spans: &[Span]) -> Vec<Vec<String>> {
        let mut order: Vec<usize> = (0..spans.len()).collect();
        order.sort_by_key(|&i| (spans[i].start, spans[i].depth));

        let mut claimed: Vec<Vec<usize>> = vec![Vec::new(); spans.len()];
        for &i in &order {
            let lower = preceding_bound(spans, i);
            claimed[i] = self.claim_preceding(lower, spans[i].start);
        }
        for &i in &order {
            if claimed[i].is_empty() {
                let upper = following_bound(spans, i, self.text.len());
                claimed[i].extend(self.claim_trailing(spans[i].end, upper));
            }
        }

        claimed
            .into_iter()
            .map(|indices| {
                indices
                    .into_iter()
                    .map(|c| self.text[self.comments[c].content.clone()].trim())
                    .filter(|content| !content.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    fn claim_preceding(&mut self, lower: usize, open: usize) -> Vec<usize> {
        let mut cursor = open;
        let mut taken = Vec::new();
        for (c, region) in self.comments.iter().enumerate().rev() {
            if region.span.end > open {
                continue;
            }
            if region.span.start < lower || self.consumed[c] {
                break;
            }
            if !is_blank(&self.text[region.span.end..cursor]) {
                break;
            }
            self.consumed[c] = true;
            taken.push(c);
            cursor = region.span.start;
        }
        taken.reverse();
        taken
    }

    fn claim_trailing(&mut self, close: usize, upper: usize) -> Option<usize> {
        let c = self
            .comments
            .iter()
            .position(|region| region.span.start >= close)?;
        let region = &self.comments[c];
        if self.consumed[c] || region.span.end > upper || !is_blank(&self.text[close..region.span.start]) {
            return None;
        }
        self.consumed[c] = true;
        Some(c)
    }
}

/// Latest point before span `i` that its documentation may not cross.
fn preceding_bound(spans: &[Span], i: usize) -> usize {
    let current = &spans[i];
    spans
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .filter_map(|(_, other)| {
            if other.end <= current.start {
                Some(other.end)
            } else if other.start < current.start && other.end >= current.end {
                Some(other.start)
            } else {
                None
            }
        })
        .max()
        .unwrap_or(0)
}

/// Earliest point after span `i` that a trailing comment may not cross.
fn following_bound(spans: &[Span], i: usize, len: usize) -> usize {
    let current = &spans[i];
    spans
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .filter_map(|(_, other)| {
            if other.start >= current.end {
                Some(other.start)
            } else if other.start < current.start && other.end >= current.end {
                Some(other.end)
            } else {
                None
            }
        })
        .min()
        .unwrap_or(len)
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extractor::BlockExtractor;

    fn associate(text: &str) -> Vec<Vec<String>> {
        let extraction = BlockExtractor::extract(text);
        CommentAssociator::new(text, &extraction.comments).associate(&extraction.spans)
    }

    #[test]
    fn test_preceding_comment_run() {
        let text = "/* first */\n\n* second;\ndata a;\nrun;";
        assert_eq!(associate(text), vec![vec!["first", "second"]]);
    }

    #[test]
    fn test_code_breaks_contiguity() {
        let text = "/* orphan */\noptions nocenter;\ndata a;\nrun;";
        assert_eq!(associate(text), vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_trailing_comment_fallback() {
        let text = "data a;\nrun; /* builds a */\n\noptions ls=80;";
        assert_eq!(associate(text), vec![vec!["builds a"]]);
    }

    #[test]
    fn test_trailing_comment_after_code_is_not_claimed() {
        assert_eq!(associate("data a; run; x=1; /* c */"), vec![Vec::<String>::new()]);
        assert_eq!(
            associate("data a;\nrun;\noptions ls=80;\n/* c */"),
            vec![Vec::<String>::new()]
        );
    }

    #[test]
    fn test_following_block_doc_is_not_stolen() {
        let text = "data a;\nrun;\n\n/* docs for b */\ndata b;\nrun;";
        assert_eq!(associate(text), vec![vec![], vec!["docs for b"]]);
    }

    #[test]
    fn test_comment_claimed_once() {
        let text = "data a;\nrun;\n/* shared */\n%macro m;\n%mend m;";
        let comments = associate(text);
        let total: usize = comments.iter().map(Vec::len).sum();
        assert_eq!(total, 1);
        assert_eq!(comments[1], vec!["shared"]);
    }

    #[test]
    fn test_nested_macro_doc_stays_with_inner() {
        let text = "/* outer doc */\n%macro outer;\n/* inner doc */\n%macro inner;\n%mend inner;\n%mend outer;";
        // spans are in close order: inner, outer
        assert_eq!(associate(text), vec![vec!["inner doc"], vec!["outer doc"]]);
    }

    #[test]
    fn test_comments_inside_code_are_not_documentation() {
        let text = "data a;\n/* inside */\nrun;";
        assert_eq!(associate(text), vec![Vec::<String>::new()]);
    }
}
