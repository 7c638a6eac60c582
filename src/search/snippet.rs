//! Snippet windowing over index-highlighted field text.
//!
//! The index marks matched spans with two private-use sentinels (FTS5
//! `highlight()` output, so stemming and phrase matching come from the index's
//! own position data). This module strips the sentinels, splits the field into
//! index tokens, keeps a fixed token window around the first match, clips
//! oversized runs inside it and renders it with the configured delimiters and
//! ellipsis.

use crate::search::index::is_token_char;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Start-of-match sentinel passed to `highlight()`.
pub const MATCH_START: char = '\u{E000}';
/// End-of-match sentinel passed to `highlight()`.
pub const MATCH_END: char = '\u{E001}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetConfig {
    /// Window size in tokens.
    pub tokens: usize,
    pub open: String,
    pub close: String,
    pub ellipsis: String,
}

impl Default for SnippetConfig {
    fn default() -> Self {
        Self {
            tokens: 32,
            open: "<mark>".to_string(),
            close: "</mark>".to_string(),
            ellipsis: "...".to_string(),
        }
    }
}

struct Marked {
    text: String,
    matches: Vec<Range<usize>>,
}

/// Remove sentinels, recording byte ranges of matched spans in the clean text.
/// Stray or unbalanced sentinels are tolerated.
fn strip_markers(highlighted: &str) -> Marked {
    let mut text = String::with_capacity(highlighted.len());
    let mut matches = Vec::new();
    let mut open: Option<usize> = None;

    for c in highlighted.chars() {
        match c {
            MATCH_START => {
                if open.is_none() {
                    open = Some(text.len());
                }
            }
            MATCH_END => {
                if let Some(start) = open.take()
                    && start < text.len()
                {
                    matches.push(start..text.len());
                }
            }
            other => text.push(other),
        }
    }
    if let Some(start) = open
        && start < text.len()
    {
        matches.push(start..text.len());
    }

    Marked { text, matches }
}

/// Byte spans of maximal token-character runs, mirroring the unicode61 tokenizer.
fn token_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if is_token_char(c) {
            current.get_or_insert(i);
        } else if let Some(start) = current.take() {
            spans.push(start..i);
        }
    }
    if let Some(start) = current {
        spans.push(start..text.len());
    }
    spans
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn render(text: &str, window: Range<usize>, matches: &[Range<usize>], cfg: &SnippetConfig) -> String {
    let mut out = String::with_capacity(window.len() + 16);
    let mut cursor = window.start;

    for m in matches {
        let start = m.start.max(window.start);
        let end = m.end.min(window.end);
        if start >= end || start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&cfg.open);
        out.push_str(&text[start..end]);
        out.push_str(&cfg.close);
        cursor = end;
    }
    out.push_str(&text[cursor..window.end]);
    out
}

/// Longest run of separator text kept verbatim between or around tokens.
const MAX_GAP_CHARS: usize = 16;
/// Longest single token kept verbatim.
const MAX_TOKEN_CHARS: usize = 64;

/// Byte offset `n` chars into `range`, or its end.
fn advance(text: &str, range: &Range<usize>, n: usize) -> usize {
    text[range.clone()]
        .char_indices()
        .nth(n)
        .map_or(range.end, |(i, _)| range.start + i)
}

/// Byte offset `n` chars before the end of `range`, or its start.
fn retreat(text: &str, range: &Range<usize>, n: usize) -> usize {
    if n == 0 {
        return range.end;
    }
    text[range.clone()]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(range.start, |(i, _)| range.start + i)
}

/// Kept byte ranges of the window, split wherever an oversized run was cut.
struct Pieces {
    done: Vec<Range<usize>>,
    open: usize,
}

impl Pieces {
    fn new(from: usize) -> Self {
        Self {
            done: Vec::new(),
            open: from,
        }
    }

    /// Keep `run` whole when it fits in `limit` chars, else only its head and
    /// tail.
    fn run(&mut self, text: &str, run: Range<usize>, limit: usize) {
        if advance(text, &run, limit) == run.end {
            return;
        }
        let head = limit.div_ceil(2).max(1);
        self.done.push(self.open..advance(text, &run, head));
        self.open = retreat(text, &run, limit - head);
    }

    fn finish(mut self, to: usize) -> Vec<Range<usize>> {
        self.done.push(self.open..to);
        self.done
    }
}

/// Build a display snippet from `highlight()` output.
///
/// Fields without a match yield their leading window so the caller always has
/// some context to show; empty fields yield an empty string. The excerpt is
/// bounded: at most `cfg.tokens` tokens, each token and each separator run
/// clipped, with the ellipsis marking every cut.
pub fn build_snippet(highlighted: &str, cfg: &SnippetConfig) -> String {
    let Marked { text, matches } = strip_markers(highlighted);
    if text.is_empty() {
        return String::new();
    }

    let tokens = token_spans(&text);
    let (lead_cut, pieces, trail_cut) = if tokens.is_empty() {
        let to = advance(&text, &(0..text.len()), MAX_GAP_CHARS);
        (false, vec![0..to], to < text.len())
    } else {
        let size = cfg.tokens.max(1);
        let first = tokens
            .iter()
            .position(|t| matches.iter().any(|m| overlaps(t, m)))
            .unwrap_or(0);

        // A quarter of the window is spent on context before the match.
        let end = (first.saturating_sub(size / 4) + size).min(tokens.len());
        let start = end.saturating_sub(size);

        let from = if start == 0 {
            retreat(&text, &(0..tokens[0].start), MAX_GAP_CHARS)
        } else {
            tokens[start].start
        };
        let to = if end == tokens.len() {
            advance(&text, &(tokens[end - 1].end..text.len()), MAX_GAP_CHARS)
        } else {
            tokens[end - 1].end
        };

        let mut pieces = Pieces::new(from);
        let window = &tokens[start..end];
        for (i, token) in window.iter().enumerate() {
            pieces.run(&text, token.clone(), MAX_TOKEN_CHARS);
            if let Some(next) = window.get(i + 1) {
                pieces.run(&text, token.end..next.start, MAX_GAP_CHARS);
            }
        }
        (from > 0, pieces.finish(to), to < text.len())
    };

    let mut out = String::new();
    if lead_cut {
        out.push_str(&cfg.ellipsis);
    }
    for (k, piece) in pieces.into_iter().enumerate() {
        if k > 0 {
            out.push_str(&cfg.ellipsis);
        }
        out.push_str(&render(&text, piece, &matches, cfg));
    }
    if trail_cut {
        out.push_str(&cfg.ellipsis);
    }
    out
}
