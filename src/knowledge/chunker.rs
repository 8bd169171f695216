//! Paragraph-first text chunking with trailing overlap.
//!
//! Chunk bodies are contiguous spans of the source text, so stripping each
//! chunk's overlap prefix and concatenating the bodies reproduces the input
//! exactly.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*").expect("paragraph pattern is valid"));

/// A unit of indexed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Unique chunk identifier.
    pub id: String,
    /// Indexed text, including the overlap prefix.
    pub content: String,
    /// Caller-supplied metadata plus chunk position fields.
    pub metadata: Metadata,
    /// Document the chunk was cut from.
    pub source_id: Option<String>,
    /// Byte length of the overlap prefix at the start of `content`.
    pub overlap: usize,
}

impl KnowledgeChunk {
    /// Create a standalone chunk with no overlap.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: Metadata::new(),
            source_id: None,
            overlap: 0,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a source document id
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Content with the overlap prefix removed.
    pub fn body(&self) -> &str {
        self.content.get(self.overlap..).unwrap_or(&self.content)
    }
}

/// Split `text` into chunks of at most `max_size` characters (plus overlap).
///
/// Splitting is paragraph-first; a paragraph larger than `max_size` is split
/// at sentence ends, a sentence larger than that at whitespace, and a single
/// oversized word at character boundaries. Adjacent units are packed greedily.
/// Every chunk after the first is prefixed with the last `overlap` characters
/// of the previous chunk's body.
pub fn chunk_text(
    text: &str,
    metadata: &Metadata,
    max_size: usize,
    overlap: usize,
    source_id: Option<&str>,
) -> Vec<KnowledgeChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_size = max_size.max(1);
    let overlap = overlap.min(max_size.saturating_sub(1));

    let mut units = Vec::new();
    for paragraph in split_after(0..text.len(), paragraph_breaks(text)) {
        push_units(text, paragraph, max_size, &mut units);
    }

    let spans = pack(text, &units, max_size);
    let total = spans.len();
    let mut chunks = Vec::with_capacity(total);
    let mut previous: Option<&str> = None;

    for (index, span) in spans.into_iter().enumerate() {
        let body = &text[span.clone()];
        let prefix = previous.map(|p| tail_chars(p, overlap)).unwrap_or("");

        let mut chunk_metadata = metadata.clone();
        chunk_metadata.insert("chunk_index".to_string(), index.into());
        chunk_metadata.insert("chunk_count".to_string(), total.into());
        chunk_metadata.insert("start_offset".to_string(), span.start.into());
        chunk_metadata.insert("overlap_len".to_string(), prefix.len().into());

        chunks.push(KnowledgeChunk {
            id: Uuid::new_v4().to_string(),
            content: format!("{}{}", prefix, body),
            metadata: chunk_metadata,
            source_id: source_id.map(str::to_string),
            overlap: prefix.len(),
        });
        previous = Some(body);
    }

    chunks
}

/// Reassemble the source text from chunks produced by [`chunk_text`].
pub fn reassemble(chunks: &[KnowledgeChunk]) -> String {
    chunks.iter().map(KnowledgeChunk::body).collect()
}

fn char_len(text: &str, range: &Range<usize>) -> usize {
    text[range.clone()].chars().count()
}

/// Recursively break `range` until every unit fits `max_size`.
fn push_units(text: &str, range: Range<usize>, max_size: usize, out: &mut Vec<Range<usize>>) {
    if char_len(text, &range) <= max_size {
        out.push(range);
        return;
    }

    let sentences = split_after(
        range.clone(),
        sentence_breaks(&text[range.clone()], range.start),
    );
    if sentences.len() > 1 {
        for sentence in sentences {
            push_words(text, sentence, max_size, out);
        }
    } else {
        push_words(text, range, max_size, out);
    }
}

fn push_words(text: &str, range: Range<usize>, max_size: usize, out: &mut Vec<Range<usize>>) {
    if char_len(text, &range) <= max_size {
        out.push(range);
        return;
    }

    for word in split_after(range.clone(), word_breaks(&text[range.clone()], range.start)) {
        if char_len(text, &word) <= max_size {
            out.push(word);
        } else {
            hard_split(text, word, max_size, out);
        }
    }
}

fn hard_split(text: &str, range: Range<usize>, max_size: usize, out: &mut Vec<Range<usize>>) {
    let mut start = range.start;
    let mut count = 0;
    for (offset, _) in text[range.clone()].char_indices() {
        if count == max_size {
            out.push(start..range.start + offset);
            start = range.start + offset;
            count = 0;
        }
        count += 1;
    }
    if start < range.end {
        out.push(start..range.end);
    }
}

/// Cut `range` into contiguous pieces ending at each absolute position in `breaks`.
fn split_after(range: Range<usize>, breaks: Vec<usize>) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = range.start;
    for end in breaks {
        if end > start && end < range.end {
            pieces.push(start..end);
            start = end;
        }
    }
    if start < range.end {
        pieces.push(start..range.end);
    }
    pieces
}

fn paragraph_breaks(text: &str) -> Vec<usize> {
    PARAGRAPH_BREAK.find_iter(text).map(|m| m.end()).collect()
}

/// Positions just after the whitespace following `.`, `!` or `?`.
fn sentence_breaks(segment: &str, base: usize) -> Vec<usize> {
    let mut breaks = Vec::new();
    let mut chars = segment.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = None;
        while let Some(&(i, next)) = chars.peek() {
            if next.is_whitespace() {
                end = Some(i + next.len_utf8());
                chars.next();
            } else {
                break;
            }
        }
        if let Some(end) = end {
            breaks.push(base + end);
        }
    }
    breaks
}

/// Positions just after each whitespace run.
fn word_breaks(segment: &str, base: usize) -> Vec<usize> {
    let mut breaks = Vec::new();
    let mut in_space = false;
    for (i, c) in segment.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            breaks.push(base + i);
            in_space = false;
        }
    }
    breaks
}

/// Greedily merge adjacent units into spans of at most `max_size` characters.
fn pack(text: &str, units: &[Range<usize>], max_size: usize) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in units {
        current = match current {
            None => Some(unit.clone()),
            Some(span) => {
                let merged = span.start..unit.end;
                if char_len(text, &merged) <= max_size {
                    Some(merged)
                } else {
                    spans.push(span);
                    Some(unit.clone())
                }
            }
        };
    }
    spans.extend(current);
    spans
}

fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let skip = count - n;
    text.char_indices()
        .nth(skip)
        .map(|(i, _)| &text[i..])
        .unwrap_or(text)
}
