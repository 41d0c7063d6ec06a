//! Semantic chunking of oversized text
//!
//! Text is cut into chunks of at most `max_bytes`, each ending at a semantic
//! boundary supplied by a [`BoundaryDetector`]. When no boundary exists within
//! the lookback window the chunk is hard-split at the byte limit (on a char
//! boundary) and flagged. Chunks are exact slices of the input, so concatenating
//! them in order reproduces it byte for byte.
//!
//! Continuation cursors carry the byte position of the next chunk and are bound
//! to a fingerprint of the text and chunking parameters.

use super::cursor::{content_fingerprint, CursorCodec, OrderKey};
use crate::config::GovernorConfig;
use crate::error::{CursorRejection, GovernanceError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Finds safe split points in text
pub trait BoundaryDetector: Send + Sync {
    /// Largest split position in `(0, limit]` of `text`, if any.
    ///
    /// `limit` is a char boundary. Bytes past `limit` may be inspected for context
    /// but never returned.
    fn last_boundary(&self, text: &str, limit: usize) -> Option<usize>;

    /// Stable name, part of the cursor fingerprint
    fn name(&self) -> &'static str;
}

/// Prose: paragraph breaks and sentence ends
#[derive(Debug, Clone, Copy, Default)]
pub struct ProseBoundary;

impl BoundaryDetector for ProseBoundary {
    fn last_boundary(&self, text: &str, limit: usize) -> Option<usize> {
        let window = &text[..limit];
        let mut last = None;
        let mut prev: Option<char> = None;
        for (i, c) in window.char_indices() {
            let after = i + c.len_utf8();
            match (prev, c) {
                // blank line
                (Some('\n'), '\n') => last = Some(after),
                (Some('.' | '!' | '?'), c) if c.is_whitespace() => last = Some(after),
                _ => {}
            }
            prev = Some(c);
        }
        last
    }

    fn name(&self) -> &'static str {
        "prose"
    }
}

/// Logs: before each line that starts a new entry. Indented lines (stack
/// traces, wrapped messages) belong to the entry above them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBoundary;

impl BoundaryDetector for LogBoundary {
    fn last_boundary(&self, text: &str, limit: usize) -> Option<usize> {
        let bytes = text.as_bytes();
        text[..limit]
            .match_indices('\n')
            .map(|(i, _)| i + 1)
            .filter(|&pos| match bytes.get(pos) {
                None => true,
                Some(b) => !b.is_ascii_whitespace(),
            })
            .last()
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Line-oriented data (CSV, JSON lines): every line end
#[derive(Debug, Clone, Copy, Default)]
pub struct LineBoundary;

impl BoundaryDetector for LineBoundary {
    fn last_boundary(&self, text: &str, limit: usize) -> Option<usize> {
        text[..limit].rfind('\n').map(|i| i + 1)
    }

    fn name(&self) -> &'static str {
        "lines"
    }
}

static PROSE: ProseBoundary = ProseBoundary;
static LOG: LogBoundary = LogBoundary;
static LINES: LineBoundary = LineBoundary;

/// Built-in content kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Prose,
    Log,
    Lines,
}

impl ContentKind {
    pub fn detector(&self) -> &'static dyn BoundaryDetector {
        match self {
            Self::Prose => &PROSE,
            Self::Log => &LOG,
            Self::Lines => &LINES,
        }
    }
}

/// Line and size bookkeeping for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// 1-based; 0 only for empty text
    pub start_line: usize,
    pub end_line: usize,
    pub total_lines: usize,
    pub bytes_in_chunk: usize,
}

/// One chunk of oversized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub next_cursor: Option<String>,
    pub metadata: ChunkMetadata,
}

/// Byte range of a planned chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    /// Split at the byte limit, not a semantic boundary
    pub hard_split: bool,
}

/// A chunk and how it was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub chunk: ContentChunk,
    pub boundary_fallback: bool,
    /// The presented cursor had expired and chunking restarted at 0
    pub restarted: bool,
}

/// Splits text at semantic boundaries
#[derive(Debug, Clone)]
pub struct Chunker {
    codec: CursorCodec,
    max_bytes: usize,
    lookback: usize,
}

impl Chunker {
    pub fn new(codec: CursorCodec, max_bytes: usize) -> Self {
        let max_bytes = max_bytes.max(1);
        Self {
            codec,
            max_bytes,
            lookback: (max_bytes / 2).max(1),
        }
    }

    pub fn from_config(codec: CursorCodec, config: &GovernorConfig) -> Self {
        Self::new(codec, config.max_chunk_bytes).with_lookback(config.chunk_lookback())
    }

    /// Bytes before the limit in which a boundary is accepted
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.clamp(1, self.max_bytes);
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Same codec and lookback with a different chunk size
    pub fn resized(&self, max_bytes: usize) -> Self {
        let max_bytes = max_bytes.max(1);
        Self {
            codec: self.codec.clone(),
            max_bytes,
            lookback: self.lookback.clamp(1, max_bytes),
        }
    }

    /// Chunk built-in content
    pub fn chunk(&self, text: &str, kind: ContentKind, cursor: Option<&str>) -> Result<ChunkOutcome> {
        self.chunk_with(text, kind.detector(), cursor)
    }

    /// Chunk with a caller-supplied boundary detector
    pub fn chunk_with(
        &self,
        text: &str,
        detector: &dyn BoundaryDetector,
        cursor: Option<&str>,
    ) -> Result<ChunkOutcome> {
        let spans = self.plan(text, detector);
        let order_key = chunk_order_key();
        let fingerprint = self.fingerprint(text, detector);

        let (position, restarted) = match cursor.filter(|c| !c.is_empty()) {
            None => (0, false),
            Some(token) => match self.codec.decode(token, &order_key, &fingerprint) {
                Ok(offset) => (offset, false),
                Err(GovernanceError::ExpiredCursor { age_secs, ttl_secs }) => {
                    info!(
                        "Chunk cursor expired ({}s old, ttl {}s); restarting from the first chunk",
                        age_secs, ttl_secs
                    );
                    (0, true)
                }
                Err(e) => return Err(e),
            },
        };

        let chunk_index = spans
            .iter()
            .position(|span| span.start == position)
            .ok_or(GovernanceError::InvalidCursor(CursorRejection::UnknownPosition))?;
        let span = spans[chunk_index];
        let total_chunks = spans.len();

        let next_cursor = match spans.get(chunk_index + 1) {
            Some(next) => Some(self.codec.encode(next.start, &order_key, &fingerprint)?),
            None => None,
        };

        if span.hard_split {
            warn!(
                "No {} boundary within {} bytes of the limit; hard split chunk {} at byte {}",
                detector.name(),
                self.lookback,
                chunk_index,
                span.end
            );
        }

        let lines = LineIndex::new(text);
        let (start_line, end_line) = lines.span_lines(span.start, span.end);

        debug!(
            "Chunk {}/{} bytes [{}, {}) lines {}-{}",
            chunk_index + 1,
            total_chunks,
            span.start,
            span.end,
            start_line,
            end_line
        );

        Ok(ChunkOutcome {
            chunk: ContentChunk {
                content: text[span.start..span.end].to_string(),
                chunk_index,
                total_chunks,
                next_cursor,
                metadata: ChunkMetadata {
                    start_line,
                    end_line,
                    total_lines: lines.total_lines(),
                    bytes_in_chunk: span.end - span.start,
                },
            },
            boundary_fallback: span.hard_split,
            restarted,
        })
    }

    /// Deterministic chunk layout of `text`
    pub fn plan(&self, text: &str, detector: &dyn BoundaryDetector) -> Vec<ChunkSpan> {
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let remaining = &text[start..];
            if remaining.len() <= self.max_bytes {
                spans.push(ChunkSpan {
                    start,
                    end: text.len(),
                    hard_split: false,
                });
                return spans;
            }

            let limit = split_limit(remaining, self.max_bytes);
            let min_end = limit.saturating_sub(self.lookback).max(1);
            let (end, hard_split) = match detector.last_boundary(remaining, limit) {
                Some(boundary)
                    if boundary >= min_end
                        && boundary <= limit
                        && remaining.is_char_boundary(boundary) =>
                {
                    (boundary, false)
                }
                _ => (limit, true),
            };

            spans.push(ChunkSpan {
                start,
                end: start + end,
                hard_split,
            });
            start += end;
        }
    }

    fn fingerprint(&self, text: &str, detector: &dyn BoundaryDetector) -> String {
        content_fingerprint(&[
            detector.name().as_bytes(),
            &(self.max_bytes as u64).to_be_bytes(),
            &(self.lookback as u64).to_be_bytes(),
            text.as_bytes(),
        ])
    }
}

fn chunk_order_key() -> OrderKey {
    OrderKey::asc("byte")
}

/// Largest char boundary <= `max`, or the end of the first char if that is wider than `max`
fn split_limit(text: &str, max: usize) -> usize {
    let mut limit = max.min(text.len());
    while limit > 0 && !text.is_char_boundary(limit) {
        limit -= 1;
    }
    if limit == 0 {
        limit = text.chars().next().map_or(text.len(), char::len_utf8);
    }
    limit
}

/// Newline positions for line-number lookups
struct LineIndex {
    newlines: Vec<usize>,
    len: usize,
    ends_with_newline: bool,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
            len: text.len(),
            ends_with_newline: text.ends_with('\n'),
        }
    }

    fn total_lines(&self) -> usize {
        if self.len == 0 {
            0
        } else if self.ends_with_newline {
            self.newlines.len()
        } else {
            self.newlines.len() + 1
        }
    }

    /// 1-based line of the byte at `pos`
    fn line_of(&self, pos: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < pos) + 1
    }

    fn span_lines(&self, start: usize, end: usize) -> (usize, usize) {
        if end <= start {
            return (0, 0);
        }
        (self.line_of(start), self.line_of(end - 1))
    }
}
