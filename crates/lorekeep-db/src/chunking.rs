//! Sentence-aware document chunking for embedding generation.
//!
//! Text is first cleaned (whitespace runs collapsed to one space, ends
//! trimmed), then split at sentence boundaries. Sentences accumulate into a
//! chunk until the next one would push it past `max_chunk_size`; the closed
//! chunk's trailing words, up to `overlap` characters, seed the next chunk.
//!
//! Every chunk is a contiguous slice of the cleaned text, so
//! `cleaned[start_offset..end_offset]` (in characters) is exactly the chunk
//! text. A sentence longer than `max_chunk_size` becomes its own chunk rather
//! than being cut.
//!
//! # Example
//!
//! ```rust,ignore
//! use lorekeep_db::chunking::{Chunker, ChunkerConfig, SentenceChunker};
//!
//! let chunker = SentenceChunker::new(ChunkerConfig { max_chunk_size: 1000, overlap: 200 });
//! for chunk in chunker.chunk("First sentence. Second one.") {
//!     println!("{} [{}..{}]", chunk.index, chunk.start_offset, chunk.end_offset);
//! }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use lorekeep_core::hashing::chunk_hash;
use lorekeep_core::NewChunk;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").unwrap());
static ABBREVIATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:dr|mr|mrs|ms|prof|sr|jr|inc|ltd|co|etc|vs|e\.g|i\.e)\.$").unwrap()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Configuration for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in characters (single oversized sentences excepted).
    pub max_chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: lorekeep_core::defaults::CHUNK_SIZE,
            overlap: lorekeep_core::defaults::CHUNK_OVERLAP,
        }
    }
}

/// A text chunk with its position in the cleaned source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the document's chunk sequence.
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    /// Starting character offset in the cleaned text.
    pub start_offset: usize,
    /// Ending character offset (exclusive) in the cleaned text.
    pub end_offset: usize,
    /// `blake3:<hex>` of the chunk text.
    pub content_hash: String,
}

impl Chunk {
    /// Convert to a row for persistence under a (possibly renumbered) index.
    pub fn to_new_chunk(&self, chunk_index: i32, vector_id: Option<String>) -> NewChunk {
        NewChunk {
            chunk_index,
            text: self.text.clone(),
            start_offset: self.start_offset as i32,
            end_offset: self.end_offset as i32,
            content_hash: self.content_hash.clone(),
            vector_id,
        }
    }
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Chunk the given text.
    fn chunk(&self, text: &str) -> Vec<Chunk>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Collapse whitespace runs into single spaces and trim both ends.
pub fn clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Byte-to-character offset lookup for one string.
struct CharIndex {
    /// Byte offset of every char; empty for ASCII text.
    starts: Vec<usize>,
}

impl CharIndex {
    fn new(text: &str) -> Self {
        let starts = if text.is_ascii() {
            Vec::new()
        } else {
            text.char_indices().map(|(i, _)| i).collect()
        };
        Self { starts }
    }

    fn char_at(&self, byte: usize) -> usize {
        if self.starts.is_empty() {
            byte
        } else {
            self.starts.partition_point(|&s| s < byte)
        }
    }

    fn span(&self, start: usize, end: usize) -> usize {
        self.char_at(end) - self.char_at(start)
    }
}

/// Chunker that splits text at sentence boundaries.
pub struct SentenceChunker {
    config: ChunkerConfig,
}

impl SentenceChunker {
    /// Create a new SentenceChunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Byte ranges of sentences in cleaned text, trailing whitespace excluded.
    fn find_sentences(text: &str) -> Vec<(usize, usize)> {
        let mut sentences = Vec::new();
        let mut last_end = 0;

        for mat in SENTENCE_END.find_iter(text) {
            let punct_end = mat.start() + mat.as_str().trim_end().len();
            if ABBREVIATION.is_match(text[last_end..punct_end].trim()) {
                continue;
            }
            if punct_end > last_end {
                sentences.push((last_end, punct_end));
            }
            last_end = mat.end();
        }

        if last_end < text.len() && !text[last_end..].trim().is_empty() {
            sentences.push((last_end, text.len()));
        }

        sentences
    }

    /// Start of the longest whole-word suffix of `start..end` within the
    /// overlap budget.
    fn overlap_start(&self, text: &str, index: &CharIndex, start: usize, end: usize) -> Option<usize> {
        if self.config.overlap == 0 {
            return None;
        }
        text[start..end]
            .match_indices(' ')
            .map(|(i, _)| start + i + 1)
            .find(|&p| p < end && index.span(p, end) <= self.config.overlap)
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return vec![];
        }
        let index = CharIndex::new(&cleaned);
        let max = self.config.max_chunk_size.max(1);

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for (s_start, s_end) in Self::find_sentences(&cleaned) {
            current = match current {
                None => Some((s_start, s_end)),
                Some((c_start, _)) if index.span(c_start, s_end) <= max => Some((c_start, s_end)),
                Some((c_start, c_end)) => {
                    spans.push((c_start, c_end));
                    let seeded = self
                        .overlap_start(&cleaned, &index, c_start, c_end)
                        .filter(|&o| index.span(o, s_end) <= max);
                    Some((seeded.unwrap_or(s_start), s_end))
                }
            };
        }
        if let Some(span) = current {
            spans.push(span);
        }

        spans
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let text = cleaned[start..end].to_string();
                Chunk {
                    index: i,
                    char_count: index.span(start, end),
                    start_offset: index.char_at(start),
                    end_offset: index.char_at(end),
                    content_hash: chunk_hash(&text),
                    text,
                }
            })
            .collect()
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}
