//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`] - consecutive character windows advancing by
//!   `chunk_size - chunk_overlap`
//! - [`RecursiveChunker`] - splits hierarchically by paragraphs, sentences,
//!   words, then characters, carrying overlap between chunks
//!
//! Sizes are measured in characters (Unicode scalar values), never bytes.
//! Chunking is deterministic: the same text and configuration always yield
//! the same chunks with the same ids.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::document::{CHUNK_INDEX_KEY, Chunk, Document};
use crate::error::{RagError, Result};

/// Namespace for chunk ids, so ids are valid UUIDs accepted by any index.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6b62_7261_675f_4e53_8000_0000_6368_756e);

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text. Never returns
    /// an empty chunk.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Which [`Chunker`] a pipeline builds from its [`RagConfig`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// [`FixedSizeChunker`].
    #[default]
    Fixed,
    /// [`RecursiveChunker`].
    Recursive,
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkingStrategy::Fixed => f.write_str("fixed"),
            ChunkingStrategy::Recursive => f.write_str("recursive"),
        }
    }
}

impl FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(ChunkingStrategy::Fixed),
            "recursive" => Ok(ChunkingStrategy::Recursive),
            other => Err(format!("unknown chunking strategy '{other}'")),
        }
    }
}

impl ChunkingStrategy {
    /// Build the chunker for this strategy from the config's size and overlap.
    pub fn build(self, config: &RagConfig) -> Result<Arc<dyn Chunker>> {
        Ok(match self {
            ChunkingStrategy::Fixed => {
                Arc::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?)
            }
            ChunkingStrategy::Recursive => {
                Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)?)
            }
        })
    }
}

/// The stable id of the chunk at `sequence_index` within `document_id`.
///
/// Re-ingesting a document therefore overwrites its previous vectors
/// instead of duplicating them.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    Uuid::new_v5(&CHUNK_NAMESPACE, format!("{document_id}#{sequence_index}").as_bytes())
        .to_string()
}

fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfiguration(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::InvalidConfiguration(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Wrap raw chunk texts into [`Chunk`]s that inherit the document metadata.
fn into_chunks(document: &Document, texts: Vec<String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let mut metadata = document.metadata.clone();
            metadata.insert(CHUNK_INDEX_KEY.to_string(), i.to_string());
            Chunk {
                id: chunk_id(&document.id, i),
                document_id: document.id.clone(),
                text,
                sequence_index: i,
                metadata,
            }
        })
        .collect()
}

/// Byte offsets of every character boundary in `text`, including `text.len()`.
fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect()
}

/// Split `text` into windows of `chunk_size` characters, each starting
/// `chunk_size - chunk_overlap` characters after the previous one.
///
/// The last window ends exactly at the end of the text, so no window is
/// empty or fully contained in its predecessor.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
/// `chunk_overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    validate_sizes(chunk_size, chunk_overlap)?;
    Ok(windows(text, chunk_size, chunk_overlap))
}

fn windows(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let bounds = char_boundaries(text);
    let char_count = bounds.len() - 1;
    let step = chunk_size - chunk_overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// Each chunk inherits the parent document's metadata plus a `chunk_index`
/// field.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.text.is_empty() {
            return Vec::new();
        }
        into_chunks(document, windows(&document.text, self.chunk_size, self.chunk_overlap))
    }
}

/// Splits text hierarchically: paragraphs → sentences → words → characters.
///
/// Text is first cut at paragraph separators (`\n\n`). Segments longer than
/// `chunk_size` are cut at sentence boundaries, then at spaces, and finally
/// into raw character windows. Segments are then merged greedily into chunks
/// of at most `chunk_size` characters; each new chunk starts with the
/// trailing segments of the previous one, up to `chunk_overlap` characters.
/// Whitespace-only chunks are dropped.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    const SEPARATORS: [&'static str; 5] = ["\n\n", "\n", ". ", "? ", " "];

    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    fn split(&self, text: &str) -> Vec<String> {
        let mut segments = Vec::new();
        split_segments(text, self.chunk_size, &Self::SEPARATORS, &mut segments);
        merge_segments(&segments, self.chunk_size, self.chunk_overlap)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` into segments of at most `chunk_size` characters, trying each
/// separator in turn. Separators stay attached to the preceding segment so
/// that concatenating the segments yields `text`.
fn split_segments<'a>(
    text: &'a str,
    chunk_size: usize,
    separators: &[&str],
    out: &mut Vec<&'a str>,
) {
    if char_len(text) <= chunk_size {
        out.push(text);
        return;
    }

    let Some((separator, rest)) = separators.split_first() else {
        let bounds = char_boundaries(text);
        let mut start = 0;
        while start + 1 < bounds.len() {
            let end = (start + chunk_size).min(bounds.len() - 1);
            out.push(&text[bounds[start]..bounds[end]]);
            start = end;
        }
        return;
    };

    for segment in split_keeping_separator(text, separator) {
        split_segments(segment, chunk_size, rest, out);
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Greedily merge segments (each at most `chunk_size` characters) into chunks.
fn merge_segments(segments: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut window_len = 0;

    let flush = |window: &VecDeque<(&str, usize)>, chunks: &mut Vec<String>| {
        let text: String = window.iter().map(|(s, _)| *s).collect();
        if !text.trim().is_empty() {
            chunks.push(text);
        }
    };

    for segment in segments {
        let len = char_len(segment);
        if len == 0 {
            continue;
        }
        if window_len + len > chunk_size && !window.is_empty() {
            flush(&window, &mut chunks);
            // Keep a tail no longer than the overlap that still leaves room.
            while window_len > chunk_overlap || (window_len > 0 && window_len + len > chunk_size) {
                if let Some((_, dropped)) = window.pop_front() {
                    window_len -= dropped;
                }
            }
        }
        window.push_back((*segment, len));
        window_len += len;
    }

    if !window.is_empty() {
        flush(&window, &mut chunks);
    }

    chunks
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.text.is_empty() {
            return Vec::new();
        }
        into_chunks(document, self.split(&document.text))
    }
}
