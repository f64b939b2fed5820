//! Data types for documents, chunks, index records, and search results.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Metadata key holding a document's source path or URI.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding a document's title.
pub const TITLE_KEY: &str = "title";
/// Payload key holding a chunk's text.
pub const TEXT_KEY: &str = "text";
/// Payload key holding the parent document id.
pub const DOCUMENT_ID_KEY: &str = "document_id";
/// Payload key holding a chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// A source document containing text content and metadata.
///
/// Produced by a [`DocumentLoader`](crate::loader::DocumentLoader) and never
/// mutated after it has been chunked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document.
    pub metadata: HashMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new(), source_uri: None }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The title used for filtered search.
    ///
    /// An explicit `title` metadata entry wins. Otherwise the last path
    /// segment of the `source` metadata (or `source_uri`) is used, with any
    /// query string removed. Falls back to the document id.
    pub fn title(&self) -> String {
        if let Some(title) = self.metadata.get(TITLE_KEY).filter(|t| !t.trim().is_empty()) {
            return title.clone();
        }
        self.metadata
            .get(SOURCE_KEY)
            .or(self.source_uri.as_ref())
            .and_then(|source| title_from_source(source))
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Derive a title from a file path, blob path, or URL.
fn title_from_source(source: &str) -> Option<String> {
    let without_query = source.split('?').next().unwrap_or(source);
    let name = without_query.rsplit(['/', '\\']).next().unwrap_or(without_query).trim();
    if name.is_empty() { None } else { Some(name.to_string()) }
}

/// A bounded segment of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Globally unique, stable identifier for the chunk.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Position of the chunk within its document, starting at zero.
    pub sequence_index: usize,
    /// Key-value metadata inherited from the parent document plus chunk-specific fields.
    pub metadata: HashMap<String, String>,
}

/// A vector computed for one [`Chunk`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    /// The chunk this vector belongs to.
    pub owner_chunk_id: String,
    /// The vector itself.
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Length of the vector.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// The payload stored alongside a vector.
///
/// `text` and `title` are required; everything else lives in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecordPayload {
    /// The chunk text, used to assemble answer context.
    pub text: String,
    /// The source title, used for filtered search.
    pub title: String,
    /// Optional free-form metadata.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl RecordPayload {
    /// Create a payload with no extension fields.
    pub fn new(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self { text: text.into(), title: title.into(), extra: BTreeMap::new() }
    }

    /// Look up a field by name, including the required fields.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            TEXT_KEY => Some(&self.text),
            TITLE_KEY => Some(&self.title),
            _ => self.extra.get(key).map(String::as_str),
        }
    }

    /// Check the payload schema.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `text` or `title` is empty, or
    /// if `extra` shadows a required field.
    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(RagError::InvalidArgument("payload field 'text' is empty".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(RagError::InvalidArgument("payload field 'title' is empty".to_string()));
        }
        if self.extra.contains_key(TEXT_KEY) || self.extra.contains_key(TITLE_KEY) {
            return Err(RagError::InvalidArgument(
                "payload extension fields must not redefine 'text' or 'title'".to_string(),
            ));
        }
        Ok(())
    }
}

/// The unit stored in and retrieved from the vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    /// Record id; upserts with the same id overwrite.
    pub id: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Text, title, and extension metadata.
    pub payload: RecordPayload,
}

impl IndexRecord {
    /// Build the record for a chunk from its embedding.
    ///
    /// The payload carries the chunk text, the parent document's title, and
    /// the chunk metadata (minus `text`/`title`, which are reserved).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `embedding` belongs to another
    /// chunk.
    pub fn from_chunk(chunk: &Chunk, title: &str, embedding: Embedding) -> Result<Self> {
        if embedding.owner_chunk_id != chunk.id {
            return Err(RagError::InvalidArgument(format!(
                "embedding for chunk '{}' paired with chunk '{}'",
                embedding.owner_chunk_id, chunk.id
            )));
        }
        let mut extra: BTreeMap<String, String> = chunk
            .metadata
            .iter()
            .filter(|(key, _)| key.as_str() != TEXT_KEY && key.as_str() != TITLE_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        extra.insert(DOCUMENT_ID_KEY.to_string(), chunk.document_id.clone());
        extra.insert(CHUNK_INDEX_KEY.to_string(), chunk.sequence_index.to_string());

        Ok(Self {
            id: chunk.id.clone(),
            vector: embedding.vector,
            payload: RecordPayload { text: chunk.text.clone(), title: title.to_string(), extra },
        })
    }
}

/// A retrieved record paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredResult {
    /// The id of the matching record.
    pub record_id: String,
    /// The record's payload.
    pub payload: RecordPayload,
    /// Cosine similarity, higher is more similar.
    pub similarity_score: f32,
}
