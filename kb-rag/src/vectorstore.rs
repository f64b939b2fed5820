//! Vector store trait for storing and searching vector embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MAX_TOP_K;
use crate::document::{IndexRecord, RecordPayload, ScoredResult};
use crate::error::{RagError, Result};

/// How the index compares vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity, in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw dot product.
    Dot,
    /// Euclidean distance.
    Euclid,
}

/// The stored configuration of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Vector dimension every record must have.
    pub dimension: usize,
    /// Similarity metric.
    pub metric: DistanceMetric,
}

/// An exact-match condition on a payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatch {
    /// Payload field name (`title`, `text`, or an extension key).
    pub key: String,
    /// Value the field must equal.
    pub value: String,
}

/// A conjunction of exact-match payload conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Every condition must hold.
    pub must: Vec<FieldMatch>,
}

impl SearchFilter {
    /// Match records whose `title` equals `title`.
    pub fn title(title: impl Into<String>) -> Self {
        Self::default().and_match("title", title)
    }

    /// Add an exact-match condition.
    pub fn and_match(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push(FieldMatch { key: key.into(), value: value.into() });
        self
    }

    /// Whether `payload` satisfies every condition.
    pub fn matches(&self, payload: &RecordPayload) -> bool {
        self.must.iter().all(|c| payload.get(&c.key) == Some(c.value.as_str()))
    }
}

/// A storage backend for vector embeddings with similarity search.
///
/// Implementations manage named collections of [`IndexRecord`]s with a fixed
/// dimension, support overwrite-by-id upserts, and search by vector
/// similarity. All mutation happens in the backend, so a store can be shared
/// behind an `Arc` across concurrent pipelines.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.ensure_collection("docs", 384, DistanceMetric::Cosine).await?;
/// store.upsert("docs", &records).await?;
/// let results = store.search("docs", &query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection if it is absent, or verify an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the collection exists with
    /// a different dimension.
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()>;

    /// The stored configuration of a collection, or `None` if it does not exist.
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Delete a named collection and all its data.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert or replace records by id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if any record's vector length
    /// differs from the collection dimension, and [`RagError::InvalidArgument`]
    /// if a payload lacks `text` or `title`. Nothing is written in either case.
    async fn upsert(&self, collection: &str, records: &[IndexRecord]) -> Result<()>;

    /// Number of records in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Search for the `top_k` most similar records to `query`.
    ///
    /// Returns results ordered by descending similarity score.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `top_k` is outside `1..=100`,
    /// and [`RagError::DimensionMismatch`] if `query` has the wrong length.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredResult>>;
}

/// Reject a `top_k` outside `1..=100`.
pub fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(RagError::InvalidArgument(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
        )));
    }
    Ok(())
}

/// Reject a vector whose length differs from the collection dimension.
pub fn validate_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(())
}

/// Validate a batch of records against a collection before writing any of them.
pub fn validate_records(dimension: usize, records: &[IndexRecord]) -> Result<()> {
    for record in records {
        validate_dimension(dimension, &record.vector)?;
        record.payload.validate().map_err(|e| match e {
            RagError::InvalidArgument(msg) => {
                RagError::InvalidArgument(format!("record '{}': {msg}", record.id))
            }
            other => other,
        })?;
    }
    Ok(())
}

/// Compare an existing collection's configuration with the requested one.
///
/// A dimension disagreement is a [`RagError::DimensionMismatch`]; a metric
/// disagreement is a [`RagError::InvalidArgument`].
pub fn verify_collection(
    name: &str,
    info: &CollectionInfo,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<()> {
    if info.dimension != dimension {
        tracing::error!(
            collection = name,
            stored = info.dimension,
            requested = dimension,
            "collection dimension disagrees with embedding dimension"
        );
        return Err(RagError::DimensionMismatch { expected: info.dimension, actual: dimension });
    }
    if info.metric != metric {
        tracing::error!(
            collection = name,
            stored = ?info.metric,
            requested = ?metric,
            "collection distance metric disagrees with the requested one"
        );
        return Err(RagError::InvalidArgument(format!(
            "collection '{name}' uses {:?} distance, requested {metric:?}",
            info.metric
        )));
    }
    Ok(())
}
