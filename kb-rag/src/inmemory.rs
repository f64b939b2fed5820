//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and small-scale use cases.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{IndexRecord, ScoredResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, DistanceMetric, SearchFilter, VectorStore, validate_dimension,
    validate_records, validate_top_k, verify_collection,
};

#[derive(Debug)]
struct Collection {
    info: CollectionInfo,
    records: HashMap<String, IndexRecord>,
}

/// An in-memory vector store using cosine similarity for search.
///
/// Collections are stored as nested `HashMap`s: collection name → record ID → record.
/// Every collection remembers its dimension and rejects vectors of any other
/// length. Only [`DistanceMetric::Cosine`] is supported.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.ensure_collection("docs", 384, DistanceMetric::Cosine).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(collection: &str) -> RagError {
        RagError::VectorStore {
            backend: "InMemory".to_string(),
            message: format!("collection '{collection}' does not exist"),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if metric != DistanceMetric::Cosine {
            return Err(RagError::InvalidArgument(format!(
                "InMemory store only supports cosine distance, got {metric:?}"
            )));
        }
        if dimension == 0 {
            return Err(RagError::InvalidArgument("dimension must be greater than zero".into()));
        }

        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) => verify_collection(name, &existing.info, dimension, metric),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        info: CollectionInfo { dimension, metric },
                        records: HashMap::new(),
                    },
                );
                debug!(collection = name, dimension, "created in-memory collection");
                Ok(())
            }
        }
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.collections.read().await.get(name).map(|c| c.info))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[IndexRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| Self::missing(collection))?;
        validate_records(store.info.dimension, records)?;
        for record in records {
            store.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| Self::missing(collection))?;
        Ok(store.records.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredResult>> {
        validate_top_k(top_k)?;
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| Self::missing(collection))?;
        validate_dimension(store.info.dimension, query)?;

        let mut scored: Vec<ScoredResult> = store
            .records
            .values()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.payload)))
            .map(|record| ScoredResult {
                record_id: record.id.clone(),
                payload: record.payload.clone(),
                similarity_score: cosine_similarity(&record.vector, query),
            })
            .collect();

        // Ties break by id so repeated searches return a stable order.
        scored.sort_by(|a, b| {
            b.similarity_score
                .total_cmp(&a.similarity_score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RecordPayload;

    fn record(id: &str, title: &str, vector: Vec<f32>) -> IndexRecord {
        IndexRecord { id: id.into(), vector, payload: RecordPayload::new(id, title) }
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
        store.upsert("docs", &[record("a", "t", vec![1.0, 0.0, 0.0])]).await.unwrap();
        store.ensure_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ensure_collection_rejects_other_dimension() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
        let err = store.ensure_collection("docs", 4, DistanceMetric::Cosine).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 4 }));
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, DistanceMetric::Cosine).await.unwrap();
        store.upsert("docs", &[record("a", "old", vec![1.0, 0.0])]).await.unwrap();
        store.upsert("docs", &[record("a", "new", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.count("docs").await.unwrap(), 1);
        let hits = store.search("docs", &[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].payload.title, "new");
    }

    #[tokio::test]
    async fn upsert_with_wrong_dimension_writes_nothing() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, DistanceMetric::Cosine).await.unwrap();
        let batch = [record("a", "t", vec![1.0, 0.0]), record("b", "t", vec![1.0])];
        assert!(store.upsert("docs", &batch).await.is_err());
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_applies_title_filter() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, DistanceMetric::Cosine).await.unwrap();
        store
            .upsert(
                "docs",
                &[record("a", "one.md", vec![1.0, 0.0]), record("b", "two.md", vec![0.9, 0.1])],
            )
            .await
            .unwrap();

        let filter = SearchFilter::title("two.md");
        let hits = store.search("docs", &[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "b");
    }

    #[tokio::test]
    async fn search_rejects_bad_arguments() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2, DistanceMetric::Cosine).await.unwrap();
        assert!(matches!(
            store.search("docs", &[1.0, 0.0], 0, None).await,
            Err(RagError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.search("docs", &[1.0, 0.0], 101, None).await,
            Err(RagError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.search("docs", &[1.0, 0.0, 0.0], 3, None).await,
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn unknown_collection_is_a_store_error() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(store.count("nope").await, Err(RagError::VectorStore { .. })));
        assert_eq!(store.collection_info("nope").await.unwrap(), None);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
