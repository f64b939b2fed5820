//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//! Payloads are stored flat (`text`, `title`, then extension keys) and a
//! keyword index on `title` is created alongside every collection.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::qdrant::QdrantVectorStore;
//! use kb_rag::{DistanceMetric, VectorStore};
//!
//! let store = QdrantVectorStore::new("http://localhost:6334", None)?;
//! store.ensure_collection("knowledge_base", 1536, DistanceMetric::Cosine).await?;
//! store.upsert("knowledge_base", &records).await?;
//! let results = store.search("knowledge_base", &query_embedding, 5, None).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    Distance, FieldType, Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::document::{IndexRecord, RecordPayload, ScoredResult, TEXT_KEY, TITLE_KEY};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, DistanceMetric, SearchFilter, VectorStore, validate_dimension,
    validate_records, validate_top_k, verify_collection,
};

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
///
/// Collection dimensions are looked up once and cached, so vectors of the
/// wrong length are rejected locally before any request is sent.
pub struct QdrantVectorStore {
    client: Qdrant,
    dimensions: RwLock<HashMap<String, usize>>,
}

impl QdrantVectorStore {
    /// Connect to the given URL, optionally authenticating with an API key.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).api_key(api_key).build().map_err(Self::map_err)?;
        Ok(Self::from_client(client))
    }

    /// Connect using the Qdrant settings of a [`ServiceConfig`].
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(&config.qdrant_url, config.qdrant_api_key.clone())
    }

    /// Wrap an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client, dimensions: RwLock::new(HashMap::new()) }
    }

    fn map_err(e: qdrant_client::QdrantError) -> RagError {
        RagError::VectorStore { backend: "qdrant".to_string(), message: e.to_string() }
    }

    async fn dimension_of(&self, collection: &str) -> Result<usize> {
        if let Some(&dimension) = self.dimensions.read().await.get(collection) {
            return Ok(dimension);
        }
        let info = self.collection_info(collection).await?.ok_or_else(|| {
            RagError::VectorStore {
                backend: "qdrant".to_string(),
                message: format!("collection '{collection}' does not exist"),
            }
        })?;
        self.dimensions.write().await.insert(collection.to_string(), info.dimension);
        Ok(info.dimension)
    }

    async fn create_title_index(&self, collection: &str) {
        let request =
            CreateFieldIndexCollectionBuilder::new(collection, TITLE_KEY, FieldType::Keyword)
                .wait(true);
        if let Err(e) = self.client.create_field_index(request).await {
            warn!(collection, error = %e, "failed to create title index");
        }
    }
}

fn to_qdrant_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Dot => Distance::Dot,
        DistanceMetric::Euclid => Distance::Euclid,
    }
}

fn from_qdrant_distance(distance: i32) -> Option<DistanceMetric> {
    match Distance::try_from(distance).ok()? {
        Distance::Cosine => Some(DistanceMetric::Cosine),
        Distance::Dot => Some(DistanceMetric::Dot),
        Distance::Euclid => Some(DistanceMetric::Euclid),
        _ => None,
    }
}

fn to_qdrant_filter(filter: &SearchFilter) -> Filter {
    Filter::must(
        filter.must.iter().map(|c| Condition::matches(c.key.clone(), c.value.clone())),
    )
}

fn to_qdrant_payload(payload: &RecordPayload) -> Result<Payload> {
    let value = serde_json::to_value(payload).map_err(|e| RagError::VectorStore {
        backend: "qdrant".to_string(),
        message: format!("failed to serialize payload: {e}"),
    })?;
    Payload::try_from(value).map_err(QdrantVectorStore::map_err)
}

/// Render a scalar payload value as a string. Lists and structs are skipped.
fn value_to_string(value: &QdrantValue) -> Option<String> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        Kind::IntegerValue(i) => Some(i.to_string()),
        Kind::DoubleValue(d) => Some(d.to_string()),
        Kind::BoolValue(b) => Some(b.to_string()),
        _ => None,
    }
}

fn from_qdrant_payload(mut payload: HashMap<String, QdrantValue>) -> RecordPayload {
    let mut take =
        |key: &str| payload.remove(key).and_then(|v| value_to_string(&v)).unwrap_or_default();
    let text = take(TEXT_KEY);
    let title = take(TITLE_KEY);
    let extra = payload
        .iter()
        .filter_map(|(key, value)| value_to_string(value).map(|v| (key.clone(), v)))
        .collect();
    RecordPayload { text, title, extra }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if let Some(info) = self.collection_info(name).await? {
            verify_collection(name, &info, dimension, metric)?;
            self.dimensions.write().await.insert(name.to_string(), dimension);
            debug!(collection = name, dimension, "qdrant collection already exists");
            self.create_title_index(name).await;
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                    dimension as u64,
                    to_qdrant_distance(metric),
                )),
            )
            .await
            .map_err(Self::map_err)?;
        self.create_title_index(name).await;
        self.dimensions.write().await.insert(name.to_string(), dimension);

        debug!(collection = name, dimension, ?metric, "created qdrant collection");
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if !self.client.collection_exists(name).await.map_err(Self::map_err)? {
            return Ok(None);
        }
        let response = self.client.collection_info(name).await.map_err(Self::map_err)?;
        let params = response
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config);

        match params {
            Some(VectorsConfigKind::Params(params)) => {
                let metric =
                    from_qdrant_distance(params.distance).ok_or_else(|| RagError::VectorStore {
                        backend: "qdrant".to_string(),
                        message: format!("collection '{name}' uses an unsupported distance"),
                    })?;
                Ok(Some(CollectionInfo { dimension: params.size as usize, metric }))
            }
            _ => Err(RagError::VectorStore {
                backend: "qdrant".to_string(),
                message: format!("collection '{name}' does not use a single unnamed vector"),
            }),
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client.delete_collection(name).await.map_err(Self::map_err)?;
        self.dimensions.write().await.remove(name);
        debug!(collection = name, "deleted qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        validate_records(self.dimension_of(collection).await?, records)?;

        let points = records
            .iter()
            .map(|record| {
                let payload = to_qdrant_payload(&record.payload)?;
                Ok(PointStruct::new(record.id.clone(), record.vector.clone(), payload))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = records.len(), "upserted records to qdrant");
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(Self::map_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or_default())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredResult>> {
        validate_top_k(top_k)?;
        validate_dimension(self.dimension_of(collection).await?, query)?;

        let mut request =
            SearchPointsBuilder::new(collection, query.to_vec(), top_k as u64).with_payload(true);
        if let Some(filter) = filter.filter(|f| !f.must.is_empty()) {
            request = request.filter(to_qdrant_filter(filter));
        }

        let response = self.client.search_points(request).await.map_err(Self::map_err)?;

        let results = response
            .result
            .into_iter()
            .map(|scored| {
                let record_id = scored
                    .id
                    .as_ref()
                    .and_then(|pid| match &pid.point_id_options {
                        Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
                        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
                        None => None,
                    })
                    .unwrap_or_default();

                ScoredResult {
                    record_id,
                    payload: from_qdrant_payload(scored.payload),
                    similarity_score: scored.score,
                }
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> QdrantValue {
        QdrantValue { kind: Some(Kind::StringValue(s.to_string())) }
    }

    #[test]
    fn payload_is_stored_flat() {
        let mut payload = RecordPayload::new("body", "report.pdf");
        payload.extra.insert("source".into(), "Finance/report.pdf".into());

        let converted: HashMap<String, QdrantValue> = to_qdrant_payload(&payload).unwrap().into();
        assert_eq!(converted.get("title").and_then(value_to_string).as_deref(), Some("report.pdf"));
        assert_eq!(
            converted.get("source").and_then(value_to_string).as_deref(),
            Some("Finance/report.pdf")
        );
        assert!(!converted.contains_key("extra"));
    }

    #[test]
    fn scalar_values_become_strings() {
        let payload = HashMap::from([
            ("text".to_string(), string("body")),
            ("title".to_string(), string("notes.md")),
            ("chunk_index".to_string(), QdrantValue { kind: Some(Kind::IntegerValue(4)) }),
            ("flag".to_string(), QdrantValue { kind: Some(Kind::BoolValue(true)) }),
            ("empty".to_string(), QdrantValue { kind: None }),
        ]);

        let record = from_qdrant_payload(payload);
        assert_eq!(record.text, "body");
        assert_eq!(record.title, "notes.md");
        assert_eq!(record.get("chunk_index"), Some("4"));
        assert_eq!(record.get("flag"), Some("true"));
        assert_eq!(record.get("empty"), None);
    }

    #[test]
    fn distances_round_trip() {
        for metric in [DistanceMetric::Cosine, DistanceMetric::Dot, DistanceMetric::Euclid] {
            assert_eq!(from_qdrant_distance(to_qdrant_distance(metric) as i32), Some(metric));
        }
    }

    #[test]
    fn unsupported_distance_is_not_read_as_cosine() {
        assert_eq!(from_qdrant_distance(Distance::Manhattan as i32), None);
        assert_eq!(from_qdrant_distance(Distance::UnknownDistance as i32), None);
    }
}
