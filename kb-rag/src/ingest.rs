//! Ingestion pipeline: load → chunk → embed → store.
//!
//! Chunks are embedded and upserted in bounded batches. A failing batch is
//! recorded in the [`IngestReport`] and never aborts the batches around it,
//! and every successful batch is written to the index as soon as it has been
//! embedded.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{DirectoryLoader, InMemoryVectorStore, IngestionPipeline, RagConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .collection("knowledge_base")
//!     .build()?;
//!
//! let report = pipeline.run(&DirectoryLoader::new("./docs")).await;
//! println!("{:?}: stored {} of {}", report.status, report.stored_count, report.total);
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunking::Chunker;
use crate::config::{DEFAULT_COLLECTION, RagConfig};
use crate::document::{Chunk, Document, IndexRecord};
use crate::embedding::{EmbeddingGateway, EmbeddingProvider};
use crate::error::{ErrorKind, RagError, Result};
use crate::loader::DocumentLoader;
use crate::retry::call_with_policy;
use crate::vectorstore::{DistanceMetric, VectorStore};

/// Where an ingestion run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Reading documents from the source.
    Loading,
    /// Splitting documents into chunks.
    Chunking,
    /// Computing embeddings.
    Embedding,
    /// Writing records to the index.
    Storing,
    /// Finished without errors.
    Done,
    /// Finished with at least one error.
    Errored,
}

/// Overall outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Every chunk was stored.
    Success,
    /// Some batches were stored and some failed.
    Partial,
    /// Nothing was stored.
    Error,
    /// There was nothing to ingest.
    Warning,
}

/// One failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestError {
    /// The stage that failed.
    pub stage: IngestStage,
    /// Zero-based batch index, for embedding and storing failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    /// Number of chunks lost with this failure.
    pub chunks: usize,
    /// The kind of error that caused the failure.
    pub kind: ErrorKind,
    /// What went wrong.
    pub message: String,
}

impl IngestError {
    fn new(stage: IngestStage, batch: Option<usize>, chunks: usize, e: &RagError) -> Self {
        Self { stage, batch, chunks, kind: e.kind(), message: e.to_string() }
    }
}

/// The result of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Overall outcome.
    pub status: IngestStatus,
    /// Final stage: [`IngestStage::Done`] or [`IngestStage::Errored`].
    pub stage: IngestStage,
    /// Documents received from the loader.
    pub documents: usize,
    /// Ids of documents that produced no chunks.
    pub skipped_documents: Vec<String>,
    /// Chunks produced.
    pub total: usize,
    /// Chunks embedded and written to the index.
    pub stored_count: usize,
    /// Failures, ordered by batch.
    pub errors: Vec<IngestError>,
}

impl IngestReport {
    fn empty(status: IngestStatus) -> Self {
        Self {
            status,
            stage: IngestStage::Done,
            documents: 0,
            skipped_documents: Vec::new(),
            total: 0,
            stored_count: 0,
            errors: Vec::new(),
        }
    }

    fn failed(stage: IngestStage, documents: usize, total: usize, e: &RagError) -> Self {
        Self {
            status: IngestStatus::Error,
            stage: IngestStage::Errored,
            documents,
            skipped_documents: Vec::new(),
            total,
            stored_count: 0,
            errors: vec![IngestError::new(stage, None, total, e)],
        }
    }
}

/// Accumulates batch outcomes.
#[derive(Debug, Default)]
struct BatchTally {
    stored: usize,
    errors: Vec<IngestError>,
}

impl BatchTally {
    fn record(mut self, outcome: std::result::Result<usize, IngestError>) -> Self {
        match outcome {
            Ok(stored) => self.stored += stored,
            Err(e) => self.errors.push(e),
        }
        self
    }
}

/// A chunk waiting to be embedded, with the title of its document.
struct PendingChunk {
    chunk: Chunk,
    title: String,
}

/// Populates a vector index from a [`DocumentLoader`].
///
/// Construct one via [`IngestionPipeline::builder()`]. The pipeline holds only
/// shared service handles and configuration, so one instance can serve
/// concurrent runs.
pub struct IngestionPipeline {
    config: RagConfig,
    gateway: EmbeddingGateway,
    vector_store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    collection: String,
    metric: DistanceMetric,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The collection this pipeline writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Load documents from `loader` and ingest them.
    ///
    /// Never fails: a loader error becomes an [`IngestStatus::Error`] report.
    pub async fn run(&self, loader: &dyn DocumentLoader) -> IngestReport {
        info!(collection = %self.collection, "ingestion started");
        match loader.load().await {
            Ok(documents) => self.ingest_documents(documents).await,
            Err(e) => {
                error!(collection = %self.collection, error = %e, "failed to load documents");
                IngestReport::failed(IngestStage::Loading, 0, 0, &e)
            }
        }
    }

    /// Chunk, embed, and store `documents`.
    ///
    /// Chunk ids depend only on the document id and chunk position, so
    /// ingesting the same documents again overwrites rather than duplicates.
    pub async fn ingest_documents(&self, documents: Vec<Document>) -> IngestReport {
        if documents.is_empty() {
            warn!(collection = %self.collection, "no documents to ingest");
            return IngestReport::empty(IngestStatus::Warning);
        }
        let document_count = documents.len();

        let dimension = self.gateway.dimensions();
        let ensured = self
            .call("ensure_collection", || {
                self.vector_store.ensure_collection(&self.collection, dimension, self.metric)
            })
            .await;
        if let Err(e) = ensured {
            error!(collection = %self.collection, error = %e, "failed to prepare collection");
            return IngestReport::failed(IngestStage::Storing, document_count, 0, &e);
        }

        let (pending, skipped_documents) = self.chunk_documents(&documents);
        let total = pending.len();
        if total == 0 {
            warn!(
                collection = %self.collection,
                documents = document_count,
                "documents produced no chunks"
            );
            return IngestReport {
                documents: document_count,
                skipped_documents,
                ..IngestReport::empty(IngestStatus::Warning)
            };
        }

        let batch_size = self.config.embedding_batch_size;
        info!(
            collection = %self.collection,
            documents = document_count,
            chunks = total,
            batches = total.div_ceil(batch_size),
            "embedding and storing chunks"
        );

        let tally = stream::iter(pending.chunks(batch_size).enumerate())
            .map(|(index, batch)| self.process_batch(index, batch))
            .buffer_unordered(self.config.ingest_concurrency)
            .fold(BatchTally::default(), |tally, outcome| async move { tally.record(outcome) })
            .await;

        let mut errors = tally.errors;
        errors.sort_by_key(|e| e.batch);

        let status = match (errors.is_empty(), tally.stored) {
            (true, _) => IngestStatus::Success,
            (false, 0) => IngestStatus::Error,
            (false, _) => IngestStatus::Partial,
        };
        let stage = if errors.is_empty() { IngestStage::Done } else { IngestStage::Errored };

        info!(
            collection = %self.collection,
            ?status,
            total,
            stored_count = tally.stored,
            errors = errors.len(),
            "ingestion finished"
        );

        IngestReport {
            status,
            stage,
            documents: document_count,
            skipped_documents,
            total,
            stored_count: tally.stored,
            errors,
        }
    }

    fn chunk_documents(&self, documents: &[Document]) -> (Vec<PendingChunk>, Vec<String>) {
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for document in documents {
            let chunks = self.chunker.chunk(document);
            if chunks.is_empty() {
                warn!(document.id = %document.id, "document produced no chunks, skipping");
                skipped.push(document.id.clone());
                continue;
            }
            let title = document.title();
            pending.extend(
                chunks.into_iter().map(|chunk| PendingChunk { chunk, title: title.clone() }),
            );
        }
        (pending, skipped)
    }

    /// Embed and upsert one batch, returning how many records were written.
    async fn process_batch(
        &self,
        index: usize,
        batch: &[PendingChunk],
    ) -> std::result::Result<usize, IngestError> {
        let chunks: Vec<&Chunk> = batch.iter().map(|p| &p.chunk).collect();
        let fail = |stage: IngestStage, e: RagError| {
            error!(batch = index, ?stage, error = %e, "batch failed");
            IngestError::new(stage, Some(index), batch.len(), &e)
        };

        let chunks = &chunks;
        let embeddings = self
            .call("embed", move || self.gateway.embed_chunks(chunks))
            .await
            .map_err(|e| fail(IngestStage::Embedding, e))?;

        let records = batch
            .iter()
            .zip(embeddings)
            .map(|(p, embedding)| IndexRecord::from_chunk(&p.chunk, &p.title, embedding))
            .collect::<Result<Vec<IndexRecord>>>()
            .map_err(|e| fail(IngestStage::Embedding, e))?;

        let records = &records;
        self.call("upsert", move || self.vector_store.upsert(&self.collection, records))
            .await
            .map_err(|e| fail(IngestStage::Storing, e))?;

        info!(batch = index, count = records.len(), "stored batch");
        Ok(records.len())
    }

    async fn call<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call_with_policy(&self.config.retry, self.config.request_timeout(), operation, f).await
    }
}

/// Builder for [`IngestionPipeline`].
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    gateway: Option<EmbeddingGateway>,
    vector_store: Option<Arc<dyn VectorStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    collection: Option<String>,
    metric: DistanceMetric,
}

impl IngestionPipelineBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider; a gateway is built from the configuration.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Use an existing gateway, for example one shared with an answer pipeline.
    pub fn gateway(mut self, gateway: EmbeddingGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the vector store.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Override the chunker selected by [`RagConfig::chunking`].
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the target collection. Defaults to `knowledge_base`.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Set the distance metric used when the collection is created.
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if no embedding provider or vector
    /// store was set, and [`RagError::InvalidConfiguration`] if the
    /// configuration fails validation.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let gateway = match (self.gateway, self.embedding_provider) {
            (Some(gateway), _) => gateway,
            (None, Some(provider)) => {
                let gateway = EmbeddingGateway::new(provider, config.embedding_batch_size);
                if config.embedding_cache { gateway.with_cache() } else { gateway }
            }
            (None, None) => {
                return Err(RagError::Configuration(
                    "an embedding provider is required for ingestion".to_string(),
                ));
            }
        };
        let vector_store = self.vector_store.ok_or_else(|| {
            RagError::Configuration("a vector store is required for ingestion".to_string())
        })?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => config.chunking.build(&config)?,
        };

        Ok(IngestionPipeline {
            config,
            gateway,
            vector_store,
            chunker,
            collection: self.collection.unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            metric: self.metric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(batch: usize) -> std::result::Result<usize, IngestError> {
        let e = RagError::EmbeddingService { provider: "p".into(), message: "down".into() };
        Err(IngestError::new(IngestStage::Embedding, Some(batch), 1, &e))
    }

    #[test]
    fn tally_folds_successes_and_failures() {
        let tally = [Ok(100), failure(1), Ok(50)]
            .into_iter()
            .fold(BatchTally::default(), BatchTally::record);
        assert_eq!(tally.stored, 150);
        assert_eq!(tally.errors.len(), 1);
    }

    #[test]
    fn build_requires_collaborators() {
        assert!(matches!(IngestionPipeline::builder().build(), Err(RagError::Configuration(_))));
    }

    #[test]
    fn report_serializes_status_in_snake_case() {
        let report = IngestReport::empty(IngestStatus::Warning);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "warning");
        assert_eq!(value["stored_count"], 0);
    }
}
