//! Configuration for the ingestion and answer pipelines.
//!
//! [`RagConfig`] holds the pipeline tunables and is validated by its builder.
//! [`ServiceConfig`] holds endpoints, model identifiers, and credentials for
//! the external services. Both can be read from environment-style key/value
//! sources through `from_lookup`, which `from_env` wraps.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Largest `top_k` accepted by the vector index adapter.
pub const MAX_TOP_K: usize = 100;

/// Configuration parameters for the RAG pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// How documents are split into chunks.
    pub chunking: ChunkingStrategy,
    /// Number of top results to retrieve per query.
    pub top_k: usize,
    /// Minimum similarity score for retrieved results, if any.
    pub similarity_threshold: Option<f32>,
    /// Character budget for the concatenated context passed to the model.
    pub max_context_chars: usize,
    /// Number of chunks embedded and stored per batch during ingestion.
    pub embedding_batch_size: usize,
    /// Number of ingestion batches processed concurrently.
    pub ingest_concurrency: usize,
    /// Whether to compress the context with an extra model call before answering.
    pub summarize_context: bool,
    /// Whether the embedding gateway caches vectors by content hash.
    pub embedding_cache: bool,
    /// Deadline for each network call, in seconds.
    pub request_timeout_secs: u64,
    /// Retry policy for retryable service failures.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunking: ChunkingStrategy::Fixed,
            top_k: 6,
            similarity_threshold: None,
            max_context_chars: 8000,
            embedding_batch_size: 100,
            ingest_concurrency: 4,
            summarize_context: false,
            embedding_cache: false,
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The per-call network deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check that all parameters are in range.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] naming the first offending
    /// parameter.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(RagError::InvalidConfiguration(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        if self.max_context_chars == 0 {
            return Err(invalid("max_context_chars must be greater than zero"));
        }
        if self.embedding_batch_size == 0 {
            return Err(invalid("embedding_batch_size must be greater than zero"));
        }
        if self.ingest_concurrency == 0 {
            return Err(invalid("ingest_concurrency must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least one"));
        }
        Ok(())
    }

    /// Read tunables from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read tunables through `lookup`, falling back to defaults for unset keys.
    ///
    /// Recognised keys: `RAG_CHUNK_SIZE`, `RAG_CHUNK_OVERLAP`, `RAG_CHUNKING`,
    /// `RAG_TOP_K`, `RAG_MAX_CONTEXT_CHARS`, `RAG_EMBEDDING_BATCH_SIZE`,
    /// `RAG_INGEST_CONCURRENCY`, `RAG_SUMMARIZE_CONTEXT`,
    /// `RAG_REQUEST_TIMEOUT_SECS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(v) = parse_var(&lookup, "RAG_CHUNK_SIZE")? {
            builder = builder.chunk_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_CHUNKING")? {
            builder = builder.chunking(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_MAX_CONTEXT_CHARS")? {
            builder = builder.max_context_chars(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_EMBEDDING_BATCH_SIZE")? {
            builder = builder.embedding_batch_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_INGEST_CONCURRENCY")? {
            builder = builder.ingest_concurrency(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_SUMMARIZE_CONTEXT")? {
            builder = builder.summarize_context(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout_secs(v);
        }
        builder.build()
    }
}

fn invalid(message: &str) -> RagError {
    RagError::InvalidConfiguration(message.to_string())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            RagError::InvalidConfiguration(format!("{key}={raw:?} could not be parsed: {e}"))
        }),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of top results to retrieve per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for retrieved results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the character budget for the assembled context.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the number of chunks per ingestion batch.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set how many ingestion batches run concurrently.
    pub fn ingest_concurrency(mut self, workers: usize) -> Self {
        self.config.ingest_concurrency = workers;
        self
    }

    /// Enable or disable the summarization pass before answering.
    pub fn summarize_context(mut self, enabled: bool) -> Self {
        self.config.summarize_context = enabled;
        self
    }

    /// Enable or disable the content-hash embedding cache.
    pub fn embedding_cache(mut self, enabled: bool) -> Self {
        self.config.embedding_cache = enabled;
        self
    }

    /// Set the per-call network deadline in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Set the retry policy for service failures.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if, among others:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k` is outside `1..=100`
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Default vector collection name.
pub const DEFAULT_COLLECTION: &str = "knowledge_base";
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Dimensionality of [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
/// Default answer model.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-5-mini";
/// Default model for the optional context summarization pass.
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-5-nano";
/// Default Qdrant gRPC endpoint.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Endpoints, model identifiers, and credentials for the external services.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API key for the OpenAI-compatible embedding and chat endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL override for OpenAI-compatible endpoints.
    pub openai_base_url: Option<String>,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Vector dimension produced by the embedding model.
    pub embedding_dimensions: usize,
    /// Model used to generate answers.
    pub chat_model: String,
    /// Model used for the optional summarization pass.
    pub summary_model: String,
    /// Qdrant endpoint.
    pub qdrant_url: String,
    /// Qdrant API key, if the cluster requires one.
    pub qdrant_api_key: Option<String>,
    /// Vector collection name.
    pub collection: String,
}

// Credentials stay out of logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_base_url", &self.openai_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("chat_model", &self.chat_model)
            .field("summary_model", &self.summary_model)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_api_key", &self.qdrant_api_key.as_ref().map(|_| "<redacted>"))
            .field("collection", &self.collection)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_api_key: None,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Read service settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read service settings through `lookup`, falling back to defaults.
    ///
    /// Recognised keys: `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `EMBEDDING_MODEL`, `EMBEDDING_DIMENSIONS`, `CHAT_MODEL`,
    /// `SUMMARY_MODEL`, `QDRANT_URL`, `QDRANT_API_KEY`,
    /// `QDRANT_COLLECTION_NAME`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let embedding_dimensions =
            parse_var(&lookup, "EMBEDDING_DIMENSIONS")?.unwrap_or(defaults.embedding_dimensions);
        if embedding_dimensions == 0 {
            return Err(invalid("EMBEDDING_DIMENSIONS must be greater than zero"));
        }

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            embedding_model: get("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimensions,
            chat_model: get("CHAT_MODEL").unwrap_or(defaults.chat_model),
            summary_model: get("SUMMARY_MODEL").unwrap_or(defaults.summary_model),
            qdrant_url: get("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: get("QDRANT_API_KEY"),
            collection: get("QDRANT_COLLECTION_NAME").unwrap_or(defaults.collection),
        })
    }

    /// The OpenAI API key, or a [`RagError::Configuration`] if unset.
    pub fn require_openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| RagError::Configuration("OPENAI_API_KEY is not set".to_string()))
    }
}
