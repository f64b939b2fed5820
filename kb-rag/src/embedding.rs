//! Embedding provider trait and the batching gateway in front of it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::document::{Chunk, Embedding};
use crate::error::{RagError, Result};

/// What a text is being embedded for.
///
/// Some backends produce different vectors for stored passages and for
/// search queries; others ignore the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPurpose {
    /// A chunk to be stored in the index.
    Document,
    /// A user query to be searched with.
    Query,
}

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{EmbeddingProvider, EmbeddingPurpose};
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world", EmbeddingPurpose::Query).await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str, purpose: EmbeddingPurpose) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, purpose).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A short name used in logs and errors.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Front door to an [`EmbeddingProvider`].
///
/// Splits inputs into requests of at most `batch_size` texts, checks that the
/// provider returned one vector per input with the expected dimension, and
/// optionally serves repeated texts from a content-hash cache.
///
/// The gateway is cheap to clone and safe to share across concurrent callers.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    cache: Option<Arc<EmbeddingCache>>,
}

impl EmbeddingGateway {
    /// Create a gateway sending at most `batch_size` texts per request.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self { provider, batch_size: batch_size.max(1), cache: None }
    }

    /// Serve repeated texts from an in-process cache.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Arc::new(EmbeddingCache::default()));
        self
    }

    /// The dimension every returned vector has.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// The underlying provider's name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed `texts` for `purpose`, returning one vector per input in order.
    ///
    /// Every batch is attempted even after an earlier one fails, so with a
    /// cache enabled a retry only re-requests the failed batches.
    ///
    /// # Errors
    ///
    /// Returns the first batch failure; see [`embed_batches`](Self::embed_batches).
    pub async fn embed(&self, texts: &[&str], purpose: EmbeddingPurpose) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut first_error = None;
        for outcome in self.embed_batches(texts, purpose).await {
            match outcome {
                Ok(batch) => vectors.extend(batch),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(vectors),
        }
    }

    /// Embed `texts` in groups of `batch_size`, one outcome per group.
    ///
    /// Outcome `i` covers `texts[i * batch_size..]` up to the next group. A
    /// failed group does not stop the ones after it.
    ///
    /// # Errors
    ///
    /// A group fails with [`RagError::EmbeddingService`] if its request fails
    /// or returns the wrong number of vectors, and with
    /// [`RagError::DimensionMismatch`] if a vector has the wrong length.
    /// Nothing is cached from a failed group.
    pub async fn embed_batches(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Vec<Result<Vec<Vec<f32>>>> {
        debug!(
            provider = self.provider.name(),
            total = texts.len(),
            batches = texts.len().div_ceil(self.batch_size),
            "embedding texts"
        );

        let mut outcomes = Vec::with_capacity(texts.len().div_ceil(self.batch_size));
        for (index, group) in texts.chunks(self.batch_size).enumerate() {
            let outcome = self.embed_group(group, purpose).await;
            if let Err(e) = &outcome {
                warn!(
                    provider = self.provider.name(),
                    batch = index,
                    error = %e,
                    "embedding batch failed"
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Embed stored chunks, pairing each vector with the id of its chunk.
    pub async fn embed_chunks(&self, chunks: &[&Chunk]) -> Result<Vec<Embedding>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embed(&texts, EmbeddingPurpose::Document).await?;
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Embedding { owner_chunk_id: chunk.id.clone(), vector })
            .collect())
    }

    async fn embed_group(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let keys: Vec<String> = texts.iter().map(|t| EmbeddingCache::key(t, purpose)).collect();

        if let Some(cache) = &self.cache {
            let cached = cache.entries.read().await;
            for (slot, key) in results.iter_mut().zip(&keys) {
                *slot = cached.get(key).cloned();
            }
        }

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            let request: Vec<&str> = missing.iter().map(|&i| texts[i]).collect();
            let vectors = self.provider.embed_batch(&request, purpose).await?;
            self.check(&request, &vectors)?;

            if let Some(cache) = &self.cache {
                let mut cached = cache.entries.write().await;
                for (&i, vector) in missing.iter().zip(&vectors) {
                    cached.insert(keys[i].clone(), vector.clone());
                }
            }
            for (&i, vector) in missing.iter().zip(vectors) {
                results[i] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| RagError::EmbeddingService {
                    provider: self.provider.name().to_string(),
                    message: "missing embedding for input".to_string(),
                })
            })
            .collect()
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query], EmbeddingPurpose::Query).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingService {
            provider: self.provider.name().to_string(),
            message: "provider returned no embedding for query".to_string(),
        })
    }

    fn check(&self, batch: &[&str], vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != batch.len() {
            return Err(RagError::EmbeddingService {
                provider: self.provider.name().to_string(),
                message: format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            });
        }
        let expected = self.provider.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch { expected, actual: bad.len() });
        }
        Ok(())
    }
}

/// Vectors keyed by a SHA-256 of the purpose and whitespace-normalized text.
#[derive(Debug, Default)]
struct EmbeddingCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    fn key(text: &str, purpose: EmbeddingPurpose) -> String {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut hasher = Sha256::new();
        hasher.update(match purpose {
            EmbeddingPurpose::Document => b"d:",
            EmbeddingPurpose::Query => b"q:",
        });
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
