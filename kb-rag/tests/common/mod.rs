//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kb_rag::document::{IndexRecord, RecordPayload, ScoredResult};
use kb_rag::vectorstore::{CollectionInfo, DistanceMetric, SearchFilter, VectorStore};
use kb_rag::{EmbeddingProvider, EmbeddingPurpose, LanguageModel, Message, RagError, Result};

/// Bag-of-words embedder: every lowercase word is hashed into one bucket,
/// and the vector is L2-normalized. Texts sharing words score higher.
pub struct HashEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dims] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str, _purpose: EmbeddingPurpose) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        _purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Wraps a [`HashEmbedder`] and fails the batch requests whose 1-based call
/// number is listed.
pub struct FailingEmbedder {
    inner: HashEmbedder,
    fail_on: Vec<usize>,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(dims: usize, fail_on: Vec<usize>) -> Self {
        Self { inner: HashEmbedder::new(dims), fail_on, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, text: &str, purpose: EmbeddingPurpose) -> Result<Vec<f32>> {
        self.inner.embed(text, purpose).await
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(RagError::EmbeddingService {
                provider: "failing".into(),
                message: format!("forced failure on call {call}"),
            });
        }
        self.inner.embed_batch(texts, purpose).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Wraps a [`HashEmbedder`] and sleeps for `delay` before answering the batch
/// requests whose 1-based call number is listed.
pub struct StallingEmbedder {
    inner: HashEmbedder,
    stall_on: Vec<usize>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StallingEmbedder {
    pub fn new(dims: usize, stall_on: Vec<usize>, delay: Duration) -> Self {
        Self { inner: HashEmbedder::new(dims), stall_on, delay, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StallingEmbedder {
    async fn embed(&self, text: &str, purpose: EmbeddingPurpose) -> Result<Vec<f32>> {
        self.inner.embed(text, purpose).await
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stall_on.contains(&call) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.embed_batch(texts, purpose).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Language model that replies with a fixed text, or fails, and records
/// every request it receives.
pub struct RecordingLlm {
    reply: std::result::Result<String, String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl RecordingLlm {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self { reply: Ok(reply.into()), requests: Mutex::new(Vec::new()) }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self { reply: Err(message.into()), requests: Mutex::new(Vec::new()) }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.reply.clone().map_err(|message| RagError::LanguageModel {
            provider: "recording".into(),
            message,
        })
    }
}

/// Vector store that returns a fixed result list from every search and
/// counts the calls it receives.
pub struct ScriptedStore {
    dims: usize,
    results: Vec<ScoredResult>,
    pub searches: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(dims: usize, results: Vec<ScoredResult>) -> Self {
        Self { dims, results, searches: AtomicUsize::new(0) }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for ScriptedStore {
    async fn ensure_collection(
        &self,
        _name: &str,
        _dimension: usize,
        _metric: DistanceMetric,
    ) -> Result<()> {
        Ok(())
    }

    async fn collection_info(&self, _name: &str) -> Result<Option<CollectionInfo>> {
        Ok(Some(CollectionInfo { dimension: self.dims, metric: DistanceMetric::Cosine }))
    }

    async fn delete_collection(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _collection: &str, _records: &[IndexRecord]) -> Result<()> {
        Ok(())
    }

    async fn count(&self, _collection: &str) -> Result<usize> {
        Ok(self.results.len())
    }

    async fn search(
        &self,
        _collection: &str,
        _query: &[f32],
        top_k: usize,
        _filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
}

pub fn scored(text: &str, score: f32) -> ScoredResult {
    ScoredResult {
        record_id: text.to_string(),
        payload: RecordPayload::new(text, "doc.md"),
        similarity_score: score,
    }
}
