//! Retrieval and answer pipeline: embed query → search → assemble context → generate.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{AnswerPipeline, InMemoryVectorStore, RagConfig};
//!
//! let pipeline = AnswerPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(store.clone())
//!     .language_model(Arc::new(my_llm))
//!     .build()?;
//!
//! let answer = pipeline.answer("What was Q3 revenue?").await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_COLLECTION, RagConfig};
use crate::document::ScoredResult;
use crate::embedding::{EmbeddingGateway, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::llm::{LanguageModel, Message};
use crate::retry::call_with_policy;
use crate::vectorstore::{SearchFilter, VectorStore, validate_top_k};

/// Returned when nothing relevant was retrieved.
pub const NO_RELEVANT_INFORMATION: &str =
    "I'm sorry, but I couldn't find any relevant information to answer your question.";

/// Returned by [`AnswerPipeline::respond`] when answering fails.
pub const ANSWER_FAILED: &str =
    "I'm sorry, something went wrong while answering your question. Please try again later.";

/// System instruction for the answer call.
pub const ANSWER_INSTRUCTIONS: &str = "Use the provided context to return a helpful answer for \
    the user's query. Format the response clearly and concisely. If the answer is not within \
    context, respond with: I'm sorry, but I couldn't find any relevant information to answer \
    your question.";

/// System instruction for the optional summarization call.
pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes context for downstream QA.";

/// Task description for the optional summarization call.
pub const SUMMARY_INSTRUCTIONS: &str = "Read the provided context and rewrite it concisely as \
    one clear summary. Avoid speculation.";

/// Separator placed between retrieved passages.
const PASSAGE_SEPARATOR: &str = "\n\n";

/// Concatenate result texts in descending-score order and cut the result to
/// `max_chars` characters.
///
/// Results with equal scores keep their input order. Truncation applies to
/// the joined string, so only the tail of the lowest-ranked passages is lost.
pub fn assemble_context(results: &[ScoredResult], max_chars: usize) -> String {
    let mut ranked: Vec<&ScoredResult> = results.iter().collect();
    ranked.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));

    let joined =
        ranked.iter().map(|r| r.payload.text.as_str()).collect::<Vec<_>>().join(PASSAGE_SEPARATOR);
    match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => joined[..cut].to_string(),
        None => joined,
    }
}

/// Collapse newlines to spaces and trim.
pub fn normalize_answer(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ").trim().to_string()
}

fn normalize_query(query: &str) -> String {
    query.replace('\n', " ").trim().to_string()
}

/// Answers queries from a vector index populated by an
/// [`IngestionPipeline`](crate::ingest::IngestionPipeline).
///
/// Collaborators are optional at construction time and checked on every
/// call before any network request is made. Each call is independent, so one
/// pipeline can serve concurrent queries.
pub struct AnswerPipeline {
    config: RagConfig,
    gateway: Option<EmbeddingGateway>,
    vector_store: Option<Arc<dyn VectorStore>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    summarizer: Option<Arc<dyn LanguageModel>>,
    collection: String,
}

impl AnswerPipeline {
    /// Create a new [`AnswerPipelineBuilder`].
    pub fn builder() -> AnswerPipelineBuilder {
        AnswerPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Answer `query` using the configured `top_k`.
    ///
    /// Returns [`NO_RELEVANT_INFORMATION`] when nothing relevant is found.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a collaborator is missing, and
    /// the underlying service error if embedding, search, or generation fails.
    pub async fn answer(&self, query: &str) -> Result<String> {
        self.answer_filtered(query, self.config.top_k, None).await
    }

    /// Answer `query` from the `top_k` most similar passages.
    pub async fn answer_with_top_k(&self, query: &str, top_k: usize) -> Result<String> {
        self.answer_filtered(query, top_k, None).await
    }

    /// Answer `query` from passages matching `filter`.
    ///
    /// The query is embedded with its newlines joined, but the model receives
    /// it only trimmed.
    pub async fn answer_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<String> {
        let language_model = self.language_model()?;
        let results = self.retrieve(query, top_k, filter).await?;
        if results.is_empty() {
            info!(top_k, "no relevant passages found");
            return Ok(NO_RELEVANT_INFORMATION.to_string());
        }

        let mut context = assemble_context(&results, self.config.max_context_chars);
        debug!(
            passages = results.len(),
            context_chars = context.chars().count(),
            "assembled context"
        );

        if self.config.summarize_context {
            match self.summarize(&context).await {
                Ok(summary) if !summary.trim().is_empty() => context = summary,
                Ok(_) => {
                    warn!("summarizer returned an empty summary");
                    return Ok(NO_RELEVANT_INFORMATION.to_string());
                }
                Err(e) => {
                    warn!(error = %e, "summarization failed");
                    return Ok(NO_RELEVANT_INFORMATION.to_string());
                }
            }
        }

        let messages = [
            Message::system(ANSWER_INSTRUCTIONS),
            Message::developer(format!("Context:\n{context}")),
            Message::user(query.trim()),
        ];
        let reply = self.call("generate", || language_model.generate(&messages)).await?;

        let answer = normalize_answer(&reply);
        if answer.is_empty() {
            warn!(model = language_model.name(), "language model returned an empty answer");
            return Ok(NO_RELEVANT_INFORMATION.to_string());
        }
        Ok(answer)
    }

    /// Answer `query`, converting every failure into [`ANSWER_FAILED`].
    ///
    /// The internal error is logged and never returned to the caller.
    pub async fn respond(&self, query: &str) -> String {
        match self.answer(query).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "failed to answer query");
                ANSWER_FAILED.to_string()
            }
        }
    }

    /// Embed `query` and return the matching passages, most similar first.
    ///
    /// Results below the configured similarity threshold are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the embedding gateway or vector
    /// store is missing, [`RagError::InvalidArgument`] for an empty query or a
    /// `top_k` outside `1..=100`, and the service error if a call fails.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredResult>> {
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            RagError::Configuration("no embedding gateway configured".to_string())
        })?;
        let vector_store = self
            .vector_store
            .as_ref()
            .ok_or_else(|| RagError::Configuration("no vector store configured".to_string()))?;
        validate_top_k(top_k)?;

        let query = normalize_query(query);
        if query.is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".to_string()));
        }

        let embedding = self.call("embed_query", || gateway.embed_query(&query)).await?;
        let mut results = self
            .call("search", || vector_store.search(&self.collection, &embedding, top_k, filter))
            .await?;

        if let Some(threshold) = self.config.similarity_threshold {
            results.retain(|r| r.similarity_score >= threshold);
        }
        debug!(collection = %self.collection, top_k, found = results.len(), "retrieved passages");
        Ok(results)
    }

    async fn summarize(&self, context: &str) -> Result<String> {
        let summarizer = match self.summarizer.as_ref() {
            Some(summarizer) => summarizer,
            None => self.language_model()?,
        };
        let messages = [
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::developer(SUMMARY_INSTRUCTIONS),
            Message::user(format!("Context:\n{context}")),
        ];
        let summary = self.call("summarize", || summarizer.generate(&messages)).await?;
        Ok(summary.trim().to_string())
    }

    fn language_model(&self) -> Result<&Arc<dyn LanguageModel>> {
        self.language_model
            .as_ref()
            .ok_or_else(|| RagError::Configuration("no language model configured".to_string()))
    }

    async fn call<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call_with_policy(&self.config.retry, self.config.request_timeout(), operation, f).await
    }
}

/// Builder for [`AnswerPipeline`].
#[derive(Default)]
pub struct AnswerPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    gateway: Option<EmbeddingGateway>,
    vector_store: Option<Arc<dyn VectorStore>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    summarizer: Option<Arc<dyn LanguageModel>>,
    collection: Option<String>,
}

impl AnswerPipelineBuilder {
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

    /// Use an existing gateway.
    pub fn gateway(mut self, gateway: EmbeddingGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the vector store.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the model that writes answers.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Set the model used for context summarization. Defaults to the answer model.
    pub fn summarizer(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.summarizer = Some(model);
        self
    }

    /// Set the collection to search. Defaults to `knowledge_base`.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if the configuration fails
    /// validation. Missing collaborators are reported when the pipeline is used.
    pub fn build(self) -> Result<AnswerPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let gateway = self.gateway.or_else(|| {
            self.embedding_provider.map(|provider| {
                let gateway = EmbeddingGateway::new(provider, config.embedding_batch_size);
                if config.embedding_cache { gateway.with_cache() } else { gateway }
            })
        });

        Ok(AnswerPipeline {
            config,
            gateway,
            vector_store: self.vector_store,
            language_model: self.language_model,
            summarizer: self.summarizer,
            collection: self.collection.unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        })
    }
}
