//! # kb-rag
//!
//! Retrieval-Augmented Generation over a knowledge base held in a vector index.
//!
//! ## Overview
//!
//! Two pipelines share a set of injected service handles:
//!
//! - [`IngestionPipeline`] - load → chunk → embed → store, in bounded batches
//!   with per-batch failure accounting
//! - [`AnswerPipeline`] - embed query → search → assemble context → generate,
//!   with a fixed fallback when nothing relevant is found
//!
//! The external services sit behind traits so tests and deployments can swap them:
//!
//! | Trait | Implementations |
//! |-------|-----------------|
//! | [`EmbeddingProvider`] | `openai::OpenAIEmbeddingProvider` (feature `openai`) |
//! | [`VectorStore`] | [`InMemoryVectorStore`], `qdrant::QdrantVectorStore` (feature `qdrant`) |
//! | [`LanguageModel`] | `openai::OpenAIChatModel` (feature `openai`) |
//! | [`DocumentLoader`] | [`DirectoryLoader`], [`StaticLoader`] |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kb_rag::{AnswerPipeline, DirectoryLoader, InMemoryVectorStore, IngestionPipeline, RagConfig};
//!
//! let store = Arc::new(InMemoryVectorStore::new());
//! let ingest = IngestionPipeline::builder()
//!     .embedding_provider(embedder.clone())
//!     .vector_store(store.clone())
//!     .build()?;
//! let report = ingest.run(&DirectoryLoader::new("./docs").with_extensions(["md"])).await;
//!
//! let answers = AnswerPipeline::builder()
//!     .embedding_provider(embedder)
//!     .vector_store(store)
//!     .language_model(llm)
//!     .build()?;
//! println!("{}", answers.respond("What changed in Q3?").await);
//! ```
//!
//! ## Features
//!
//! - `openai` - OpenAI embeddings and chat completions via `reqwest`
//! - `qdrant` - Qdrant vector store via `qdrant-client`
//! - `full` - everything

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod ingest;
pub mod llm;
pub mod loader;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "qdrant")]
pub mod qdrant;
pub mod retry;
pub mod vectorstore;

pub use answer::{
    ANSWER_FAILED, AnswerPipeline, AnswerPipelineBuilder, NO_RELEVANT_INFORMATION,
    assemble_context, normalize_answer,
};
pub use chunking::{Chunker, ChunkingStrategy, FixedSizeChunker, RecursiveChunker, chunk_id};
pub use config::{RagConfig, RagConfigBuilder, ServiceConfig};
pub use document::{Chunk, Document, Embedding, IndexRecord, RecordPayload, ScoredResult};
pub use embedding::{EmbeddingGateway, EmbeddingProvider, EmbeddingPurpose};
pub use error::{ErrorKind, RagError, Result};
pub use inmemory::InMemoryVectorStore;
pub use ingest::{
    IngestError, IngestReport, IngestStage, IngestStatus, IngestionPipeline,
    IngestionPipelineBuilder,
};
pub use llm::{LanguageModel, Message, Role};
pub use loader::{DirectoryLoader, DocumentLoader, StaticLoader};
pub use retry::RetryPolicy;
pub use vectorstore::{CollectionInfo, DistanceMetric, FieldMatch, SearchFilter, VectorStore};
