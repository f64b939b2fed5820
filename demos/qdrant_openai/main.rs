//! # Qdrant + OpenAI
//!
//! Ingests a directory of text files into a Qdrant collection using OpenAI
//! embeddings, then answers questions with an OpenAI chat model.
//!
//! Requires a running Qdrant (`docker run -p 6334:6334 qdrant/qdrant`) and
//! `OPENAI_API_KEY`. Settings are read from the environment or a `.env`
//! file; see `ServiceConfig::from_lookup` for the recognised keys.
//!
//! Run:
//! ```text
//! cargo run -p kb-rag-demos --example qdrant_openai --features full -- ./docs "What changed in Q3?"
//! ```
//!
//! Pass `--ask-only` as the first argument to skip ingestion.

use std::sync::Arc;

use anyhow::Context;
use kb_rag::openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
use kb_rag::qdrant::QdrantVectorStore;
use kb_rag::{
    AnswerPipeline, DirectoryLoader, IngestStatus, IngestionPipeline, RagConfig, ServiceConfig,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kb_rag=info,qdrant_openai=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next().context("usage: qdrant_openai <docs-dir | --ask-only> <question>")?;
    let question = args.collect::<Vec<_>>().join(" ");

    let rag = RagConfig::from_env()?;
    let services = ServiceConfig::from_env()?;
    info!(?services, "loaded service configuration");

    let embedder = Arc::new(OpenAIEmbeddingProvider::from_config(&services)?);
    let store = Arc::new(QdrantVectorStore::from_config(&services)?);

    if first != "--ask-only" {
        let ingest = IngestionPipeline::builder()
            .config(rag.clone())
            .embedding_provider(embedder.clone())
            .vector_store(store.clone())
            .collection(&services.collection)
            .build()?;
        let loader = DirectoryLoader::new(&first).with_extensions(["md", "txt"]);
        let report = ingest.run(&loader).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.status == IngestStatus::Error {
            anyhow::bail!("ingestion of {first} failed");
        }
    }

    if question.trim().is_empty() {
        return Ok(());
    }

    let answers = AnswerPipeline::builder()
        .config(rag)
        .embedding_provider(embedder)
        .vector_store(store)
        .language_model(Arc::new(OpenAIChatModel::from_config(&services, &services.chat_model)?))
        .summarizer(Arc::new(OpenAIChatModel::from_config(&services, &services.summary_model)?))
        .collection(&services.collection)
        .build()?;

    println!("{}", answers.respond(&question).await);
    Ok(())
}
