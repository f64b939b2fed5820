//! # Local Knowledge Base
//!
//! Ingests a few documents into `InMemoryVectorStore`, then answers
//! questions about them. Embeddings come from a bag-of-words hasher and the
//! "language model" echoes the first passage of its context, so the demo
//! runs with **zero API keys**.
//!
//! Run: `cargo run -p kb-rag-demos --example local_kb`

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kb_rag::{
    AnswerPipeline, Document, EmbeddingProvider, EmbeddingPurpose, InMemoryVectorStore,
    IngestionPipeline, LanguageModel, Message, RagConfig, SearchFilter, StaticLoader,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hashes each lowercase word into one of `dimensions` buckets.
struct WordHashEmbedder {
    dimensions: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for WordHashEmbedder {
    async fn embed(&self, text: &str, _purpose: EmbeddingPurpose) -> kb_rag::Result<Vec<f32>> {
        let mut emb = vec![0.0f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            emb[(hasher.finish() as usize) % self.dimensions] += 1.0;
        }
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(emb)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "word-hash"
    }
}

/// Replies with the first passage of the context it was given.
struct FirstPassageModel;

#[async_trait::async_trait]
impl LanguageModel for FirstPassageModel {
    async fn generate(&self, messages: &[Message]) -> kb_rag::Result<String> {
        let context = messages
            .iter()
            .find_map(|m| m.content.strip_prefix("Context:\n"))
            .unwrap_or_default();
        Ok(context.split("\n\n").next().unwrap_or_default().to_string())
    }

    fn name(&self) -> &str {
        "first-passage"
    }
}

fn documents() -> Vec<Document> {
    vec![
        Document::new(
            "HR/leave.md",
            "Parental leave lasts sixteen weeks at full pay.\n\n\
             Annual vacation accrues at two days per month of service.",
        )
        .with_metadata("source", "HR/leave.md"),
        Document::new(
            "Finance/travel.md",
            "Travel expenses are reimbursed within thirty days.\n\n\
             Every expense claim needs an itemized receipt.",
        )
        .with_metadata("source", "Finance/travel.md"),
        Document::new(
            "IT/laptops.md",
            "Laptops are replaced every three years.\n\n\
             Lost laptops must be reported to the service desk immediately.",
        )
        .with_metadata("source", "IT/laptops.md"),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kb_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Small recursive chunks so each paragraph lands in its own record.
    let config = RagConfig::builder()
        .chunking(kb_rag::ChunkingStrategy::Recursive)
        .chunk_size(80)
        .chunk_overlap(0)
        .top_k(3)
        .similarity_threshold(0.1)
        .build()?;

    let store = Arc::new(InMemoryVectorStore::new());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(WordHashEmbedder { dimensions: 128 });

    let ingest = IngestionPipeline::builder()
        .config(config.clone())
        .embedding_provider(embedder.clone())
        .vector_store(store.clone())
        .build()?;
    let report = ingest.run(&StaticLoader::new(documents())).await;
    println!("Ingestion report:\n{}", serde_json::to_string_pretty(&report)?);

    let answers = AnswerPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_store(store)
        .language_model(Arc::new(FirstPassageModel))
        .build()?;

    for query in [
        "How long is parental leave?",
        "When are laptops replaced?",
        "What does the cafeteria serve?",
    ] {
        println!("\nQ: {query}\nA: {}", answers.respond(query).await);
    }

    let filter = SearchFilter::title("travel.md");
    let answer = answers.answer_filtered("Do I need a receipt?", 2, Some(&filter)).await?;
    println!("\nQ (travel.md only): Do I need a receipt?\nA: {answer}");

    Ok(())
}
