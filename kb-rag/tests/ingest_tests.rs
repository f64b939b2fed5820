//! Ingestion pipeline tests against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FailingEmbedder, HashEmbedder, StallingEmbedder};
use kb_rag::{
    DirectoryLoader, DistanceMetric, Document, ErrorKind, InMemoryVectorStore, IngestStage,
    IngestStatus, IngestionPipeline, RagConfig, RetryPolicy, SearchFilter, StaticLoader,
    VectorStore,
};

const DIM: usize = 32;

fn config(chunk_size: usize, chunk_overlap: usize) -> RagConfig {
    RagConfig::builder()
        .chunk_size(chunk_size)
        .chunk_overlap(chunk_overlap)
        .embedding_batch_size(100)
        .ingest_concurrency(1)
        .retry(RetryPolicy::none())
        .build()
        .unwrap()
}

fn pipeline(
    config: RagConfig,
    embedder: Arc<dyn kb_rag::EmbeddingProvider>,
    store: Arc<InMemoryVectorStore>,
) -> IngestionPipeline {
    IngestionPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_store(store)
        .collection("kb")
        .build()
        .unwrap()
}

fn documents() -> Vec<Document> {
    vec![
        Document::new("handbook.md", "Employees accrue vacation monthly. ".repeat(20))
            .with_metadata("source", "HR/handbook.md"),
        Document::new("budget.md", "The travel budget covers flights and hotels. ".repeat(12))
            .with_metadata("source", "Finance/budget.md"),
    ]
}

#[tokio::test]
async fn reingesting_the_same_documents_does_not_duplicate() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(config(120, 20), Arc::new(HashEmbedder::new(DIM)), store.clone());

    let first = pipeline.ingest_documents(documents()).await;
    let after_first = store.count("kb").await.unwrap();
    let second = pipeline.ingest_documents(documents()).await;
    let after_second = store.count("kb").await.unwrap();

    assert_eq!(first.status, IngestStatus::Success);
    assert_eq!(second.status, IngestStatus::Success);
    assert_eq!(first.stored_count, first.total);
    assert_eq!(after_first, first.total);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn failed_batch_is_isolated_from_the_others() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(FailingEmbedder::new(DIM, vec![2]));
    let pipeline = pipeline(config(5, 0), embedder.clone(), store.clone());

    let report = pipeline.ingest_documents(vec![Document::new("big", "abcde".repeat(250))]).await;

    assert_eq!(report.total, 250);
    assert_eq!(report.status, IngestStatus::Partial);
    assert_eq!(report.stage, IngestStage::Errored);
    assert_eq!(report.stored_count, 150);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].batch, Some(1));
    assert_eq!(report.errors[0].stage, IngestStage::Embedding);
    assert_eq!(report.errors[0].chunks, 100);
    assert_eq!(report.errors[0].kind, ErrorKind::EmbeddingService);
    assert_eq!(embedder.calls(), 3);
    assert_eq!(store.count("kb").await.unwrap(), 150);
}

#[tokio::test(start_paused = true)]
async fn timed_out_batch_is_isolated_from_the_others() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(StallingEmbedder::new(DIM, vec![2], Duration::from_secs(5)));
    let config = RagConfig::builder()
        .chunk_size(5)
        .chunk_overlap(0)
        .embedding_batch_size(100)
        .ingest_concurrency(1)
        .request_timeout_secs(1)
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let pipeline = pipeline(config, embedder.clone(), store.clone());

    let report = pipeline.ingest_documents(vec![Document::new("big", "abcde".repeat(250))]).await;

    assert_eq!(report.status, IngestStatus::Partial);
    assert_eq!(report.stored_count, 150);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].batch, Some(1));
    assert_eq!(report.errors[0].stage, IngestStage::Embedding);
    assert_eq!(report.errors[0].kind, ErrorKind::Timeout);
    assert!(report.errors[0].message.contains("timed out"));
    assert_eq!(embedder.calls(), 3);
    assert_eq!(store.count("kb").await.unwrap(), 150);
}

#[tokio::test]
async fn every_batch_failing_is_an_error() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(FailingEmbedder::new(DIM, vec![1, 2]));
    let pipeline = pipeline(config(5, 0), embedder, store);

    let report = pipeline.ingest_documents(vec![Document::new("d", "abcde".repeat(150))]).await;

    assert_eq!(report.status, IngestStatus::Error);
    assert_eq!(report.stored_count, 0);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.errors[0].batch, Some(0));
    assert_eq!(report.errors[1].batch, Some(1));
}

#[tokio::test(start_paused = true)]
async fn transient_embedding_failures_are_retried() {
    let store = Arc::new(InMemoryVectorStore::new());
    let config = RagConfig::builder()
        .chunk_size(50)
        .chunk_overlap(0)
        .retry(RetryPolicy::exponential(2, 100, 100))
        .build()
        .unwrap();
    let pipeline = pipeline(config, Arc::new(FailingEmbedder::new(DIM, vec![1])), store);

    let report = pipeline.ingest_documents(documents()).await;

    assert_eq!(report.status, IngestStatus::Success);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn no_documents_is_a_warning() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(config(100, 0), Arc::new(HashEmbedder::new(DIM)), store);

    let report = pipeline.run(&StaticLoader::new(Vec::new())).await;

    assert_eq!(report.status, IngestStatus::Warning);
    assert_eq!(report.total, 0);
    assert_eq!(report.stored_count, 0);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn empty_documents_are_skipped() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(config(100, 0), Arc::new(HashEmbedder::new(DIM)), store);

    let report = pipeline
        .ingest_documents(vec![Document::new("blank", ""), Document::new("notes", "short note")])
        .await;

    assert_eq!(report.status, IngestStatus::Success);
    assert_eq!(report.documents, 2);
    assert_eq!(report.skipped_documents, vec!["blank".to_string()]);
    assert_eq!(report.stored_count, 1);
}

#[tokio::test]
async fn titles_derive_from_source_and_support_filtering() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let pipeline = pipeline(config(200, 0), embedder.clone(), store.clone());

    let mut blob = Document::new("q3", "quarterly revenue grew");
    blob.source_uri = Some("https://acct.blob.core.windows.net/kb/Finance/q3.pdf?sv=2024".into());
    let other = Document::new("q4", "quarterly revenue shrank").with_metadata("source", "q4.pdf");
    pipeline.ingest_documents(vec![blob, other]).await;

    let query = embedder.vector("quarterly revenue");
    let filter = SearchFilter::title("q3.pdf");
    let hits = store.search("kb", &query, 10, Some(&filter)).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.text, "quarterly revenue grew");
    assert_eq!(hits[0].payload.get("document_id"), Some("q3"));
}

#[tokio::test]
async fn loader_failure_is_reported() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(config(100, 0), Arc::new(HashEmbedder::new(DIM)), store);
    let temp = tempfile::tempdir().unwrap();

    let report = pipeline.run(&DirectoryLoader::new(temp.path().join("missing"))).await;

    assert_eq!(report.status, IngestStatus::Error);
    assert_eq!(report.errors[0].stage, IngestStage::Loading);
}

#[tokio::test]
async fn existing_collection_with_other_dimension_is_rejected() {
    let store = Arc::new(InMemoryVectorStore::new());
    store.ensure_collection("kb", DIM * 2, DistanceMetric::Cosine).await.unwrap();
    let pipeline = pipeline(config(100, 0), Arc::new(HashEmbedder::new(DIM)), store.clone());

    let report = pipeline.ingest_documents(documents()).await;

    assert_eq!(report.status, IngestStatus::Error);
    assert_eq!(report.stored_count, 0);
    assert!(report.errors[0].message.contains("Dimension mismatch"));
    assert_eq!(store.count("kb").await.unwrap(), 0);
}

#[tokio::test]
async fn directory_ingestion_end_to_end() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("policies")).unwrap();
    std::fs::write(temp.path().join("policies/leave.md"), "Parental leave lasts sixteen weeks.")
        .unwrap();
    std::fs::write(temp.path().join("readme.txt"), "ignored by the extension filter").unwrap();

    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(config(100, 10), Arc::new(HashEmbedder::new(DIM)), store.clone());
    let loader = DirectoryLoader::new(temp.path()).with_extensions(["md"]);

    let report = pipeline.run(&loader).await;

    assert_eq!(report.status, IngestStatus::Success);
    assert_eq!(report.documents, 1);
    assert_eq!(store.count("kb").await.unwrap(), 1);
}
