//! Property tests for the in-memory vector store.

use std::collections::HashMap;

use kb_rag::document::{IndexRecord, RecordPayload};
use kb_rag::inmemory::InMemoryVectorStore;
use kb_rag::vectorstore::{DistanceMetric, VectorStore};
use kb_rag::RagError;
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate a record with a normalized embedding.
fn arb_record(dim: usize) -> impl Strategy<Value = IndexRecord> {
    ("[a-z]{3,8}", "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        |(id, text, vector)| IndexRecord {
            id,
            vector,
            payload: RecordPayload::new(format!("x{text}"), "doc.md"),
        },
    )
}

/// Keep the first record for every id, so upserts do not overwrite each other.
fn dedupe(records: &[IndexRecord]) -> Vec<IndexRecord> {
    let mut unique: HashMap<String, IndexRecord> = HashMap::new();
    for record in records {
        unique.entry(record.id.clone()).or_insert_with(|| record.clone());
    }
    unique.into_values().collect()
}

/// *For any* set of records stored in an InMemoryVectorStore, searching with a
/// query embedding returns results ordered by descending cosine similarity,
/// and at most `top_k` of them.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            records in proptest::collection::vec(arb_record(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique_count) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.ensure_collection("test", DIM, DistanceMetric::Cosine).await.unwrap();

                let unique = dedupe(&records);
                store.upsert("test", &unique).await.unwrap();
                let results = store.search("test", &query, top_k, None).await.unwrap();
                (results, unique.len())
            });

            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(unique_count));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].similarity_score >= window[1].similarity_score,
                    "results not in descending order: {} < {}",
                    window[0].similarity_score,
                    window[1].similarity_score,
                );
            }
        }

        #[test]
        fn upserting_twice_does_not_duplicate(
            records in proptest::collection::vec(arb_record(DIM), 1..20),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once, twice) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.ensure_collection("test", DIM, DistanceMetric::Cosine).await.unwrap();
                store.upsert("test", &records).await.unwrap();
                let once = store.count("test").await.unwrap();
                store.upsert("test", &records).await.unwrap();
                (once, store.count("test").await.unwrap())
            });

            prop_assert_eq!(once, twice);
            prop_assert_eq!(once, dedupe(&records).len());
        }
    }
}

/// *For any* collection state, a query vector whose length differs from the
/// collection dimension fails with `DimensionMismatch`.
mod prop_dimension_invariant {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn mismatched_query_always_fails(
            records in proptest::collection::vec(arb_record(DIM), 0..10),
            query_len in (0usize..32).prop_filter("wrong length", |n| *n != DIM),
            top_k in 1usize..=100,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.ensure_collection("test", DIM, DistanceMetric::Cosine).await.unwrap();
                store.upsert("test", &records).await.unwrap();
                store.search("test", &vec![0.5; query_len], top_k, None).await
            });

            let is_mismatch = matches!(
                result,
                Err(RagError::DimensionMismatch { expected: DIM, actual }) if actual == query_len
            );
            prop_assert!(is_mismatch);
        }
    }
}
