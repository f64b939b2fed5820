//! Error types for the `kb-rag` crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A tunable was out of range (chunk size, overlap, `top_k`, ...).
    ///
    /// Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A required collaborator (embedding gateway, vector index, language
    /// model) was not configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An error occurred during embedding generation.
    #[error("Embedding service error ({provider}): {message}")]
    EmbeddingService {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred while calling the language model.
    #[error("Language model error ({provider}): {message}")]
    LanguageModel {
        /// The model provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector's length disagrees with the collection's configured dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension configured for the collection.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A call argument was rejected before reaching the backend.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A network call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// A document source could not be read.
    #[error("Loader error ({source_path}): {message}")]
    Loader {
        /// The path or container that failed.
        source_path: String,
        /// A description of the failure.
        message: String,
    },
}

/// The variant of a [`RagError`], without its details.
///
/// Carried in reports that outlive the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfiguration,
    Configuration,
    EmbeddingService,
    VectorStore,
    LanguageModel,
    DimensionMismatch,
    InvalidArgument,
    Timeout,
    Loader,
}

impl RagError {
    /// Whether the failure may succeed on a later attempt.
    ///
    /// Only remote-service failures and timeouts qualify; configuration,
    /// argument, and dimension errors are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingService { .. }
                | RagError::VectorStore { .. }
                | RagError::LanguageModel { .. }
                | RagError::Timeout { .. }
        )
    }

    /// The variant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            RagError::Configuration(_) => ErrorKind::Configuration,
            RagError::EmbeddingService { .. } => ErrorKind::EmbeddingService,
            RagError::VectorStore { .. } => ErrorKind::VectorStore,
            RagError::LanguageModel { .. } => ErrorKind::LanguageModel,
            RagError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            RagError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RagError::Timeout { .. } => ErrorKind::Timeout,
            RagError::Loader { .. } => ErrorKind::Loader,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_and_timeouts_are_retryable() {
        let err = RagError::EmbeddingService { provider: "p".into(), message: "503".into() };
        assert!(err.is_retryable());
        let err = RagError::Timeout { operation: "search".into(), after: Duration::from_secs(1) };
        assert!(err.is_retryable());
    }

    #[test]
    fn deterministic_errors_are_not_retryable() {
        assert!(!RagError::InvalidConfiguration("x".into()).is_retryable());
        assert!(!RagError::DimensionMismatch { expected: 3, actual: 2 }.is_retryable());
        assert!(!RagError::InvalidArgument("top_k".into()).is_retryable());
    }

    #[test]
    fn kind_serializes_in_snake_case() {
        let err = RagError::Timeout { operation: "embed".into(), after: Duration::from_secs(1) };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(serde_json::to_value(err.kind()).unwrap(), "timeout");
    }

    #[test]
    fn dimension_mismatch_message_names_both_sizes() {
        let msg = RagError::DimensionMismatch { expected: 1536, actual: 768 }.to_string();
        assert!(msg.contains("1536"));
        assert!(msg.contains("768"));
    }
}
