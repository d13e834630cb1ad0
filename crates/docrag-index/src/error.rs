//! Error types for docrag-index.

use std::path::PathBuf;

use crate::indexer::BuildPhase;

/// Errors that can occur while loading, chunking, indexing or searching.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Documentation root does not exist or is not a directory.
    #[error("documentation root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// No chunking strategy registered under this name.
    #[error("unknown chunker: {0}")]
    UnknownChunker(String),

    /// Embedding or rerank provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] docrag_llm::LlmError),

    /// Vector store error.
    #[error("vector store error: {0}")]
    VectorStore(#[from] docrag_store::VectorStoreError),

    /// Checkpoint persistence error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] docrag_store::CheckpointError),

    /// Rate limiter refused a request.
    #[error("rate limit error: {0}")]
    RateLimit(#[from] crate::rate_limiter::RateLimitError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Build cancelled; progress up to `completed` chunks is checkpointed.
    #[error("index build interrupted during {phase} ({completed}/{total} chunks embedded)")]
    Interrupted {
        phase: BuildPhase,
        completed: usize,
        total: usize,
    },

    /// Build failed; progress up to `completed` chunks is checkpointed when possible.
    #[error("index build failed during {phase} ({completed}/{total} chunks embedded): {source}")]
    BuildFailed {
        phase: BuildPhase,
        completed: usize,
        total: usize,
        #[source]
        source: Box<IndexError>,
    },

    /// Sparse encoder worker panicked or was cancelled.
    #[error("sparse encoding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
