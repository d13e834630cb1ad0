//! Documentation retrieval pipeline.
//!
//! Documents are loaded and cleaned, split into chunks by a category-aware
//! strategy, embedded into dense and sparse vectors under a shared rate
//! limit, and written to a hybrid collection. Queries are routed to hybrid
//! (RRF) or dense-only retrieval depending on their language, then reranked.

pub mod chunker;
pub mod document;
pub mod error;
pub mod indexer;
pub mod language;
pub mod rate_limiter;
pub mod searcher;

pub use chunker::{ApiReferenceChunker, Chunker, ChunkerConfig, MarkdownChunker, create_chunker};
pub use document::{Chunk, ChunkKind, Document, DocumentLoader, DocumentMetadata};
pub use error::{IndexError, Result};
pub use indexer::{
    BuildOptions, BuildPhase, IndexSummary, Indexer, IndexerConfig, estimate_tokens, plan_batches,
};
pub use language::{
    DetectLanguage, FixedLanguage, Lang, LinguaDetector, UnknownLanguage, shared_detector,
};
pub use rate_limiter::{RateLimitError, RateLimitStats, RateLimiter};
pub use searcher::{
    DebugInfo, DocumentChunk, FusionMode, SearchConfig, SearchHit, SearchRequest, SearchResponse,
    Searcher,
};
