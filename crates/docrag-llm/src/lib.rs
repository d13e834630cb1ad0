//! Embedding, rerank and sparse encoding providers.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;
pub mod sparse;
pub mod voyage;

pub use error::LlmError;
pub use provider::{EmbeddingProvider, Embeddings, InputType, RerankHit, Reranked};
pub use sparse::{Bm25Encoder, SparseEncoder, SparseVector};
pub use voyage::VoyageProvider;
