//! Hybrid (dense + sparse) vector storage and build checkpoints.

pub mod checkpoint;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod vector_store;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore, DenseEntry,
    FileCheckpointStore, InMemoryCheckpointStore, SparseEntry,
};
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use vector_store::{
    DENSE_VECTOR, FieldCondition, FieldValue, Fusion, HybridCollection, HybridPoint, Prefetch,
    QueryVector, RecordPoint, SPARSE_VECTOR, ScoredVectorPoint, SparseVector, VectorFilter,
    VectorStore, VectorStoreError,
};
