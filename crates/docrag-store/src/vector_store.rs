use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub use docrag_llm::SparseVector;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("scroll error: {0}")]
    Scroll(String),
}

/// Name of the dense (cosine) vector field of every hybrid collection.
pub const DENSE_VECTOR: &str = "dense";
/// Name of the sparse (IDF-weighted) vector field of every hybrid collection.
pub const SPARSE_VECTOR: &str = "sparse";

/// Layout of a hybrid collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridCollection {
    pub dense_dim: u64,
}

impl HybridCollection {
    #[must_use]
    pub fn new(dense_dim: u64) -> Self {
        Self { dense_dim }
    }
}

/// A point carrying both representations of one chunk.
#[derive(Debug, Clone)]
pub struct HybridPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

/// One candidate retrieval over a named vector field.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub using: String,
    pub vector: QueryVector,
    pub limit: u64,
}

/// How prefetch candidate lists are merged into one ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fusion {
    Rrf,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn must_match(field: impl Into<String>, value: FieldValue) -> Self {
        Self {
            must: vec![FieldCondition {
                field: field.into(),
                value,
            }],
            must_not: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RecordPoint {
    pub id: String,
    pub payload: HashMap<String, serde_json::Value>,
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn create_collection(
        &self,
        collection: &str,
        layout: HybridCollection,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or replace points; resolves once the write is visible to queries.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<HybridPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Run every prefetch, fuse the candidate lists and return the best `limit`.
    ///
    /// A single prefetch is run directly and keeps its similarity score.
    fn query(
        &self,
        collection: &str,
        prefetch: Vec<Prefetch>,
        fusion: Fusion,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Return every point matching `filter`, payload only.
    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<Vec<RecordPoint>, VectorStoreError>>;
}
