use serde::{Deserialize, Serialize};

/// Tells the embedding model which side of the retrieval pair a text is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

/// Dense vectors in input order plus the token count billed for them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Embeddings {
    pub embeddings: Vec<Vec<f32>>,
    pub total_tokens: u64,
}

/// One reranked document, `index` pointing into the submitted list.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

/// Rerank output sorted by descending relevance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reranked {
    pub results: Vec<RerankHit>,
    pub total_tokens: u64,
}

pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one dense vector per input in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or rejects the request.
    fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> impl Future<Output = crate::error::Result<Embeddings>> + Send;

    /// Score `documents` against `query` and return the best `top_k`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or rejects the request.
    fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> impl Future<Output = crate::error::Result<Reranked>> + Send;

    fn name(&self) -> &'static str;
}
