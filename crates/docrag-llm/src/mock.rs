//! Test-only deterministic embedding provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, Embeddings, InputType, RerankHit, Reranked};
use crate::sparse::tokenize;

/// Hashes tokens into a fixed number of buckets, so texts sharing words are
/// close in cosine space. Rerank scores by the fraction of query tokens found
/// in each document.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    /// Fail the n-th embed call (1-based) and every call after it.
    pub fail_on_call: Option<usize>,
    pub fail_rerank: bool,
    /// Milliseconds to sleep before every embed call.
    pub delay_ms: u64,
    embed_calls: Arc<AtomicUsize>,
    embedded_texts: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dimension: 64,
            fail_on_call: None,
            fail_rerank: false,
            delay_ms: 0,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            embedded_texts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    #[must_use]
    pub fn failing_rerank(mut self) -> Self {
        self.fail_rerank = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimension.max(1)];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            #[allow(clippy::cast_possible_truncation)]
            let idx = (bucket % v.len() as u64) as usize;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[allow(clippy::cast_precision_loss)]
fn overlap_score(query_tokens: &HashSet<String>, document: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens: HashSet<String> = tokenize(document).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|t| doc_tokens.contains(*t))
        .count();
    hits as f32 / query_tokens.len() as f32
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _input_type: InputType,
    ) -> Result<Embeddings, LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let call = self.embed_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call.is_some_and(|n| call >= n) {
            return Err(LlmError::Other(format!("mock embed failure on call {call}")));
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        let total_tokens = texts.iter().map(|t| tokenize(t).len() as u64).sum();
        Ok(Embeddings {
            embeddings: texts.iter().map(|t| self.vector_for(t)).collect(),
            total_tokens,
        })
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Reranked, LlmError> {
        if self.fail_rerank {
            return Err(LlmError::Other("mock rerank failure".into()));
        }
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let mut results: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankHit {
                index,
                relevance_score: overlap_score(&query_tokens, doc),
            })
            .collect();
        results.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then(a.index.cmp(&b.index))
        });
        results.truncate(top_k);
        let total_tokens = documents
            .iter()
            .map(|d| tokenize(d).len() as u64)
            .sum::<u64>()
            + query_tokens.len() as u64;
        Ok(Reranked {
            results,
            total_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
