//! Language-adaptive hybrid retrieval with optional rerank.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use docrag_llm::{EmbeddingProvider, InputType, LlmError, SparseEncoder};
use docrag_store::{
    DENSE_VECTOR, FieldValue, Fusion, Prefetch, QueryVector, SPARSE_VECTOR, ScoredVectorPoint,
    VectorFilter, VectorStore,
};
use serde::Serialize;

use crate::error::Result;
use crate::language::{DetectLanguage, Lang};

const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub collection: String,
    /// Primary language of the indexed corpus.
    pub doc_language: Lang,
    /// Candidates fetched per vector field when reranking.
    pub prefetch_limit: usize,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            collection: "docs".into(),
            doc_language: Lang::En,
            prefetch_limit: 20,
            default_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Number of results; zero selects the configured default.
    pub limit: usize,
    pub rerank: bool,
    pub debug: bool,
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 0,
            rerank: true,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    Rrf,
    DenseOnly,
}

impl FusionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rrf => "rrf",
            Self::DenseOnly => "dense_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub doc_id: String,
    pub chunk_id: String,
    pub score: f32,
    /// 1-based position before rerank.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_rank: Option<usize>,
    pub content: String,
    pub content_preview: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TokenUsage {
    pub embed_tokens: u64,
    pub rerank_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RetrievalStats {
    pub prefetch_limit: usize,
    pub rerank_top_k: usize,
    pub final_limit: usize,
    pub candidates_count: usize,
    pub avg_chunk_length: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StageTimings {
    pub embed_ms: f64,
    pub retrieve_ms: f64,
    pub rerank_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DebugInfo {
    pub token_usage: TokenUsage,
    pub retrieval: RetrievalStats,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub search_time_ms: f64,
    pub rerank_used: bool,
    pub fusion_mode: FusionMode,
    pub detected_lang: Lang,
    pub doc_language: Lang,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

/// One stored chunk, as returned by document reassembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: u64,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn text_field(payload: &HashMap<String, serde_json::Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn metadata_of(
    payload: &HashMap<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    payload
        .iter()
        .filter(|(k, _)| k.as_str() != "content")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_owned(),
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Answers queries against one collection.
pub struct Searcher<P> {
    provider: Arc<P>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    detector: Arc<dyn DetectLanguage>,
    config: SearchConfig,
}

impl<P> fmt::Debug for Searcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Searcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider> Searcher<P> {
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        detector: Arc<dyn DetectLanguage>,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            sparse,
            store,
            detector,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Retrieve the best chunks for `request.query`.
    ///
    /// Queries in the corpus language use dense and lexical retrieval fused
    /// with RRF; other languages use dense retrieval only.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding, retrieval or rerank fails.
    #[allow(clippy::cast_precision_loss)]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let limit = if request.limit == 0 {
            self.config.default_limit.max(1)
        } else {
            request.limit
        };
        let detected = self.detector.detect(&request.query);
        let mode = if detected == self.config.doc_language {
            FusionMode::Rrf
        } else {
            FusionMode::DenseOnly
        };
        let prefetch_limit = if request.rerank {
            self.config.prefetch_limit.max(limit)
        } else {
            limit
        };

        let embed_started = Instant::now();
        let query_texts = [request.query.clone()];
        let embedded = self.provider.embed(&query_texts, InputType::Query).await?;
        let embed_tokens = embedded.total_tokens;
        let dense = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: self.provider.name(),
            })?;

        let mut prefetch = vec![Prefetch {
            using: DENSE_VECTOR.into(),
            vector: QueryVector::Dense(dense),
            limit: prefetch_limit as u64,
        }];
        if mode == FusionMode::Rrf {
            let sparse = self
                .sparse
                .embed(&query_texts)
                .into_iter()
                .next()
                .unwrap_or_default();
            if sparse.is_empty() {
                tracing::debug!("query has no lexical terms, sparse prefetch skipped");
            } else {
                prefetch.push(Prefetch {
                    using: SPARSE_VECTOR.into(),
                    vector: QueryVector::Sparse(sparse),
                    limit: prefetch_limit as u64,
                });
            }
        }
        let embed_ms = elapsed_ms(embed_started);

        let retrieve_started = Instant::now();
        let candidates = self
            .store
            .query(
                &self.config.collection,
                prefetch,
                Fusion::Rrf,
                prefetch_limit as u64,
            )
            .await?;
        let retrieve_ms = elapsed_ms(retrieve_started);
        let candidates_count = candidates.len();
        let avg_chunk_length = if candidates.is_empty() {
            0.0
        } else {
            candidates
                .iter()
                .map(|c| text_field(&c.payload, "content").chars().count())
                .sum::<usize>() as f64
                / candidates_count as f64
        };

        let rerank_started = Instant::now();
        let rerank_used = request.rerank && !candidates.is_empty();
        let mut rerank_tokens = 0;
        let mut rerank_top_k = 0;
        let ranked: Vec<(&ScoredVectorPoint, f32, Option<usize>)> = if rerank_used {
            rerank_top_k = limit.min(candidates_count);
            let documents: Vec<String> = candidates
                .iter()
                .map(|c| text_field(&c.payload, "content"))
                .collect();
            let reranked = self
                .provider
                .rerank(&request.query, &documents, rerank_top_k)
                .await?;
            rerank_tokens = reranked.total_tokens;
            reranked
                .results
                .iter()
                .filter_map(|hit| {
                    candidates
                        .get(hit.index)
                        .map(|c| (c, hit.relevance_score, Some(hit.index + 1)))
                })
                .take(rerank_top_k)
                .collect()
        } else {
            candidates
                .iter()
                .take(limit)
                .map(|c| (c, c.score, None))
                .collect()
        };
        let rerank_ms = if rerank_used {
            elapsed_ms(rerank_started)
        } else {
            0.0
        };

        let results: Vec<SearchHit> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (point, score, original_rank))| {
                let content = text_field(&point.payload, "content");
                SearchHit {
                    rank: i + 1,
                    doc_id: text_field(&point.payload, "doc_id"),
                    chunk_id: text_field(&point.payload, "chunk_id"),
                    score,
                    original_rank,
                    content_preview: preview(&content),
                    content,
                    metadata: metadata_of(&point.payload),
                }
            })
            .collect();

        let search_time_ms = elapsed_ms(started);
        tracing::info!(
            collection = %self.config.collection,
            detected = %detected,
            fusion_mode = mode.as_str(),
            candidates = candidates_count,
            results = results.len(),
            rerank_used,
            search_time_ms,
            "search complete"
        );

        let debug_info = request.debug.then(|| DebugInfo {
            token_usage: TokenUsage {
                embed_tokens,
                rerank_tokens,
                total_tokens: embed_tokens + rerank_tokens,
            },
            retrieval: RetrievalStats {
                prefetch_limit,
                rerank_top_k,
                final_limit: limit,
                candidates_count,
                avg_chunk_length,
            },
            timings: StageTimings {
                embed_ms,
                retrieve_ms,
                rerank_ms,
            },
        });

        Ok(SearchResponse {
            query: request.query.clone(),
            results,
            search_time_ms,
            rerank_used,
            fusion_mode: mode,
            detected_lang: detected,
            doc_language: self.config.doc_language,
            debug_info,
        })
    }

    /// All stored chunks of one document, in chunk order. Unknown ids yield
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector store scroll fails.
    pub async fn get_chunks_by_document(&self, doc_id: &str) -> Result<Vec<DocumentChunk>> {
        let records = self
            .store
            .scroll(
                &self.config.collection,
                VectorFilter::must_match("doc_id", FieldValue::Text(doc_id.to_owned())),
            )
            .await?;

        let mut chunks: Vec<DocumentChunk> = records
            .into_iter()
            .map(|record| DocumentChunk {
                chunk_id: text_field(&record.payload, "chunk_id"),
                doc_id: text_field(&record.payload, "doc_id"),
                chunk_index: record
                    .payload
                    .get("chunk_index")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or_default(),
                content: text_field(&record.payload, "content"),
                metadata: metadata_of(&record.payload),
            })
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        tracing::debug!(doc_id, chunks = chunks.len(), "document chunks fetched");
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use docrag_llm::Bm25Encoder;
    use docrag_llm::mock::MockEmbedder;
    use docrag_store::{
        CheckpointStore, HybridCollection, InMemoryCheckpointStore, InMemoryVectorStore,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::document::{Chunk, ChunkKind, Document, DocumentMetadata};
    use crate::error::IndexError;
    use crate::indexer::{BuildOptions, Indexer, IndexerConfig};
    use crate::language::FixedLanguage;
    use crate::rate_limiter::RateLimiter;

    const COLLECTION: &str = "reference";

    fn document(id: &str, category: &str) -> Document {
        Document {
            id: id.into(),
            content: String::new(),
            metadata: DocumentMetadata {
                category: category.into(),
                file_name: id.into(),
                path_hierarchy: vec![category.into()],
                relative_path: format!("{category}/{id}.md"),
            },
        }
    }

    fn corpus() -> Vec<Chunk> {
        let workbook = document("apis_Workbook", "api");
        let chart = document("docs_charts", "doc");
        vec![
            Chunk::new(
                &workbook,
                0,
                "Workbook open loads a workbook file from disk".into(),
                ChunkKind::ApiMembers,
            ),
            Chunk::new(
                &workbook,
                1,
                "Workbook save writes the workbook to a stream".into(),
                ChunkKind::ApiMembers,
            ),
            Chunk::new(
                &chart,
                0,
                "Charts render series with custom colors".into(),
                ChunkKind::Docs,
            ),
            Chunk::new(
                &chart,
                1,
                format!("Chart legends {}", "describe each series ".repeat(20)),
                ChunkKind::Docs,
            ),
        ]
    }

    async fn indexed_store(provider: &Arc<MockEmbedder>) -> Arc<InMemoryVectorStore> {
        build_with(provider, &corpus(), Arc::new(RateLimiter::new(1000, None))).await
    }

    async fn build_with(
        provider: &Arc<MockEmbedder>,
        chunks: &[Chunk],
        limiter: Arc<RateLimiter>,
    ) -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let indexer = Indexer::new(
            Arc::clone(provider),
            Arc::new(Bm25Encoder::default()),
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::new(InMemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
            limiter,
            IndexerConfig {
                collection: COLLECTION.into(),
                dense_dim: 64,
                ..IndexerConfig::default()
            },
        );
        indexer
            .build(chunks, &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        store
    }

    fn searcher(
        provider: Arc<MockEmbedder>,
        store: Arc<InMemoryVectorStore>,
        detected: Lang,
    ) -> Searcher<MockEmbedder> {
        Searcher::new(
            provider,
            Arc::new(Bm25Encoder::default()),
            store as Arc<dyn VectorStore>,
            Arc::new(FixedLanguage(detected)),
            SearchConfig {
                collection: COLLECTION.into(),
                ..SearchConfig::default()
            },
        )
    }

    async fn setup(detected: Lang) -> Searcher<MockEmbedder> {
        let provider = Arc::new(MockEmbedder::new(64));
        let store = indexed_store(&provider).await;
        searcher(provider, store, detected)
    }

    #[tokio::test(start_paused = true)]
    async fn search_does_not_wait_on_exhausted_build_window() {
        let provider = Arc::new(MockEmbedder::new(64));
        let limiter = Arc::new(RateLimiter::new(1, None));
        let store = build_with(&provider, &corpus()[..1], Arc::clone(&limiter)).await;
        assert!(!limiter.can_admit(1).await);

        let s = searcher(provider, store, Lang::En);
        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            let resp = s.search(&SearchRequest::new("open a workbook")).await.unwrap();
            assert!(resp.rerank_used);
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(!limiter.can_admit(1).await);
    }

    #[tokio::test]
    async fn corpus_language_uses_rrf() {
        let s = setup(Lang::En).await;
        let resp = s.search(&SearchRequest::new("open a workbook")).await.unwrap();
        assert_eq!(resp.fusion_mode, FusionMode::Rrf);
        assert_eq!(resp.detected_lang, Lang::En);
        assert_eq!(resp.doc_language, Lang::En);
        assert!(resp.rerank_used);
        assert_eq!(resp.results[0].chunk_id, "apis_Workbook_chunk0");
    }

    #[tokio::test]
    async fn other_language_uses_dense_only() {
        let s = setup(Lang::Ja).await;
        let resp = s
            .search(&SearchRequest::new("ワークブックを開く"))
            .await
            .unwrap();
        assert_eq!(resp.fusion_mode, FusionMode::DenseOnly);
        assert_eq!(resp.detected_lang, Lang::Ja);
    }

    #[tokio::test]
    async fn without_rerank_truncates_fused_list() {
        let s = setup(Lang::En).await;
        let request = SearchRequest::new("workbook chart series")
            .with_limit(2)
            .with_rerank(false);
        let resp = s.search(&request).await.unwrap();
        assert!(!resp.rerank_used);
        assert_eq!(resp.results.len(), 2);
        assert!(resp.results.iter().all(|h| h.original_rank.is_none()));
        assert_eq!(resp.results[0].rank, 1);
        assert!(resp.results[0].score >= resp.results[1].score);
    }

    #[tokio::test]
    async fn rerank_never_exceeds_candidates() {
        let s = setup(Lang::En).await;
        let request = SearchRequest::new("workbook").with_limit(50).with_debug(true);
        let resp = s.search(&request).await.unwrap();
        let debug = resp.debug_info.unwrap();
        assert!(resp.results.len() <= debug.retrieval.candidates_count);
        assert_eq!(debug.retrieval.rerank_top_k, debug.retrieval.candidates_count);
        assert!(resp.results.iter().all(|h| h.original_rank.is_some()));
        for pair in resp.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn debug_info_only_on_request() {
        let s = setup(Lang::En).await;
        let plain = s.search(&SearchRequest::new("workbook")).await.unwrap();
        assert!(plain.debug_info.is_none());

        let debug = s
            .search(&SearchRequest::new("workbook").with_debug(true))
            .await
            .unwrap()
            .debug_info
            .unwrap();
        assert_eq!(debug.retrieval.prefetch_limit, 20);
        assert_eq!(debug.retrieval.final_limit, 5);
        assert!(debug.token_usage.embed_tokens > 0);
        assert_eq!(
            debug.token_usage.total_tokens,
            debug.token_usage.embed_tokens + debug.token_usage.rerank_tokens
        );
        assert!(debug.retrieval.avg_chunk_length > 0.0);
    }

    #[tokio::test]
    async fn long_content_gets_truncated_preview() {
        let s = setup(Lang::En).await;
        let resp = s
            .search(&SearchRequest::new("legends describe each series").with_limit(4))
            .await
            .unwrap();
        let legend = resp
            .results
            .iter()
            .find(|h| h.chunk_id == "docs_charts_chunk1")
            .unwrap();
        assert!(legend.content.chars().count() > 300);
        assert_eq!(legend.content_preview.chars().count(), 303);
        assert!(legend.content_preview.ends_with("..."));
        assert!(!legend.metadata.contains_key("content"));
        assert_eq!(legend.metadata["category"], "doc");
    }

    #[tokio::test]
    async fn empty_collection_yields_no_results() {
        let provider = Arc::new(MockEmbedder::new(64));
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .create_collection(COLLECTION, HybridCollection::new(64))
            .await
            .unwrap();
        let s = searcher(provider, store, Lang::En);
        let resp = s.search(&SearchRequest::new("anything")).await.unwrap();
        assert!(resp.results.is_empty());
        assert!(!resp.rerank_used);
    }

    #[tokio::test]
    async fn rerank_failure_is_an_error() {
        let provider = Arc::new(MockEmbedder::new(64));
        let store = indexed_store(&provider).await;
        let failing = Arc::new(MockEmbedder::new(64).failing_rerank());
        let s = searcher(failing, store, Lang::En);
        let err = s.search(&SearchRequest::new("workbook")).await.unwrap_err();
        assert!(matches!(err, IndexError::Llm(_)));
    }

    #[tokio::test]
    async fn chunks_by_document_in_order() {
        let s = setup(Lang::En).await;
        let chunks = s.get_chunks_by_document("apis_Workbook").await.unwrap();
        let ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["apis_Workbook_chunk0", "apis_Workbook_chunk1"]);
        assert_eq!(chunks[1].chunk_index, 1);

        assert!(s.get_chunks_by_document("missing").await.unwrap().is_empty());
    }

    #[test]
    fn preview_keeps_short_content() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(301);
        assert_eq!(preview(&long), format!("{}...", "é".repeat(300)));
    }
}
