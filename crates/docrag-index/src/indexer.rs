//! Resumable hybrid index builds.
//!
//! A build embeds every chunk densely in rate-limited batches, encodes all
//! chunks sparsely on a blocking worker, then writes both vectors with the
//! chunk payload. Progress is checkpointed so an interrupted or failed build
//! resumes from the last saved batch.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use docrag_llm::{EmbeddingProvider, InputType, LlmError, SparseEncoder};
use docrag_store::{
    Checkpoint, CheckpointStatus, CheckpointStore, DenseEntry, HybridCollection, HybridPoint,
    SparseEntry, VectorStore,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::document::Chunk;
use crate::error::{IndexError, Result};
use crate::rate_limiter::RateLimiter;

const JOB_ID_SAMPLE: usize = 10;
const JOB_ID_HEX_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Init,
    Resumed,
    Fresh,
    EmbeddingDense,
    EmbeddingSparse,
    Writing,
    Done,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Resumed => "resumed",
            Self::Fresh => "fresh",
            Self::EmbeddingDense => "embedding_dense",
            Self::EmbeddingSparse => "embedding_sparse",
            Self::Writing => "writing",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub collection: String,
    pub dense_dim: u64,
    pub max_batch_tokens: u64,
    pub max_batch_items: usize,
    /// Save a checkpoint after this many dense batches.
    pub checkpoint_every: usize,
    pub upsert_batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            collection: "docs".into(),
            dense_dim: 1024,
            max_batch_tokens: 50_000,
            max_batch_items: 1000,
            checkpoint_every: 50,
            upsert_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Drop and recreate the collection before writing (ignored when resuming).
    pub recreate: bool,
    /// Ignore any existing checkpoint for this job.
    pub restart: bool,
    /// Use this job id instead of the one derived from the chunk list.
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub job_id: String,
    pub collection: String,
    pub total_chunks: usize,
    pub dense_secs: f64,
    pub sparse_secs: f64,
    pub write_secs: f64,
    pub estimated_tokens: u64,
    pub resumed: bool,
}

/// Conservative token estimate used for batching and rate limiting.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 2) as u64
}

/// Group chunks into consecutive batches bounded by an estimated token budget
/// and an item cap. A chunk over the token budget forms a batch on its own.
#[must_use]
pub fn plan_batches(chunks: &[Chunk], max_tokens: u64, max_items: usize) -> Vec<Range<usize>> {
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let cost = estimate_tokens(&chunk.content);
        let items = i - start;
        if items > 0 && (tokens + cost > max_tokens || items >= max_items) {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += cost;
    }
    if start < chunks.len() {
        batches.push(start..chunks.len());
    }
    batches
}

fn chunk_payload(chunk: &Chunk) -> HashMap<String, serde_json::Value> {
    HashMap::from([
        ("chunk_id".to_owned(), chunk.id.clone().into()),
        ("doc_id".to_owned(), chunk.doc_id.clone().into()),
        ("chunk_index".to_owned(), chunk.chunk_index.into()),
        ("content".to_owned(), chunk.content.clone().into()),
        ("category".to_owned(), chunk.metadata.category.clone().into()),
        ("file_name".to_owned(), chunk.metadata.file_name.clone().into()),
        (
            "path_hierarchy".to_owned(),
            chunk.metadata.path_hierarchy.clone().into(),
        ),
        ("chunk_type".to_owned(), chunk.kind.as_str().into()),
    ])
}

/// Keep the longest checkpoint prefix that still matches `chunks`.
///
/// Sparse vectors are only reused when they cover every chunk.
fn reconcile(mut checkpoint: Checkpoint, chunks: &[Chunk]) -> Checkpoint {
    let matching = checkpoint
        .dense
        .iter()
        .zip(chunks)
        .take_while(|(entry, chunk)| entry.chunk_id == chunk.id)
        .count();
    if matching < checkpoint.dense.len() {
        tracing::warn!(
            job_id = %checkpoint.job_id,
            kept = matching,
            stored = checkpoint.dense.len(),
            "checkpoint diverges from chunk list, discarding tail"
        );
        checkpoint.dense.truncate(matching);
    }

    let sparse_usable = checkpoint.sparse.len() == chunks.len()
        && checkpoint
            .sparse
            .iter()
            .zip(chunks)
            .all(|(entry, chunk)| entry.chunk_id == chunk.id);
    if !sparse_usable {
        checkpoint.sparse.clear();
        checkpoint.sparse_secs = 0.0;
    }
    checkpoint
}

/// Drives one index build for a collection.
pub struct Indexer<P> {
    provider: Arc<P>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimiter>,
    config: IndexerConfig,
}

impl<P> fmt::Debug for Indexer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider> Indexer<P> {
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        limiter: Arc<RateLimiter>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            provider,
            sparse,
            store,
            checkpoints,
            limiter,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Deterministic job id for a chunk list and collection.
    #[must_use]
    pub fn job_id(chunks: &[Chunk], collection: &str) -> String {
        let sample = chunks
            .iter()
            .take(JOB_ID_SAMPLE)
            .map(|c| c.id.as_str())
            .collect::<Vec<_>>()
            .join("_");
        let key = format!("{}_{collection}_{sample}", chunks.len());
        let hex = blake3::hash(key.as_bytes()).to_hex();
        format!("index_{}", &hex[..JOB_ID_HEX_LEN])
    }

    /// Embed and write `chunks` into the configured collection.
    ///
    /// The chunk order must be the same across runs that share a job id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Interrupted`] when `cancel` fires during
    /// embedding and [`IndexError::BuildFailed`] when a provider, encoder or
    /// store call fails. Both save a checkpoint first when possible.
    pub async fn build(
        &self,
        chunks: &[Chunk],
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<IndexSummary> {
        let total = chunks.len();
        let collection = self.config.collection.as_str();
        let job_id = options
            .job_id
            .clone()
            .unwrap_or_else(|| Self::job_id(chunks, collection));
        tracing::info!(
            %job_id,
            collection,
            total,
            phase = %BuildPhase::Init,
            "index build starting"
        );

        let mut checkpoint = if options.restart {
            Checkpoint::new(job_id.clone())
        } else {
            match self.load_checkpoint(&job_id).await {
                Some(stored) => reconcile(stored, chunks),
                None => Checkpoint::new(job_id.clone()),
            }
        };
        let resumed = !checkpoint.dense.is_empty() || !checkpoint.sparse.is_empty();
        let phase = if resumed {
            BuildPhase::Resumed
        } else {
            BuildPhase::Fresh
        };
        tracing::info!(
            %job_id,
            %phase,
            dense_done = checkpoint.dense.len(),
            sparse_done = !checkpoint.sparse.is_empty(),
            "build state resolved"
        );

        if let Err(e) = self
            .ensure_collection(options.recreate && !resumed)
            .await
        {
            return Err(failed(phase, checkpoint.dense.len(), total, e));
        }

        self.embed_dense(chunks, &mut checkpoint, cancel).await?;

        if cancel.is_cancelled() {
            return Err(self
                .interrupt(&mut checkpoint, BuildPhase::EmbeddingSparse, total)
                .await);
        }
        self.embed_sparse(chunks, &mut checkpoint).await?;

        let write_secs = self
            .write(chunks, &checkpoint)
            .await
            .map_err(|e| failed(BuildPhase::Writing, total, total, e))?;

        if let Err(e) = self.checkpoints.delete(&job_id).await {
            tracing::warn!(%job_id, "failed to delete checkpoint after build: {e}");
        }

        let summary = IndexSummary {
            job_id,
            collection: collection.to_owned(),
            total_chunks: total,
            dense_secs: checkpoint.dense_secs,
            sparse_secs: checkpoint.sparse_secs,
            write_secs,
            estimated_tokens: chunks.iter().map(|c| estimate_tokens(&c.content)).sum(),
            resumed,
        };
        tracing::info!(
            job_id = %summary.job_id,
            phase = %BuildPhase::Done,
            total,
            dense_secs = summary.dense_secs,
            sparse_secs = summary.sparse_secs,
            write_secs,
            "index build complete"
        );
        Ok(summary)
    }

    async fn load_checkpoint(&self, job_id: &str) -> Option<Checkpoint> {
        match self.checkpoints.load(job_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(job_id, "checkpoint unusable, starting fresh: {e}");
                None
            }
        }
    }

    async fn save_checkpoint(&self, checkpoint: &mut Checkpoint, status: CheckpointStatus) {
        checkpoint.touch(status);
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            tracing::warn!(job_id = %checkpoint.job_id, "failed to save checkpoint: {e}");
        } else {
            tracing::debug!(
                job_id = %checkpoint.job_id,
                dense = checkpoint.dense.len(),
                sparse = checkpoint.sparse.len(),
                "checkpoint saved"
            );
        }
    }

    async fn interrupt(
        &self,
        checkpoint: &mut Checkpoint,
        phase: BuildPhase,
        total: usize,
    ) -> IndexError {
        tracing::warn!(job_id = %checkpoint.job_id, %phase, "index build interrupted");
        self.save_checkpoint(checkpoint, CheckpointStatus::Interrupted)
            .await;
        IndexError::Interrupted {
            phase,
            completed: checkpoint.dense.len(),
            total,
        }
    }

    async fn ensure_collection(&self, recreate: bool) -> Result<()> {
        let collection = self.config.collection.as_str();
        let mut exists = self.store.collection_exists(collection).await?;
        if exists && recreate {
            tracing::info!(collection, "dropping collection for recreate");
            self.store.delete_collection(collection).await?;
            exists = false;
        } else if exists {
            tracing::warn!(collection, "collection exists, new points are appended");
        }
        if !exists {
            tracing::info!(collection, dense_dim = self.config.dense_dim, "creating collection");
            self.store
                .create_collection(collection, HybridCollection::new(self.config.dense_dim))
                .await?;
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String], cost: u64) -> Result<Vec<Vec<f32>>> {
        self.limiter.acquire(cost).await?;
        let result = self.provider.embed(texts, InputType::Document).await?;
        if result.embeddings.len() != texts.len() {
            return Err(LlmError::CountMismatch {
                provider: self.provider.name(),
                expected: texts.len(),
                got: result.embeddings.len(),
            }
            .into());
        }
        Ok(result.embeddings)
    }

    #[allow(clippy::cast_precision_loss)]
    async fn embed_dense(
        &self,
        chunks: &[Chunk],
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total = chunks.len();
        let start = checkpoint.dense.len();
        if start >= total {
            return Ok(());
        }

        let batches: Vec<Range<usize>> = plan_batches(
            &chunks[start..],
            self.config.max_batch_tokens,
            self.config.max_batch_items,
        )
        .into_iter()
        .map(|r| r.start + start..r.end + start)
        .collect();
        let checkpoint_every = self.config.checkpoint_every.max(1);
        let prior_secs = checkpoint.dense_secs;
        let started = Instant::now();
        tracing::info!(
            job_id = %checkpoint.job_id,
            phase = %BuildPhase::EmbeddingDense,
            remaining = total - start,
            batches = batches.len(),
            "dense embedding starting"
        );

        for (n, range) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                checkpoint.dense_secs = prior_secs + started.elapsed().as_secs_f64();
                return Err(self
                    .interrupt(checkpoint, BuildPhase::EmbeddingDense, total)
                    .await);
            }

            let batch = &chunks[range.clone()];
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let cost: u64 = batch.iter().map(|c| estimate_tokens(&c.content)).sum();

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.embed_batch(&texts, cost) => Some(result),
            };
            checkpoint.dense_secs = prior_secs + started.elapsed().as_secs_f64();

            let vectors = match outcome {
                None => {
                    return Err(self
                        .interrupt(checkpoint, BuildPhase::EmbeddingDense, total)
                        .await);
                }
                Some(Err(e)) => {
                    tracing::error!(
                        job_id = %checkpoint.job_id,
                        batch = n + 1,
                        "dense embedding failed: {e}"
                    );
                    self.save_checkpoint(
                        checkpoint,
                        CheckpointStatus::Failed {
                            error: e.to_string(),
                        },
                    )
                    .await;
                    return Err(failed(
                        BuildPhase::EmbeddingDense,
                        checkpoint.dense.len(),
                        total,
                        e,
                    ));
                }
                Some(Ok(vectors)) => vectors,
            };

            checkpoint
                .dense
                .extend(batch.iter().zip(vectors).map(|(chunk, vector)| DenseEntry {
                    chunk_id: chunk.id.clone(),
                    vector,
                }));

            if (n + 1) % checkpoint_every == 0 && checkpoint.dense.len() < total {
                self.save_checkpoint(checkpoint, CheckpointStatus::InProgress)
                    .await;
            }

            let done = checkpoint.dense.len();
            let elapsed = started.elapsed().as_secs_f64();
            let rate = (done - start) as f64 / elapsed.max(f64::EPSILON);
            tracing::info!(
                job_id = %checkpoint.job_id,
                batch = n + 1,
                batches = batches.len(),
                done,
                total,
                percent = format_args!("{:.1}", done as f64 * 100.0 / total as f64),
                elapsed_secs = format_args!("{elapsed:.1}"),
                eta_secs = format_args!("{:.1}", (total - done) as f64 / rate),
                "dense embedding progress"
            );
        }

        self.save_checkpoint(checkpoint, CheckpointStatus::InProgress)
            .await;
        Ok(())
    }

    async fn embed_sparse(&self, chunks: &[Chunk], checkpoint: &mut Checkpoint) -> Result<()> {
        let total = chunks.len();
        if checkpoint.sparse.len() == total {
            return Ok(());
        }
        tracing::info!(
            job_id = %checkpoint.job_id,
            phase = %BuildPhase::EmbeddingSparse,
            total,
            "sparse encoding starting"
        );

        let encoder = Arc::clone(&self.sparse);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let started = Instant::now();
        let vectors = match tokio::task::spawn_blocking(move || encoder.embed(&texts)).await {
            Ok(vectors) if vectors.len() == total => vectors,
            Ok(vectors) => {
                let e = IndexError::Other(format!(
                    "sparse encoder returned {} vectors for {total} texts",
                    vectors.len()
                ));
                return Err(failed(BuildPhase::EmbeddingSparse, total, total, e));
            }
            Err(e) => return Err(failed(BuildPhase::EmbeddingSparse, total, total, e.into())),
        };

        checkpoint.sparse = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| SparseEntry {
                chunk_id: chunk.id.clone(),
                vector,
            })
            .collect();
        checkpoint.sparse_secs = started.elapsed().as_secs_f64();
        self.save_checkpoint(checkpoint, CheckpointStatus::InProgress)
            .await;
        Ok(())
    }

    async fn write(&self, chunks: &[Chunk], checkpoint: &Checkpoint) -> Result<f64> {
        let collection = self.config.collection.as_str();
        let batch_size = self.config.upsert_batch_size.max(1);
        tracing::info!(
            job_id = %checkpoint.job_id,
            phase = %BuildPhase::Writing,
            collection,
            total = chunks.len(),
            "writing points"
        );

        let started = Instant::now();
        let mut written = 0;
        let mut batch = Vec::with_capacity(batch_size.min(chunks.len()));
        let rows = chunks
            .iter()
            .zip(&checkpoint.dense)
            .zip(&checkpoint.sparse);
        for ((chunk, dense), sparse) in rows {
            batch.push(HybridPoint {
                id: uuid::Uuid::new_v4().to_string(),
                dense: dense.vector.clone(),
                sparse: sparse.vector.clone(),
                payload: chunk_payload(chunk),
            });
            if batch.len() == batch_size {
                written += batch.len();
                self.store
                    .upsert(collection, std::mem::take(&mut batch))
                    .await?;
                tracing::debug!(collection, written, "upserted batch");
            }
        }
        if !batch.is_empty() {
            written += batch.len();
            self.store.upsert(collection, batch).await?;
            tracing::debug!(collection, written, "upserted batch");
        }
        Ok(started.elapsed().as_secs_f64())
    }
}

fn failed(phase: BuildPhase, completed: usize, total: usize, source: IndexError) -> IndexError {
    IndexError::BuildFailed {
        phase,
        completed,
        total,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use docrag_llm::Bm25Encoder;
    use docrag_llm::mock::MockEmbedder;
    use docrag_store::{InMemoryCheckpointStore, InMemoryVectorStore};

    use super::*;
    use crate::document::{ChunkKind, Document, DocumentMetadata};

    fn chunks(n: usize, len: usize) -> Vec<Chunk> {
        let doc = Document {
            id: "docs_guide".into(),
            content: String::new(),
            metadata: DocumentMetadata {
                category: "doc".into(),
                file_name: "guide".into(),
                path_hierarchy: vec!["docs".into()],
                relative_path: "docs/guide.md".into(),
            },
        };
        (0..n)
            .map(|i| {
                let body = format!("chunk {i} about workbooks ");
                let content: String = body.chars().cycle().take(len).collect();
                Chunk::new(&doc, i, content, ChunkKind::Docs)
            })
            .collect()
    }

    struct Fixture {
        provider: Arc<MockEmbedder>,
        store: Arc<InMemoryVectorStore>,
        checkpoints: Arc<InMemoryCheckpointStore>,
    }

    impl Fixture {
        fn new(provider: MockEmbedder) -> Self {
            Self {
                provider: Arc::new(provider),
                store: Arc::new(InMemoryVectorStore::new()),
                checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            }
        }

        fn indexer(&self, config: IndexerConfig) -> Indexer<MockEmbedder> {
            Indexer::new(
                Arc::clone(&self.provider),
                Arc::new(Bm25Encoder::default()),
                Arc::clone(&self.store) as Arc<dyn VectorStore>,
                Arc::clone(&self.checkpoints) as Arc<dyn CheckpointStore>,
                Arc::new(RateLimiter::new(10_000, None)),
                config,
            )
        }
    }

    fn small_batches() -> IndexerConfig {
        IndexerConfig {
            collection: "guide".into(),
            dense_dim: 64,
            max_batch_tokens: 100,
            max_batch_items: 2,
            checkpoint_every: 1,
            upsert_batch_size: 3,
        }
    }

    #[test]
    fn batches_close_on_items_or_tokens() {
        let c = chunks(5, 40);
        assert_eq!(plan_batches(&c, 1000, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(plan_batches(&c, 40, 10), vec![0..2, 2..4, 4..5]);
        assert_eq!(plan_batches(&c, 10, 10), vec![0..1, 1..2, 2..3, 3..4, 4..5]);
        assert!(plan_batches(&[], 10, 10).is_empty());
    }

    #[test]
    fn job_id_is_stable_and_collection_scoped() {
        let c = chunks(12, 30);
        let a = Indexer::<MockEmbedder>::job_id(&c, "guide");
        assert_eq!(a, Indexer::<MockEmbedder>::job_id(&c, "guide"));
        assert_ne!(a, Indexer::<MockEmbedder>::job_id(&c, "other"));
        assert_ne!(a, Indexer::<MockEmbedder>::job_id(&c[..11], "guide"));
        assert!(a.starts_with("index_"));
        assert_eq!(a.len(), "index_".len() + 12);
    }

    #[test]
    fn phase_display_is_snake_case() {
        assert_eq!(BuildPhase::EmbeddingDense.to_string(), "embedding_dense");
        assert_eq!(BuildPhase::Done.to_string(), "done");
    }

    #[tokio::test]
    async fn fresh_build_writes_all_points_and_clears_checkpoint() {
        let fx = Fixture::new(MockEmbedder::new(64));
        let c = chunks(7, 60);
        let summary = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total_chunks, 7);
        assert!(!summary.resumed);
        assert_eq!(summary.estimated_tokens, 7 * 30);
        assert_eq!(fx.store.point_count("guide"), Some(7));
        assert_eq!(fx.provider.embedded_texts(), 7);
        assert!(fx.checkpoints.get(&summary.job_id).is_none());
    }

    #[tokio::test]
    async fn provider_failure_saves_failed_checkpoint() {
        let fx = Fixture::new(MockEmbedder::new(64).failing_on_call(3));
        let c = chunks(7, 60);
        let err = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        let IndexError::BuildFailed {
            phase,
            completed,
            total,
            ..
        } = err
        else {
            panic!("expected BuildFailed");
        };
        assert_eq!(phase, BuildPhase::EmbeddingDense);
        assert_eq!(completed, 4);
        assert_eq!(total, 7);

        let job_id = Indexer::<MockEmbedder>::job_id(&c, "guide");
        let cp = fx.checkpoints.get(&job_id).unwrap();
        assert_eq!(cp.dense.len(), 4);
        assert!(matches!(cp.status, CheckpointStatus::Failed { .. }));
        assert_eq!(fx.store.point_count("guide"), Some(0));
    }

    #[tokio::test]
    async fn resume_embeds_only_the_remainder() {
        let fx = Fixture::new(MockEmbedder::new(64).failing_on_call(3));
        let c = chunks(7, 60);
        let _ = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &CancellationToken::new())
            .await;

        let retry = Fixture {
            provider: Arc::new(MockEmbedder::new(64)),
            store: Arc::clone(&fx.store),
            checkpoints: Arc::clone(&fx.checkpoints),
        };
        let summary = retry
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.resumed);
        assert_eq!(retry.provider.embedded_texts(), 3);
        assert_eq!(fx.store.point_count("guide"), Some(7));
    }

    #[tokio::test]
    async fn restart_ignores_checkpoint() {
        let fx = Fixture::new(MockEmbedder::new(64).failing_on_call(2));
        let c = chunks(5, 60);
        let _ = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &CancellationToken::new())
            .await;

        let retry = Fixture {
            provider: Arc::new(MockEmbedder::new(64)),
            store: Arc::clone(&fx.store),
            checkpoints: Arc::clone(&fx.checkpoints),
        };
        let options = BuildOptions {
            restart: true,
            ..BuildOptions::default()
        };
        let summary = retry
            .indexer(small_batches())
            .build(&c, &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!summary.resumed);
        assert_eq!(retry.provider.embedded_texts(), 5);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_interrupted() {
        let fx = Fixture::new(MockEmbedder::new(64));
        let c = chunks(4, 60);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Interrupted {
                phase: BuildPhase::EmbeddingDense,
                completed: 0,
                total: 4
            }
        ));
        let job_id = Indexer::<MockEmbedder>::job_id(&c, "guide");
        let cp = fx.checkpoints.get(&job_id).unwrap();
        assert_eq!(cp.status, CheckpointStatus::Interrupted);
        assert_eq!(fx.provider.embed_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_batch_keeps_completed_batches() {
        let fx = Fixture::new(MockEmbedder::new(64).with_delay(1000));
        let c = chunks(6, 60);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
            trigger.cancel();
        });
        let err = fx
            .indexer(small_batches())
            .build(&c, &BuildOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Interrupted {
                completed: 4,
                total: 6,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn diverged_checkpoint_keeps_matching_prefix() {
        let fx = Fixture::new(MockEmbedder::new(64));
        let c = chunks(4, 60);
        let job_id = "index_custom".to_owned();
        let mut cp = Checkpoint::new(job_id.clone());
        cp.dense.push(DenseEntry {
            chunk_id: c[0].id.clone(),
            vector: fx.provider.vector_for(&c[0].content),
        });
        cp.dense.push(DenseEntry {
            chunk_id: "somewhere_else_chunk9".into(),
            vector: vec![0.0; 64],
        });
        fx.checkpoints.save(&cp).await.unwrap();

        let options = BuildOptions {
            job_id: Some(job_id),
            ..BuildOptions::default()
        };
        let summary = fx
            .indexer(small_batches())
            .build(&c, &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.resumed);
        assert_eq!(fx.provider.embedded_texts(), 3);
    }

    #[tokio::test]
    async fn recreate_replaces_existing_points() {
        let fx = Fixture::new(MockEmbedder::new(64));
        let c = chunks(3, 60);
        let indexer = fx.indexer(small_batches());
        let cancel = CancellationToken::new();
        indexer
            .build(&c, &BuildOptions::default(), &cancel)
            .await
            .unwrap();
        indexer
            .build(&c, &BuildOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(fx.store.point_count("guide"), Some(6));

        let options = BuildOptions {
            recreate: true,
            ..BuildOptions::default()
        };
        indexer.build(&c, &options, &cancel).await.unwrap();
        assert_eq!(fx.store.point_count("guide"), Some(3));
    }
}
