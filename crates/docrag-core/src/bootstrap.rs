//! Pipeline wiring: providers, stores and per-build rate limiting.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, bail};
use docrag_index::{
    BuildOptions, DetectLanguage, DocumentLoader, IndexSummary, Indexer, IndexerConfig,
    RateLimiter, SearchConfig, Searcher, create_chunker, shared_detector,
};
use docrag_llm::{Bm25Encoder, EmbeddingProvider, SparseEncoder, VoyageProvider};
use docrag_store::{CheckpointStore, FileCheckpointStore, QdrantOps, VectorStore};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError, ProjectConfig};

/// Everything a command needs, built once per process.
///
/// Each indexing build gets its own rate-limit window sized from
/// `config.voyage`; searches are not paced.
pub struct AppContext<P> {
    config: Config,
    provider: Arc<P>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    detector: Arc<dyn DetectLanguage>,
}

impl<P> fmt::Debug for AppContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("projects", &self.config.projects.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl AppContext<VoyageProvider> {
    /// Wire the Voyage provider, BM25 encoder, Qdrant store and file checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the Voyage API key is
    /// missing, or a client cannot be constructed.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let api_key = config
            .secrets
            .voyage_api_key
            .as_ref()
            .ok_or(ConfigError::MissingSecret("DOCRAG_VOYAGE_API_KEY"))?;

        let provider = VoyageProvider::new(
            api_key.expose().to_owned(),
            config.voyage.base_url.clone(),
            config.voyage.embed_model.clone(),
            config.voyage.rerank_model.clone(),
        )
        .context("failed to build Voyage client")?;

        let qdrant_key = config.secrets.qdrant_api_key.as_ref().map(|s| s.expose());
        let store = QdrantOps::new(&config.qdrant.url, qdrant_key).map_err(|e| {
            anyhow::anyhow!("failed to create Qdrant client for {}: {e}", config.qdrant.url)
        })?;
        let checkpoints = FileCheckpointStore::new(config.indexing.checkpoint_dir.clone());

        tracing::info!(
            qdrant = %config.qdrant.url,
            embed_model = %config.voyage.embed_model,
            rpm = config.voyage.rpm_limit,
            "pipeline ready"
        );
        Ok(Self::with_parts(
            config,
            Arc::new(provider),
            Arc::new(store),
            Arc::new(checkpoints),
        ))
    }
}

impl<P: EmbeddingProvider> AppContext<P> {
    /// Assemble a context from explicit parts, with BM25 sparse encoding and
    /// the shared language detector.
    #[must_use]
    pub fn with_parts(
        config: Config,
        provider: Arc<P>,
        store: Arc<dyn VectorStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            provider,
            sparse: Arc::new(Bm25Encoder::default()),
            store,
            checkpoints,
            detector: shared_detector(),
        }
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn DetectLanguage>) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configured projects in name order.
    pub fn projects(&self) -> impl Iterator<Item = (&str, &ProjectConfig)> {
        self.config.projects.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Load, chunk and index one project into its collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown, its corpus yields no
    /// documents, or the build fails or is cancelled. Build errors keep their
    /// [`docrag_index::IndexError`] so callers can tell interruption apart.
    pub async fn index_project(
        &self,
        name: &str,
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> anyhow::Result<IndexSummary> {
        let project = self.config.project(name)?;
        let loader = DocumentLoader::new(&project.raw_data)?;
        let docs = loader.load(Some(project.subdirs.as_slice())).await;
        if docs.is_empty() {
            bail!(
                "no documents found for project '{name}' under {}",
                project.raw_data.display()
            );
        }

        let chunker = create_chunker(&project.chunker, self.config.chunking.into())?;
        let chunks = chunker.chunk_all(&docs);
        if chunks.is_empty() {
            bail!("project '{name}' produced no chunks");
        }

        tracing::info!(
            project = name,
            collection = %project.collection,
            documents = docs.len(),
            chunks = chunks.len(),
            "indexing project"
        );
        let summary = self
            .indexer(project)
            .build(&chunks, options, cancel)
            .await
            .with_context(|| format!("indexing project '{name}' failed"))?;
        Ok(summary)
    }

    fn indexer(&self, project: &ProjectConfig) -> Indexer<P> {
        let indexing = &self.config.indexing;
        let voyage = &self.config.voyage;
        Indexer::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.sparse),
            Arc::clone(&self.store),
            Arc::clone(&self.checkpoints),
            Arc::new(RateLimiter::new(voyage.rpm_limit, voyage.tpm())),
            IndexerConfig {
                collection: project.collection.clone(),
                dense_dim: voyage.dense_dim,
                max_batch_tokens: indexing.max_batch_tokens,
                max_batch_items: indexing.max_batch_items,
                checkpoint_every: indexing.checkpoint_every,
                upsert_batch_size: indexing.upsert_batch_size,
            },
        )
    }

    /// Searcher over the project's collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown or `doc_language` is invalid.
    pub fn searcher(&self, name: &str) -> Result<Searcher<P>, ConfigError> {
        let project = self.config.project(name)?;
        Ok(Searcher::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.sparse),
            Arc::clone(&self.store),
            Arc::clone(&self.detector),
            SearchConfig {
                collection: project.collection.clone(),
                doc_language: self.config.doc_language()?,
                prefetch_limit: self.config.search.prefetch_limit,
                default_limit: self.config.search.default_limit,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use docrag_index::{FixedLanguage, FusionMode, IndexError, Lang, SearchRequest};
    use docrag_llm::mock::MockEmbedder;
    use docrag_store::{InMemoryCheckpointStore, InMemoryVectorStore};

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn project(collection: &str, raw_data: &Path, subdirs: &[&str]) -> ProjectConfig {
        ProjectConfig {
            collection: collection.into(),
            raw_data: raw_data.to_path_buf(),
            chunker: "markdown".into(),
            description: String::new(),
            subdirs: subdirs.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    fn context(root: &Path) -> (AppContext<MockEmbedder>, Arc<InMemoryVectorStore>) {
        context_with_rpm(root, Config::default().voyage.rpm_limit)
    }

    fn context_with_rpm(
        root: &Path,
        rpm_limit: u32,
    ) -> (AppContext<MockEmbedder>, Arc<InMemoryVectorStore>) {
        let mut config = Config::default();
        config.voyage.rpm_limit = rpm_limit;
        config.voyage.dense_dim = 32;
        config.chunking.min_chunk_size = 10;
        config
            .projects
            .insert("guides".into(), project("guides", root, &["docs"]));
        config
            .projects
            .insert("empty".into(), project("empty", root, &["missing"]));
        let store = Arc::new(InMemoryVectorStore::new());
        let ctx = AppContext::with_parts(
            config,
            Arc::new(MockEmbedder::new(32)),
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .with_detector(Arc::new(FixedLanguage(Lang::En)));
        (ctx, store)
    }

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "docs/charts.md",
            "# Charts\n\nCharts visualise worksheet data as bars, lines or pies.",
        );
        write(
            dir.path(),
            "docs/formulas.md",
            "# Formulas\n\nFormulas are recalculated whenever a referenced cell changes.",
        );
        write(
            dir.path(),
            "apis/Ignored.md",
            "# Ignored\n\nOutside the configured subdirectories.",
        );
        dir
    }

    #[tokio::test]
    async fn index_then_search_project() {
        let dir = corpus();
        let (ctx, store) = context(dir.path());

        let summary = ctx
            .index_project("guides", &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.collection, "guides");
        assert_eq!(summary.total_chunks, 2);
        assert_eq!(store.point_count("guides"), Some(2));

        let searcher = ctx.searcher("guides").unwrap();
        let response = searcher
            .search(&SearchRequest::new("when are formulas recalculated"))
            .await
            .unwrap();
        assert_eq!(response.fusion_mode, FusionMode::Rrf);
        assert_eq!(response.results[0].doc_id, "docs_formulas");
    }

    #[tokio::test(start_paused = true)]
    async fn builds_and_searches_do_not_share_a_rate_limit_window() {
        let dir = corpus();
        let (ctx, store) = context_with_rpm(dir.path(), 1);
        let options = BuildOptions {
            recreate: true,
            restart: true,
            ..BuildOptions::default()
        };

        let started = tokio::time::Instant::now();
        for _ in 0..2 {
            ctx.index_project("guides", &options, &CancellationToken::new())
                .await
                .unwrap();
        }
        let searcher = ctx.searcher("guides").unwrap();
        for _ in 0..2 {
            searcher
                .search(&SearchRequest::new("when are formulas recalculated"))
                .await
                .unwrap();
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(store.point_count("guides"), Some(2));
    }

    #[tokio::test]
    async fn unknown_project_is_reported() {
        let dir = corpus();
        let (ctx, _) = context(dir.path());

        let err = ctx
            .index_project("nope", &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownProject { .. })
        ));
        assert!(matches!(
            ctx.searcher("nope"),
            Err(ConfigError::UnknownProject { .. })
        ));
    }

    #[tokio::test]
    async fn empty_corpus_is_an_error() {
        let dir = corpus();
        let (ctx, _) = context(dir.path());

        let err = ctx
            .index_project("empty", &BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no documents found"));
    }

    #[tokio::test]
    async fn cancelled_build_keeps_index_error() {
        let dir = corpus();
        let (ctx, _) = context(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx
            .index_project("guides", &BuildOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Interrupted { .. })
        ));
    }

    #[test]
    fn projects_listed_in_name_order() {
        let dir = corpus();
        let (ctx, _) = context(dir.path());
        let names: Vec<&str> = ctx.projects().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["empty", "guides"]);
    }

    #[test]
    fn from_config_requires_api_key() {
        let err = AppContext::from_config(Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingSecret("DOCRAG_VOYAGE_API_KEY"))
        ));
    }
}
