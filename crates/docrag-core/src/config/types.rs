use std::collections::BTreeMap;
use std::path::PathBuf;

use docrag_index::ChunkerConfig;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub voyage: VoyageConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Language the corpus is written in; queries in another language skip
    /// lexical retrieval.
    #[serde(default = "default_doc_language")]
    pub doc_language: String,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

fn default_doc_language() -> String {
    "en".into()
}

#[derive(Debug, Default, Clone)]
pub struct ResolvedSecrets {
    pub voyage_api_key: Option<Secret>,
    pub qdrant_api_key: Option<Secret>,
}

fn default_voyage_base_url() -> String {
    "https://api.voyageai.com/v1".into()
}

fn default_embed_model() -> String {
    "voyage-code-3".into()
}

fn default_rerank_model() -> String {
    "rerank-2.5".into()
}

fn default_rpm_limit() -> u32 {
    2000
}

fn default_tpm_limit() -> u64 {
    3_000_000
}

fn default_dense_dim() -> u64 {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoyageConfig {
    #[serde(default = "default_voyage_base_url")]
    pub base_url: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    #[serde(default = "default_rpm_limit")]
    pub rpm_limit: u32,
    /// Tokens per minute; `0` disables the token budget.
    #[serde(default = "default_tpm_limit")]
    pub tpm_limit: u64,
    #[serde(default = "default_dense_dim")]
    pub dense_dim: u64,
}

impl Default for VoyageConfig {
    fn default() -> Self {
        Self {
            base_url: default_voyage_base_url(),
            embed_model: default_embed_model(),
            rerank_model: default_rerank_model(),
            rpm_limit: default_rpm_limit(),
            tpm_limit: default_tpm_limit(),
            dense_dim: default_dense_dim(),
        }
    }
}

impl VoyageConfig {
    #[must_use]
    pub fn tpm(&self) -> Option<u64> {
        (self.tpm_limit > 0).then_some(self.tpm_limit)
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
        }
    }
}

fn default_chunk_size() -> usize {
    3000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

impl From<ChunkingConfig> for ChunkerConfig {
    fn from(c: ChunkingConfig) -> Self {
        Self {
            chunk_size: c.chunk_size,
            chunk_overlap: c.chunk_overlap,
            min_chunk_size: c.min_chunk_size,
        }
    }
}

fn default_max_batch_tokens() -> u64 {
    50_000
}

fn default_max_batch_items() -> usize {
    1000
}

fn default_checkpoint_every() -> usize {
    50
}

fn default_upsert_batch_size() -> usize {
    1000
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./storage/checkpoints")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: u64,
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,
    /// Save a checkpoint after this many embedding batches.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_batch_tokens: default_max_batch_tokens(),
            max_batch_items: default_max_batch_items(),
            checkpoint_every: default_checkpoint_every(),
            upsert_batch_size: default_upsert_batch_size(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

fn default_prefetch_limit() -> usize {
    20
}

fn default_result_limit() -> usize {
    5
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SearchSettings {
    /// Candidates fetched per retrieval path before rerank.
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: usize,
    #[serde(default = "default_result_limit")]
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            prefetch_limit: default_prefetch_limit(),
            default_limit: default_result_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_chunker() -> String {
    "markdown".into()
}

/// One documentation corpus and the collection it is indexed into.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    pub collection: String,
    /// Corpus root; relative paths are resolved against the config file.
    pub raw_data: PathBuf,
    #[serde(default = "default_chunker")]
    pub chunker: String,
    #[serde(default)]
    pub description: String,
    /// Only index these subdirectories of `raw_data`; empty means all.
    #[serde(default)]
    pub subdirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voyage: VoyageConfig::default(),
            qdrant: QdrantConfig::default(),
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            search: SearchSettings::default(),
            logging: LoggingConfig::default(),
            doc_language: default_doc_language(),
            projects: BTreeMap::new(),
            secrets: ResolvedSecrets::default(),
        }
    }
}
