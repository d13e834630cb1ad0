use std::path::PathBuf;

use super::{Config, LogFormat};
use crate::secret::Secret;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_providers();
        self.apply_env_overrides_pipeline();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_providers(&mut self) {
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_BASE_URL") {
            self.voyage.base_url = v;
        }
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_EMBED_MODEL") {
            self.voyage.embed_model = v;
        }
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_RERANK_MODEL") {
            self.voyage.rerank_model = v;
        }
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_RPM_LIMIT") {
            if let Ok(n) = v.parse::<u32>() {
                self.voyage.rpm_limit = n;
            } else {
                tracing::warn!("ignoring invalid DOCRAG_VOYAGE_RPM_LIMIT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_TPM_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                self.voyage.tpm_limit = n;
            } else {
                tracing::warn!("ignoring invalid DOCRAG_VOYAGE_TPM_LIMIT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCRAG_DENSE_DIM")
            && let Ok(n) = v.parse::<u64>()
        {
            self.voyage.dense_dim = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_QDRANT_URL") {
            self.qdrant.url = v;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("DOCRAG_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_size = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_MIN_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.min_chunk_size = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_MAX_BATCH_TOKENS")
            && let Ok(n) = v.parse::<u64>()
        {
            self.indexing.max_batch_tokens = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_MAX_BATCH_ITEMS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.indexing.max_batch_items = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_CHECKPOINT_EVERY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.indexing.checkpoint_every = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_CHECKPOINT_DIR") {
            self.indexing.checkpoint_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DOCRAG_PREFETCH_LIMIT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.search.prefetch_limit = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_DEFAULT_LIMIT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.search.default_limit = n;
        }
        if let Ok(v) = std::env::var("DOCRAG_DOC_LANGUAGE") {
            self.doc_language = v;
        }
        if let Ok(v) = std::env::var("DOCRAG_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("DOCRAG_LOG_FORMAT") {
            match v.to_ascii_lowercase().as_str() {
                "text" => self.logging.format = LogFormat::Text,
                "json" => self.logging.format = LogFormat::Json,
                _ => tracing::warn!("ignoring invalid DOCRAG_LOG_FORMAT value: {v}"),
            }
        }
    }

    fn apply_env_secrets(&mut self) {
        if let Ok(v) = std::env::var("DOCRAG_VOYAGE_API_KEY")
            && !v.is_empty()
        {
            self.secrets.voyage_api_key = Some(Secret::new(v));
        }
        if let Ok(v) = std::env::var("DOCRAG_QDRANT_API_KEY")
            && !v.is_empty()
        {
            self.secrets.qdrant_api_key = Some(Secret::new(v));
        }
    }
}
