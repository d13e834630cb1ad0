mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::Context;
use docrag_index::Lang;

const DEFAULT_CONFIG_PATH: &str = "config/docrag.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown project '{name}' (available: {})", available.join(", "))]
    UnknownProject { name: String, available: Vec<String> },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing secret: set {0}")]
    MissingSecret(&'static str),
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist. Relative project
    /// `raw_data` paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            let mut config =
                toml::from_str::<Self>(&content).context("failed to parse config file")?;
            if let Some(base) = path.parent() {
                config.resolve_relative_paths(base);
            }
            config
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for project in self.projects.values_mut() {
            if project.raw_data.is_relative() {
                project.raw_data = base.join(&project.raw_data);
            }
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".into()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.min_chunk_size >= c.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.min_chunk_size ({}) must be smaller than chunk_size ({})",
                c.min_chunk_size, c.chunk_size
            )));
        }
        if self.voyage.rpm_limit == 0 {
            return Err(ConfigError::Invalid("voyage.rpm_limit must be > 0".into()));
        }
        if self.voyage.dense_dim == 0 {
            return Err(ConfigError::Invalid("voyage.dense_dim must be > 0".into()));
        }
        let i = &self.indexing;
        if i.max_batch_tokens == 0 || i.max_batch_items == 0 || i.upsert_batch_size == 0 {
            return Err(ConfigError::Invalid("indexing batch limits must be > 0".into()));
        }
        self.doc_language()?;
        for (name, project) in &self.projects {
            if project.collection.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "project '{name}' has an empty collection name"
                )));
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `doc_language` is not a supported code.
    pub fn doc_language(&self) -> Result<Lang, ConfigError> {
        self.doc_language
            .parse::<Lang>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProject`] listing the configured names.
    pub fn project(&self, name: &str) -> Result<&ProjectConfig, ConfigError> {
        self.projects
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProject {
                name: name.to_owned(),
                available: self.projects.keys().cloned().collect(),
            })
    }
}

/// Priority: explicit path > `DOCRAG_CONFIG` env > `config/docrag.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("DOCRAG_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
