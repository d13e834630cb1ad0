//! Configuration, project registry and wiring of the docrag pipeline.

pub mod bootstrap;
pub mod config;
pub mod secret;

pub use bootstrap::AppContext;
pub use config::{
    ChunkingConfig, Config, ConfigError, IndexingConfig, LogFormat, LoggingConfig, ProjectConfig,
    QdrantConfig, SearchSettings, VoyageConfig, resolve_config_path,
};
pub use secret::Secret;
