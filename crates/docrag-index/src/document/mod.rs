pub mod clean;
pub mod loader;
pub mod types;

pub use clean::clean_markup;
pub use loader::DocumentLoader;
pub use types::{Chunk, ChunkKind, Document, DocumentMetadata};

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
