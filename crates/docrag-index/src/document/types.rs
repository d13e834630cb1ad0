use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Normalized first directory segment (`api`, `doc`, `demo`, ...).
    pub category: String,
    /// File stem.
    pub file_name: String,
    /// Directory segments between the corpus root and the file.
    pub path_hierarchy: Vec<String>,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Which chunking branch produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Section,
    ApiMembers,
    Demo,
    Docs,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::ApiMembers => "api_members",
            Self::Demo => "demo",
            Self::Docs => "docs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub kind: ChunkKind,
}

impl Chunk {
    #[must_use]
    pub fn new(doc: &Document, chunk_index: usize, content: String, kind: ChunkKind) -> Self {
        Self {
            id: format!("{}_chunk{chunk_index}", doc.id),
            doc_id: doc.id.clone(),
            chunk_index,
            content,
            metadata: doc.metadata.clone(),
            kind,
        }
    }
}
