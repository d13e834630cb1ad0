//! Chunking strategies.
//!
//! Every strategy yields chunks lazily, one document at a time, with gapless
//! per-document indexes. A piece shorter than `min_chunk_size` is folded into
//! the piece after it; only an undersized last piece is dropped.

mod api_reference;
mod markdown;
pub(crate) mod split;

pub use api_reference::ApiReferenceChunker;
pub use markdown::MarkdownChunker;

use serde::{Deserialize, Serialize};

use crate::document::{Chunk, ChunkKind, Document};
use crate::error::{IndexError, Result};

/// Size parameters shared by all strategies, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            chunk_overlap: 200,
            min_chunk_size: 100,
        }
    }
}

impl ChunkerConfig {
    /// Clamp values so splitting always makes progress.
    #[must_use]
    pub fn normalized(self) -> Self {
        let chunk_size = self.chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: self.chunk_overlap.min(chunk_size / 2),
            min_chunk_size: self.min_chunk_size,
        }
    }
}

pub trait Chunker: Send + Sync {
    /// Lazily split one document into chunks.
    fn chunk<'a>(&'a self, doc: &'a Document) -> Box<dyn Iterator<Item = Chunk> + 'a>;

    fn name(&self) -> &'static str;

    fn chunk_all(&self, docs: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = docs.iter().flat_map(|doc| self.chunk(doc)).collect();
        tracing::info!(
            chunker = self.name(),
            documents = docs.len(),
            chunks = chunks.len(),
            "chunking complete"
        );
        chunks
    }
}

/// Build a chunker by its configured name.
///
/// # Errors
///
/// Returns [`IndexError::UnknownChunker`] for unrecognized names.
pub fn create_chunker(name: &str, config: ChunkerConfig) -> Result<Box<dyn Chunker>> {
    match name {
        "markdown" | "generic" => Ok(Box::new(MarkdownChunker::new(config))),
        "javadoc" | "api_reference" => Ok(Box::new(ApiReferenceChunker::new(config))),
        other => Err(IndexError::UnknownChunker(other.to_owned())),
    }
}

/// Turns raw pieces into chunks numbered from zero, carrying undersized
/// pieces forward until they reach `min_chunk_size`.
struct Emit<'a, I> {
    doc: &'a Document,
    pieces: I,
    next_index: usize,
    min_chunk_size: usize,
    pending: String,
}

impl<I> Iterator for Emit<'_, I>
where
    I: Iterator<Item = (String, ChunkKind)>,
{
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        for (text, kind) in self.pieces.by_ref() {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let mut merged = std::mem::take(&mut self.pending);
            if !merged.is_empty() {
                merged.push_str("\n\n");
            }
            merged.push_str(text);
            if split::char_len(&merged) < self.min_chunk_size {
                self.pending = merged;
                continue;
            }
            let chunk = Chunk::new(self.doc, self.next_index, merged, kind);
            self.next_index += 1;
            return Some(chunk);
        }
        if !self.pending.is_empty() {
            tracing::debug!(
                doc_id = %self.doc.id,
                chars = split::char_len(&self.pending),
                "undersized trailing piece dropped"
            );
            self.pending.clear();
        }
        None
    }
}

fn emit<'a, I>(
    doc: &'a Document,
    min_chunk_size: usize,
    pieces: I,
) -> Box<dyn Iterator<Item = Chunk> + 'a>
where
    I: Iterator<Item = (String, ChunkKind)> + 'a,
{
    Box::new(Emit {
        doc,
        pieces,
        next_index: 0,
        min_chunk_size,
        pending: String::new(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::document::{Document, DocumentMetadata};

    pub(crate) fn doc(id: &str, category: &str, content: &str) -> Document {
        Document {
            id: id.to_owned(),
            content: content.to_owned(),
            metadata: DocumentMetadata {
                category: category.to_owned(),
                file_name: id.to_owned(),
                path_hierarchy: vec![category.to_owned()],
                relative_path: format!("{category}/{id}.md"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::doc;
    use super::*;

    #[test]
    fn factory_resolves_known_names() {
        let cfg = ChunkerConfig::default();
        assert_eq!(create_chunker("markdown", cfg).unwrap().name(), "markdown");
        assert_eq!(create_chunker("generic", cfg).unwrap().name(), "markdown");
        assert_eq!(
            create_chunker("javadoc", cfg).unwrap().name(),
            "api_reference"
        );
        assert_eq!(
            create_chunker("api_reference", cfg).unwrap().name(),
            "api_reference"
        );
    }

    #[test]
    fn factory_rejects_unknown_name() {
        let err = create_chunker("sentencepiece", ChunkerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::UnknownChunker(name) if name == "sentencepiece"));
    }

    #[test]
    fn normalized_clamps_overlap() {
        let cfg = ChunkerConfig {
            chunk_size: 0,
            chunk_overlap: 50,
            min_chunk_size: 0,
        }
        .normalized();
        assert_eq!(cfg.chunk_size, 1);
        assert_eq!(cfg.chunk_overlap, 0);
    }

    fn sections(texts: &[&str]) -> std::vec::IntoIter<(String, ChunkKind)> {
        texts
            .iter()
            .map(|t| ((*t).to_owned(), ChunkKind::Section))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn undersized_piece_folds_into_next() {
        let d = doc("guide", "doc", "");
        let pieces = sections(&["long enough piece", "tiny", "another long piece"]);
        let chunks: Vec<Chunk> = emit(&d, 10, pieces).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "guide_chunk0");
        assert_eq!(chunks[1].id, "guide_chunk1");
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].content, "tiny\n\nanother long piece");
    }

    #[test]
    fn consecutive_small_pieces_accumulate() {
        let d = doc("guide", "doc", "");
        let chunks: Vec<Chunk> = emit(&d, 20, sections(&["ab", "cd", "ef", "  "])).collect();
        assert!(chunks.is_empty());

        let chunks: Vec<Chunk> = emit(&d, 10, sections(&["abc", "def", "ghi"])).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "abc\n\ndef\n\nghi");
    }

    #[test]
    fn undersized_last_piece_is_dropped() {
        let d = doc("guide", "doc", "");
        let chunks: Vec<Chunk> = emit(&d, 10, sections(&["long enough piece", "tail"])).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "long enough piece");
    }

    #[test]
    fn prose_between_large_code_blocks_survives() {
        let block = format!("```java\n{}```", "int value = 1;\n".repeat(30));
        let content = format!("{block}\n\nKEEP_THIS_SENTENCE.\n\n{block}");
        let chunker = MarkdownChunker::new(ChunkerConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            min_chunk_size: 50,
        });
        let d = doc("snippets", "doc", &content);
        let chunks: Vec<Chunk> = chunker.chunk(&d).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().any(|c| c.content.contains("KEEP_THIS_SENTENCE.")));
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn chunk_all_concatenates_in_document_order() {
        let chunker = MarkdownChunker::new(ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 0,
            min_chunk_size: 1,
        });
        let docs = vec![doc("a", "doc", "alpha text"), doc("b", "doc", "beta text")];
        let chunks = chunker.chunk_all(&docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].doc_id, "a");
        assert_eq!(chunks[1].doc_id, "b");
    }
}
