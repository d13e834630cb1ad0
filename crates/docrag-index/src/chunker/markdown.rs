use super::split::{split_by_headers, split_protected};
use super::{Chunker, ChunkerConfig, emit};
use crate::document::{Chunk, ChunkKind, Document};

/// Header-aware splitting for general markdown.
///
/// Sections start at any header level; each section is then size-split with
/// code blocks kept whole.
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    config: ChunkerConfig,
}

impl MarkdownChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }
}

impl Chunker for MarkdownChunker {
    fn chunk<'a>(&'a self, doc: &'a Document) -> Box<dyn Iterator<Item = Chunk> + 'a> {
        let config = self.config;
        let sections = split_by_headers(&doc.content, 1, 6, config.min_chunk_size);
        let pieces = sections.into_iter().flat_map(move |section| {
            split_protected(&section, &config)
                .into_iter()
                .map(|text| (text, ChunkKind::Section))
        });
        emit(doc, config.min_chunk_size, pieces)
    }

    fn name(&self) -> &'static str {
        "markdown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::test_support::doc;

    fn chunker(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> MarkdownChunker {
        MarkdownChunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        })
    }

    #[test]
    fn one_chunk_per_section() {
        let content = "# Install\n\nRun the installer and accept defaults.\n\n\
                       ## Configure\n\nEdit the settings file before first launch.";
        let d = doc("setup", "doc", content);
        let chunks: Vec<_> = chunker(1000, 0, 10).chunk(&d).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("# Install"));
        assert!(chunks[1].content.starts_with("## Configure"));
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Section));
    }

    #[test]
    fn long_section_is_size_split() {
        let body = "Workbooks hold worksheets. ".repeat(40);
        let d = doc("big", "doc", &format!("# Big\n\n{body}"));
        let chunks: Vec<_> = chunker(200, 20, 10).chunk(&d).collect();
        assert!(chunks.len() > 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(c.content.chars().count() <= 200);
        }
    }

    #[test]
    fn document_below_minimum_yields_nothing() {
        let d = doc("tiny", "doc", "# Hi");
        assert_eq!(chunker(1000, 0, 10).chunk(&d).count(), 0);
    }

    #[test]
    fn empty_document_yields_nothing() {
        let d = doc("empty", "doc", "");
        assert_eq!(chunker(1000, 0, 0).chunk(&d).count(), 0);
    }
}
