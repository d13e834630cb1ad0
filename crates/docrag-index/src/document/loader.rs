use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use super::clean::clean_markup;
use super::types::{Document, DocumentMetadata};
use super::DEFAULT_MAX_FILE_SIZE;
use crate::error::{IndexError, Result};

const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "java"];

/// Maps plural directory names onto the singular category used in payloads.
fn normalize_category(segment: &str) -> String {
    let lower = segment.to_lowercase();
    match lower.as_str() {
        "apis" => "api".to_owned(),
        "docs" => "doc".to_owned(),
        "demos" => "demo".to_owned(),
        _ => lower,
    }
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Walks a documentation tree and produces cleaned [`Document`]s.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
    extensions: Vec<String>,
    max_file_size: u64,
}

impl DocumentLoader {
    /// # Errors
    ///
    /// Returns [`IndexError::RootNotFound`] if `root` is not an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(IndexError::RootNotFound(root));
        }
        Ok(Self {
            root,
            extensions: DEFAULT_EXTENSIONS.iter().map(|&e| e.to_owned()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        })
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Document id: relative path without extension, separators replaced by `_`.
    #[must_use]
    pub fn doc_id(relative: &Path) -> String {
        path_segments(&relative.with_extension("")).join("_")
    }

    /// Category of the first path segment. For a file at the root that
    /// segment is the file name itself.
    #[must_use]
    pub fn category(relative: &Path) -> String {
        path_segments(relative)
            .first()
            .map_or_else(|| "doc".to_owned(), |segment| normalize_category(segment))
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }

    fn collect_paths(&self, subdirs: Option<&[String]>) -> BTreeSet<PathBuf> {
        let search_roots: Vec<PathBuf> = match subdirs {
            Some(dirs) if !dirs.is_empty() => dirs.iter().map(|d| self.root.join(d)).collect(),
            _ => vec![self.root.clone()],
        };

        let mut paths = BTreeSet::new();
        for dir in search_roots {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "documentation subdirectory missing");
                continue;
            }
            let walker = ignore::WalkBuilder::new(&dir)
                .hidden(true)
                .git_ignore(true)
                .build();
            for entry in walker {
                match entry {
                    Ok(e)
                        if e.file_type().is_some_and(|ft| ft.is_file())
                            && self.is_eligible(e.path()) =>
                    {
                        paths.insert(e.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(dir = %dir.display(), "failed to walk entry: {e}"),
                }
            }
        }
        paths
    }

    /// Load every eligible file under the root (or only under `subdirs`), in path order.
    ///
    /// Unreadable files are logged and skipped; files that are empty after
    /// cleaning are dropped.
    pub async fn load(&self, subdirs: Option<&[String]>) -> Vec<Document> {
        let paths = self.collect_paths(subdirs);
        let total = paths.len();
        tracing::info!(total, root = %self.root.display(), "loading documents");

        let mut docs = Vec::with_capacity(total);
        for path in paths {
            if let Some(doc) = self.load_file(&path).await {
                docs.push(doc);
            }
        }

        tracing::info!(loaded = docs.len(), skipped = total - docs.len(), "documents loaded");
        docs
    }

    async fn load_file(&self, path: &Path) -> Option<Document> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > self.max_file_size => {
                tracing::warn!(
                    path = %path.display(),
                    size = meta.len(),
                    "file too large, skipped"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to stat file: {e}");
                return None;
            }
        }

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read file: {e}");
                return None;
            }
        };

        let content = clean_markup(&raw);
        if content.is_empty() {
            tracing::debug!(path = %path.display(), "empty after cleaning, skipped");
            return None;
        }

        let segments = path_segments(relative);
        let path_hierarchy = segments[..segments.len().saturating_sub(1)].to_vec();
        let file_name = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Some(Document {
            id: Self::doc_id(relative),
            content,
            metadata: DocumentMetadata {
                category: Self::category(relative),
                file_name,
                path_hierarchy,
                relative_path: segments.join("/"),
            },
        })
    }
}
