//! Category-aware chunking for API reference corpora.
//!
//! API pages are regrouped by member: a class header is followed by as many
//! member details as fit the budget. Demos are kept whole when they fit and
//! guides are split by `##`/`###` sections.

use std::sync::LazyLock;

use regex::Regex;

use super::split::{char_len, split_by_headers, split_protected, toggles_fence};
use super::{Chunker, ChunkerConfig, emit};
use crate::document::{Chunk, ChunkKind, Document};

const SUMMARY_MARKERS: &[&str] = &[
    "## Method Summary",
    "## Field Summary",
    "## Constructor Summary",
    "## Property Summary",
];
const DETAIL_MARKERS: &[&str] = &["## Method Detail", "## Property Detail"];

const HEADER_SCAN_LINES: usize = 30;
const HEADER_FALLBACK_LINES: usize = 15;
const MIN_MEMBERS: usize = 3;
const GROUP_SEPARATOR: &str = "\n\n---\n\n";

static MEMBER_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\+?\s*###\s+\w+").unwrap());

#[derive(Debug, Clone)]
pub struct ApiReferenceChunker {
    config: ChunkerConfig,
}

impl ApiReferenceChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    fn api_pieces(&self, content: &str) -> Vec<(String, ChunkKind)> {
        let lines: Vec<&str> = content.lines().collect();
        let Some(details) = find_details_start(&lines) else {
            return self.fallback(content);
        };
        let members = collect_members(&lines[details + 1..]);
        if members.len() < MIN_MEMBERS {
            return self.fallback(content);
        }

        let header_end = header_end(&lines).min(details);
        let header = lines[..header_end].join("\n");
        let header = header.trim();

        let size = self.config.chunk_size;
        let mut pieces = Vec::new();
        let (prefix, budget) = if header.is_empty() {
            (None, size)
        } else if char_len(header) * 2 > size {
            pieces.extend(
                split_protected(header, &self.config)
                    .into_iter()
                    .map(|text| (text, ChunkKind::ApiMembers)),
            );
            (None, size)
        } else {
            (
                Some(header),
                size.saturating_sub(char_len(header) + char_len(GROUP_SEPARATOR)),
            )
        };

        let mut group: Vec<String> = Vec::new();
        let mut group_len = 0;
        for member in members {
            let len = char_len(&member);
            if len > budget {
                if !group.is_empty() {
                    pieces.push((render(prefix, &group), ChunkKind::ApiMembers));
                    group.clear();
                    group_len = 0;
                }
                pieces.extend(
                    split_protected(&member, &self.config)
                        .into_iter()
                        .map(|text| (text, ChunkKind::ApiMembers)),
                );
                continue;
            }
            let joined = if group.is_empty() { len } else { group_len + 2 + len };
            if !group.is_empty() && joined > budget {
                pieces.push((render(prefix, &group), ChunkKind::ApiMembers));
                group.clear();
                group_len = len;
            } else {
                group_len = joined;
            }
            group.push(member);
        }
        if !group.is_empty() {
            pieces.push((render(prefix, &group), ChunkKind::ApiMembers));
        }
        pieces
    }

    fn fallback(&self, content: &str) -> Vec<(String, ChunkKind)> {
        split_protected(content, &self.config)
            .into_iter()
            .map(|text| (text, ChunkKind::Section))
            .collect()
    }

    fn demo_pieces(&self, content: &str) -> Vec<(String, ChunkKind)> {
        let content = content.trim();
        if char_len(content) <= self.config.chunk_size {
            return vec![(content.to_owned(), ChunkKind::Demo)];
        }
        split_protected(content, &self.config)
            .into_iter()
            .map(|text| (text, ChunkKind::Demo))
            .collect()
    }

    fn docs_pieces(&self, content: &str) -> Vec<(String, ChunkKind)> {
        split_by_headers(content, 2, 3, self.config.min_chunk_size)
            .iter()
            .flat_map(|section| split_protected(section, &self.config))
            .map(|text| (text, ChunkKind::Docs))
            .collect()
    }
}

fn render(prefix: Option<&str>, group: &[String]) -> String {
    let body = group.join("\n\n");
    match prefix {
        Some(header) => format!("{header}{GROUP_SEPARATOR}{body}"),
        None => body,
    }
}

/// End of the class header: the first summary marker within the scan window,
/// else a fixed line cap.
fn header_end(lines: &[&str]) -> usize {
    lines
        .iter()
        .take(HEADER_SCAN_LINES + 1)
        .position(|line| SUMMARY_MARKERS.iter().any(|m| line.contains(m)))
        .unwrap_or_else(|| HEADER_FALLBACK_LINES.min(lines.len()))
}

fn find_details_start(lines: &[&str]) -> Option<usize> {
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        if toggles_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && DETAIL_MARKERS.iter().any(|m| line.contains(m)) {
            return Some(i);
        }
    }
    None
}

/// Member sections after the details heading. Text before the first member
/// heading is kept with the first member.
fn collect_members(lines: &[&str]) -> Vec<String> {
    let mut members: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut seen_member = false;
    let mut in_fence = false;

    for &line in lines {
        if !in_fence && MEMBER_HEADING.is_match(line) {
            if seen_member {
                let text = current.join("\n");
                if !text.trim().is_empty() {
                    members.push(text.trim().to_owned());
                }
                current.clear();
            }
            seen_member = true;
        }
        if toggles_fence(line) {
            in_fence = !in_fence;
        }
        current.push(line);
    }
    if seen_member {
        let text = current.join("\n");
        if !text.trim().is_empty() {
            members.push(text.trim().to_owned());
        }
    }
    members
}

impl Chunker for ApiReferenceChunker {
    fn chunk<'a>(&'a self, doc: &'a Document) -> Box<dyn Iterator<Item = Chunk> + 'a> {
        let pieces = match doc.metadata.category.as_str() {
            "api" => self.api_pieces(&doc.content),
            "demo" => self.demo_pieces(&doc.content),
            _ => self.docs_pieces(&doc.content),
        };
        tracing::debug!(doc_id = %doc.id, pieces = pieces.len(), "api reference split");
        emit(doc, self.config.min_chunk_size, pieces.into_iter())
    }

    fn name(&self) -> &'static str {
        "api_reference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::test_support::doc;

    fn chunker(chunk_size: usize) -> ApiReferenceChunker {
        ApiReferenceChunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap: 0,
            min_chunk_size: 10,
        })
    }

    fn api_page(members: usize, body: &str) -> String {
        let mut page = String::from(
            "# Workbook\n\nRepresents a spreadsheet file.\n\n## Method Summary\n\n\
             | Method | Description |\n|---|---|\n| open | Opens |\n\n## Method Details\n\n",
        );
        for i in 0..members {
            page.push_str(&format!("### method{i}\n\n{body}\n\n"));
        }
        page
    }

    #[test]
    fn members_grouped_under_header() {
        let content = api_page(4, "Does a thing with the workbook.");
        let d = doc("Workbook", "api", &content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0].content;
        let expected_head = "# Workbook\n\nRepresents a spreadsheet file.\n\n---\n\n### method0";
        assert!(c.starts_with(expected_head));
        assert!(!c.contains("Method Summary"));
        assert!(!c.contains("Method Details"));
        assert_eq!(c.matches("### method").count(), 4);
        assert_eq!(chunks[0].kind, ChunkKind::ApiMembers);
    }

    #[test]
    fn groups_respect_budget_and_repeat_header() {
        let body = "Opens the file and reads every sheet. ".repeat(5);
        let content = api_page(6, &body);
        let d = doc("Workbook", "api", &content);
        let chunks: Vec<_> = chunker(600).chunk(&d).collect();
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.content.starts_with("# Workbook"));
            assert!(c.content.chars().count() <= 600);
        }
        let members: usize = chunks
            .iter()
            .map(|c| c.content.matches("### method").count())
            .sum();
        assert_eq!(members, 6);
    }

    #[test]
    fn member_heading_inside_fence_is_not_a_member() {
        let content = api_page(3, "```java\n### notAMember\nwb.open();\n```");
        let d = doc("Workbook", "api", &content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.matches("### method").count(), 3);
        assert!(chunks[0].content.contains("### notAMember"));
    }

    #[test]
    fn few_members_fall_back_to_size_split() {
        let content = api_page(2, "Short description of the member.");
        let d = doc("Workbook", "api", &content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Section);
        assert!(chunks[0].content.contains("## Method Summary"));
    }

    #[test]
    fn header_without_marker_uses_line_cap() {
        let mut content: String = (0..20).map(|i| format!("header line {i}\n")).collect();
        content.push_str("## Method Details\n");
        for i in 0..3 {
            content.push_str(&format!("### member{i}\nbody of member {i}\n"));
        }
        let d = doc("Cells", "api", &content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0].content;
        assert!(c.contains("header line 14"));
        assert!(!c.contains("header line 15"));
    }

    #[test]
    fn small_demo_kept_whole() {
        let content = "# Chart demo\n\n## Step one\n\nCreate a chart.\n\n## Step two\n\nStyle it.";
        let d = doc("chart", "demo", content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Demo);
        assert_eq!(chunks[0].content, content);
    }

    #[test]
    fn docs_split_at_level_two_and_three() {
        let content = "# Guide\n\nIntro paragraph for the guide.\n\n\
                       ## Loading\n\nLoad files from disk or stream.\n\n\
                       ### Options\n\nPass load options to tune parsing.\n\n\
                       #### Detail\n\nNested detail stays with its parent.";
        let d = doc("guide", "doc", content);
        let chunks: Vec<_> = chunker(3000).chunk(&d).collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].content.starts_with("### Options"));
        assert!(chunks[2].content.contains("#### Detail"));
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Docs));
    }
}
