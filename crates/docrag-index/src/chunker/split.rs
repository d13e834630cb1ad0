//! Size-bounded splitting shared by every chunking strategy.
//!
//! All sizes are measured in characters. Fenced code blocks are atomic.

use std::sync::LazyLock;

use regex::Regex;

use super::ChunkerConfig;

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());

const FENCE_MARKER: &str = "```";

/// Preferred cut points, strongest first.
const BREAK_SEPARATORS: &[&str] = &["\n\n", "\n", "。", "！", "？", ". ", "! ", "? "];

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn byte_at_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Toggles fence state for a line containing an odd number of fence markers.
pub(crate) fn toggles_fence(line: &str) -> bool {
    line.matches(FENCE_MARKER).count() % 2 == 1
}

/// Byte offset at which to cut `text` so the head holds at most `max_chars`.
///
/// Searches backwards for a separator, accepting it only past the half-budget
/// point; otherwise cuts hard at the budget.
pub(crate) fn find_break_point(text: &str, max_chars: usize) -> usize {
    let limit = byte_at_char(text, max_chars);
    if limit >= text.len() {
        return text.len();
    }
    let window = &text[..limit];
    let half = max_chars / 2;
    for sep in BREAK_SEPARATORS {
        if let Some(pos) = window.rfind(sep)
            && char_len(&window[..pos]) > half
        {
            return pos + sep.len();
        }
    }
    limit
}

fn header_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    let rest = &trimmed[hashes..];
    (hashes > 0 && (rest.starts_with(' ') || rest.starts_with('\t'))).then_some(hashes)
}

/// Split markdown into sections starting at headers of `min_level..=max_level`.
///
/// Header lines inside fenced code do not start sections. A section shorter
/// than `min_section` chars is merged into the next one, or into the previous
/// one when it is last.
pub(crate) fn split_by_headers(
    content: &str,
    min_level: usize,
    max_level: usize,
    min_section: usize,
) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in content.split_inclusive('\n') {
        let starts_section = !in_fence
            && header_level(line).is_some_and(|lvl| (min_level..=max_level).contains(&lvl));
        if starts_section {
            let body = current.trim();
            if !body.is_empty() && char_len(body) >= min_section {
                sections.push(body.to_owned());
                current.clear();
            }
        }
        if toggles_fence(line) {
            in_fence = !in_fence;
        }
        current.push_str(line);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        match sections.last_mut() {
            Some(last) if char_len(tail) < min_section => {
                last.push_str("\n\n");
                last.push_str(tail);
            }
            _ => sections.push(tail.to_owned()),
        }
    }
    sections
}

/// Accumulates pieces into size-bounded chunks.
struct ChunkBuilder<'a> {
    config: &'a ChunkerConfig,
    chunks: Vec<String>,
    current: String,
    /// Byte length of the overlap prefix carried over from the previous chunk.
    carried: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(config: &'a ChunkerConfig) -> Self {
        Self {
            config,
            chunks: Vec::new(),
            current: String::new(),
            carried: 0,
        }
    }

    fn has_fresh(&self) -> bool {
        !self.current[self.carried..].trim().is_empty()
    }

    fn flush(&mut self) {
        if self.has_fresh() {
            self.chunks.push(self.current.trim().to_owned());
        }
        self.current.clear();
        self.carried = 0;
    }

    /// Trailing window of the current chunk that seeds the next one; never
    /// reaches back into a code block.
    fn overlap_tail(&self) -> String {
        let overlap = self.config.chunk_overlap;
        if overlap == 0 {
            return String::new();
        }
        let len = char_len(&self.current);
        let floor = self
            .current
            .rfind(FENCE_MARKER)
            .map_or(0, |pos| pos + FENCE_MARKER.len());
        let start = byte_at_char(&self.current, len.saturating_sub(overlap)).max(floor);
        self.current[start..].trim_start().to_owned()
    }

    /// Text too short to stand alone stays in front of the block.
    fn push_code(&mut self, code: &str) {
        let budget = self.config.chunk_size * 3 / 2;
        let pending = char_len(self.current.trim());
        if pending >= self.config.min_chunk_size
            && char_len(&self.current) + char_len(code) > budget
        {
            self.flush();
        }
        self.current.push_str(code);
    }

    fn push_text(&mut self, segment: &str) {
        let size = self.config.chunk_size;
        let mut remaining = segment;
        while !remaining.is_empty() {
            let used = char_len(&self.current);
            if used + char_len(remaining) <= size {
                self.current.push_str(remaining);
                return;
            }
            let space = size.saturating_sub(used);
            if space == 0 {
                self.flush();
                continue;
            }
            let cut = find_break_point(remaining, space);
            self.current.push_str(&remaining[..cut]);
            remaining = &remaining[cut..];

            let overlap = self.overlap_tail();
            self.flush();
            self.carried = overlap.len();
            self.current = overlap;
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.has_fresh() {
            return self.chunks;
        }
        let whole = self.current.trim();
        if char_len(whole) >= self.config.min_chunk_size || self.chunks.is_empty() {
            self.chunks.push(whole.to_owned());
            return self.chunks;
        }

        // A scrap with no room is returned on its own; the caller decides
        // whether it merges forward or is dropped at document end.
        let fresh = self.current[self.carried..].trim().to_owned();
        let size = self.config.chunk_size;
        match self.chunks.last_mut() {
            Some(last)
                if last.contains(FENCE_MARKER)
                    || char_len(last) + 1 + char_len(&fresh) <= size =>
            {
                last.push('\n');
                last.push_str(&fresh);
            }
            _ => self.chunks.push(fresh),
        }
        self.chunks
    }
}

/// Split `text` into chunks of at most `chunk_size` chars, keeping fenced
/// code blocks whole.
///
/// A code block may join the current chunk while the result stays within
/// 1.5 × `chunk_size`; a block larger than that becomes its own chunk.
pub(crate) fn split_protected(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= config.chunk_size {
        return vec![text.to_owned()];
    }

    let mut builder = ChunkBuilder::new(config);
    let mut last = 0;
    for m in FENCE.find_iter(text) {
        builder.push_text(&text[last..m.start()]);
        builder.push_code(m.as_str());
        last = m.end();
    }
    builder.push_text(&text[last..]);
    builder.finish()
}
