//! Markup cleanup for documentation exported from rich-text editors.

use std::sync::LazyLock;

use regex::Regex;

const MAX_SPAN_PASSES: usize = 5;

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static SPAN_WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<span[^>]*>([^<]*)</span>").unwrap());
static EMPTY_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<span[^>]*>\s*</span>").unwrap());
static STRAY_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?span[^>]*>").unwrap());
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static EDITOR_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+(?:data-ccp-props|style|class)\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap()
});
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

fn placeholder(i: usize) -> String {
    format!("\u{E000}{i}\u{E001}")
}

/// Strip editor markup while leaving fenced code blocks byte-identical.
///
/// Links and images are kept as written.
#[must_use]
pub fn clean_markup(content: &str) -> String {
    let mut fences: Vec<String> = Vec::new();
    let mut text = FENCE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            fences.push(caps[0].to_owned());
            placeholder(fences.len() - 1)
        })
        .into_owned();

    for _ in 0..MAX_SPAN_PASSES {
        let next = SPAN_WRAPPER.replace_all(&text, "$1");
        if next == text {
            break;
        }
        text = next.into_owned();
    }
    text = EMPTY_SPAN.replace_all(&text, "").into_owned();
    text = STRAY_SPAN.replace_all(&text, "").into_owned();
    text = LINE_BREAK.replace_all(&text, "\n").into_owned();
    text = EDITOR_ATTRS.replace_all(&text, "").into_owned();
    text = BLANK_RUN.replace_all(&text, "\n\n").into_owned();
    text = SPACE_RUN.replace_all(&text, " ").into_owned();

    for (i, fence) in fences.iter().enumerate() {
        text = text.replacen(&placeholder(i), fence, 1);
    }

    text.trim().to_owned()
}
