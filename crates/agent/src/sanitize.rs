//! Outbound link hygiene
//!
//! Before a response leaves the pipeline: unknown absolute URLs in the
//! answer body are masked, remaining raw and markdown-link URLs are
//! stripped (keeping link text), and a trailing sources section is
//! removed. The UI renders sources separately from the body.

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::prompts::canned;
use recipe_chat_core::SourceRef;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static MD_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)]+)\)").unwrap());
static SOURCES_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+\)\s*)?(출처|Sources)\s*:?.*$").unwrap());
static PAREN_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\)\s*").unwrap());
static BRACKET_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\]").unwrap());
static BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Replace any absolute URL not present in `sources` with a neutral
/// placeholder. Returns the sanitized answer and the masked URLs.
pub fn sanitize_answer_links(answer: &str, sources: &[SourceRef]) -> (String, Vec<String>) {
    if answer.is_empty() {
        return (answer.to_string(), Vec::new());
    }
    let allowed: std::collections::HashSet<&str> = sources
        .iter()
        .map(|s| s.url.trim())
        .filter(|u| !u.is_empty())
        .collect();

    let mut removed = Vec::new();
    let mut result = answer.to_string();
    for m in URL_RE.find_iter(answer) {
        let url = m.as_str();
        if !allowed.contains(url) && !removed.iter().any(|r| r == url) {
            result = result.replace(url, canned::LINK_PLACEHOLDER);
            removed.push(url.to_string());
        }
    }
    (result, removed)
}

/// Strip every link from the body: markdown links keep their text, raw
/// URLs are removed outright. Returns the cleaned answer and the removed
/// URLs, de-duplicated in order.
pub fn remove_links_in_body(answer: &str) -> (String, Vec<String>) {
    if answer.is_empty() {
        return (answer.to_string(), Vec::new());
    }
    let mut removed: Vec<String> = Vec::new();

    let without_md = MD_LINK_RE
        .replace_all(answer, |caps: &regex::Captures<'_>| {
            removed.push(caps[2].to_string());
            caps[1].to_string()
        })
        .into_owned();

    for m in URL_RE.find_iter(&without_md) {
        removed.push(m.as_str().to_string());
    }
    let without_raw = URL_RE.replace_all(&without_md, "").into_owned();

    let cleaned = PAREN_SPACE_RE.replace_all(&without_raw, ") ");
    let cleaned = BRACKET_SPACE_RE.replace_all(&cleaned, "]");
    let cleaned = BLANKS_RE.replace_all(&cleaned, "\n\n");

    let mut seen = std::collections::HashSet::new();
    let removed = removed
        .into_iter()
        .filter(|u| seen.insert(u.clone()))
        .collect();

    (cleaned.trim().to_string(), removed)
}

/// Remove a trailing sources section (a line starting with `출처` or
/// `Sources`, optionally numbered) and everything after it.
pub fn strip_sources_section(answer: &str) -> (String, bool) {
    if answer.is_empty() {
        return (answer.to_string(), false);
    }
    let lines: Vec<&str> = answer.lines().collect();
    let start = lines
        .iter()
        .position(|line| SOURCES_HEADER_RE.is_match(line.trim()));

    match start {
        Some(idx) => {
            let kept = lines[..idx].join("\n").trim_end().to_string();
            (kept, true)
        }
        None => (answer.to_string(), false),
    }
}

/// Full hygiene pass in order: mask unknown URLs, strip remaining links,
/// drop the trailing sources section.
pub fn sanitize_outbound(answer: &str, sources: &[SourceRef]) -> String {
    let (answer, _) = sanitize_answer_links(answer, sources);
    let (answer, _) = remove_links_in_body(&answer);
    let (answer, _) = strip_sources_section(&answer);
    answer
}
