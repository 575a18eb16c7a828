//! Grounding context builder
//!
//! Selects, deduplicates, reformats and length-caps the retrieved
//! documents into the context handed to the generator, keeping image URLs
//! aligned with the documents that were actually selected.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::constants::context as consts;
use recipe_chat_core::document::text_prefix_hash;

use crate::filter::RetrievedDoc;

/// Context sizing parameters.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_docs: usize,
    pub max_length: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_docs: consts::MAX_DOCS,
            max_length: consts::MAX_LENGTH,
        }
    }
}

/// The built context plus the aligned selections it was made from.
#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    pub context_text: String,
    pub selected_images: Vec<String>,
    pub selected_doc_texts: Vec<String>,
}

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^# (.+)$").unwrap());
static INGREDIENTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^## Ingredients$").unwrap());
static STEPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^## Steps$").unwrap());
static SOURCE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Source:.*$").unwrap());
static IMAGE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Image:.*$").unwrap());
static BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Reformat builder markdown into reader-friendly text: normalize the
/// headings, strip inline `Source:`/`Image:` lines, collapse blank runs.
pub fn format_markdown_content(content: &str) -> String {
    let content = HEADING_RE.replace_all(content, "[제목] $1");
    let content = INGREDIENTS_RE.replace_all(&content, "[재료]");
    let content = STEPS_RE.replace_all(&content, "[조리]");
    let content = SOURCE_LINE_RE.replace_all(&content, "");
    let content = IMAGE_LINE_RE.replace_all(&content, "");
    let content = BLANKS_RE.replace_all(&content, "\n\n");
    content.trim().to_string()
}

/// Collapse runs of three or more newlines.
pub fn clean_newlines(text: &str) -> String {
    BLANKS_RE.replace_all(text, "\n\n").into_owned()
}

/// Build the grounding context and select images aligned with the docs
/// that made it in.
///
/// Iterates in retrieval order: drops documents under 20 characters,
/// de-duplicates on a hash of the first 200 characters, stops after
/// `max_docs`, joins with a separator and truncates to `max_length`.
pub fn build_context_with_images(docs: &[RetrievedDoc], config: &ContextConfig) -> BuiltContext {
    if docs.is_empty() {
        return BuiltContext::default();
    }

    let mut contexts: Vec<String> = Vec::new();
    let mut selected_images: Vec<String> = Vec::new();
    let mut selected_doc_texts: Vec<String> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();

    for doc in docs {
        if doc.text.chars().count() < consts::MIN_DOC_CHARS {
            continue;
        }
        if !seen.insert(text_prefix_hash(&doc.text)) {
            continue;
        }

        contexts.push(format_markdown_content(&doc.text));
        selected_doc_texts.push(doc.text.clone());

        if let Some(url) = &doc.image_url {
            if url.starts_with("http") {
                selected_images.push(url.clone());
            }
        }

        if contexts.len() >= config.max_docs {
            break;
        }
    }

    let joined = contexts.join(consts::SEPARATOR);
    let context_text: String = joined.chars().take(config.max_length).collect();

    BuiltContext {
        context_text,
        selected_images,
        selected_doc_texts,
    }
}
