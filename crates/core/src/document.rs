//! Document model
//!
//! A `Document` is the immutable unit produced by the external embedding
//! builder: normalized text composed from title + ingredients + steps +
//! source/image lines, plus flat string metadata. Documents are written
//! once by the builder and read-only at request time.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata keys inspected, in priority order, when extracting an image URL.
pub const IMAGE_META_KEYS: &[&str] = &[
    "image_url",
    "image",
    "img_url",
    "thumbnail",
    "thumb_url",
    "url",
];

/// Metadata keys inspected, in priority order, when extracting a title.
pub const TITLE_META_KEYS: &[&str] = &["title", "name", "recipe", "page_title"];

/// Metadata keys inspected, in priority order, when extracting a source URL.
pub const SOURCE_META_KEYS: &[&str] = &["source", "url", "link"];

/// Flat string metadata attached to a document by the embedding builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub fields: HashMap<String, String>,
}

impl DocMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Title from the first non-empty priority key.
    pub fn title(&self) -> Option<String> {
        for key in TITLE_META_KEYS {
            if let Some(v) = self.get(key) {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    /// Source URL from the first priority key holding an absolute http(s) URL.
    pub fn source_url(&self) -> Option<String> {
        for key in SOURCE_META_KEYS {
            if let Some(v) = self.get(key) {
                let v = v.trim();
                if v.starts_with("http://") || v.starts_with("https://") {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    /// Image URL from the first priority key holding an absolute http(s) URL.
    pub fn image_url(&self) -> Option<String> {
        for key in IMAGE_META_KEYS {
            if let Some(v) = self.get(key) {
                let v = v.trim();
                if v.starts_with("http://") || v.starts_with("https://") {
                    return Some(v.to_string());
                }
            }
        }
        None
    }
}

/// An immutable retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity: the source URL when present, else a hash of the text.
    pub id: String,
    /// Normalized document text.
    pub text: String,
    /// Builder-provided metadata (title, source url, image url, parent id,
    /// chunk index).
    pub metadata: DocMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: DocMetadata) -> Self {
        let text = text.into();
        let id = stable_doc_id(&text, &metadata);
        Self { id, text, metadata }
    }
}

/// Stable document id: prefer the source URL, else a content hash.
pub fn stable_doc_id(text: &str, metadata: &DocMetadata) -> String {
    if let Some(url) = metadata.source_url() {
        return url;
    }
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// How a similarity value in a result set is to be interpreted.
///
/// Dense search returns distances, BM25 returns unbounded positives and
/// RRF returns small fractions; scores are only comparable within a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Similarities converted from vector distances (`1 - distance`).
    Distance,
    /// Reciprocal-rank-fusion scores from the hybrid retriever.
    HybridRrf,
    /// MMR selection; similarities unknown until backfilled.
    Mmr,
}

impl ScoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMode::Distance => "distance",
            ScoreMode::HybridRrf => "hybrid_rrf",
            ScoreMode::Mmr => "mmr",
        }
    }
}

/// A document paired with a request-scoped similarity and rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc: Document,
    /// Similarity in `[0, 1]` when known for the current score mode.
    pub similarity: Option<f32>,
    /// Rank assigned by the producing stage (0-based).
    pub rank: usize,
}

/// Request-scoped identity used for fusion and deduplication.
///
/// Keyed on `(source url, title, hash of the first 200 chars)` so that the
/// same recipe surfaced by dense and sparse retrieval fuses into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub url: String,
    pub title: String,
    pub prefix_hash: u64,
}

impl DocKey {
    pub fn for_doc(text: &str, metadata: &DocMetadata) -> Self {
        Self {
            url: metadata.source_url().unwrap_or_default(),
            title: metadata.title().unwrap_or_default(),
            prefix_hash: text_prefix_hash(text),
        }
    }
}

/// Hash of the first 200 characters of a text, char-boundary safe.
pub fn text_prefix_hash(text: &str) -> u64 {
    let prefix: String = text.chars().take(200).collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    prefix.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_prefers_source_url() {
        let meta = DocMetadata::new().with("source", "https://example.com/r/1");
        let doc = Document::new("kimchi stew recipe", meta);
        assert_eq!(doc.id, "https://example.com/r/1");
    }

    #[test]
    fn test_stable_id_hashes_without_url() {
        let a = Document::new("same text", DocMetadata::new());
        let b = Document::new("same text", DocMetadata::new());
        let c = Document::new("other text", DocMetadata::new());
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_image_url_priority() {
        let meta = DocMetadata::new()
            .with("url", "https://example.com/page")
            .with("thumbnail", "https://example.com/thumb.jpg");
        assert_eq!(
            meta.image_url().as_deref(),
            Some("https://example.com/thumb.jpg")
        );
    }

    #[test]
    fn test_non_http_meta_values_ignored() {
        let meta = DocMetadata::new().with("image_url", "not-a-url");
        assert_eq!(meta.image_url(), None);
        assert_eq!(meta.source_url(), None);
    }

    #[test]
    fn test_doc_key_fuses_same_document() {
        let meta = DocMetadata::new()
            .with("title", "Kimchi Stew")
            .with("url", "https://example.com/r/1");
        let k1 = DocKey::for_doc("body text", &meta);
        let k2 = DocKey::for_doc("body text", &meta);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_prefix_hash_multibyte_safe() {
        // 300 Korean chars; byte slicing at 200 would split a code point
        let text = "김".repeat(300);
        let _ = text_prefix_hash(&text);
    }
}
