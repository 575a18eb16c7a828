//! Post-retrieval filtering and metadata enrichment
//!
//! Applied in order: minimum length, duplicate drop, similarity cutoff
//! (only when at least one similarity is known), per-host domain cap.
//! Alongside filtering, each kept document is enriched with a candidate
//! image URL, title and source URL. Deterministic for fixed inputs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_core::{DocKey, DocMetadata, ScoreMode, VectorStore};

/// Filter parameters; defaults come from settings.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_doc_len: usize,
    pub similarity_threshold: f32,
    pub domain_cap: usize,
    /// Width of the scored search used to backfill missing similarities.
    pub mmr_fetch: usize,
}

/// A retrieval hit after filtering, carrying extracted display metadata.
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub text: String,
    pub similarity: Option<f32>,
    pub image_url: Option<String>,
    pub title: String,
    pub url: String,
}

/// The filtered result set for one retrieval pass.
#[derive(Debug, Clone, Default)]
pub struct RetrievedSet {
    pub docs: Vec<RetrievedDoc>,
    pub score_mode: Option<ScoreMode>,
}

impl RetrievedSet {
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Known similarity values, in document order.
    pub fn known_scores(&self) -> Vec<f32> {
        self.docs.iter().filter_map(|d| d.similarity).collect()
    }

    /// Largest known similarity, if any.
    pub fn max_similarity(&self) -> Option<f32> {
        self.known_scores()
            .into_iter()
            .fold(None, |acc, s| Some(acc.map_or(s, |m: f32| m.max(s))))
    }

    /// Distinct source hosts among kept documents.
    pub fn unique_domains(&self) -> usize {
        self.docs
            .iter()
            .map(|d| host_of(&d.url).unwrap_or_default())
            .collect::<HashSet<_>>()
            .len()
    }
}

static IMAGE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*image\s*:\s*(https?://\S+)").unwrap());
static IMAGE_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(https?://\S+\.(?:png|jpe?g|gif|webp|svg))").unwrap());

/// Candidate image URL: metadata priority keys first, then an
/// `Image: <url>` line, then any image-extension URL in the text.
pub fn extract_image_url(meta: &DocMetadata, text: &str) -> Option<String> {
    if let Some(url) = meta.image_url() {
        return Some(url);
    }
    if let Some(caps) = IMAGE_LINE_RE.captures(text) {
        return Some(caps[1].trim().to_string());
    }
    IMAGE_EXT_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// Host portion of an absolute URL, if parseable.
pub fn host_of(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Post-retrieval filter stage.
pub struct PostRetrievalFilter {
    store: Arc<dyn VectorStore>,
    config: FilterConfig,
}

impl PostRetrievalFilter {
    pub fn new(store: Arc<dyn VectorStore>, config: FilterConfig) -> Self {
        Self { store, config }
    }

    /// Filter and enrich raw retrieval output.
    pub async fn apply(
        &self,
        query: &str,
        k: usize,
        raw: Vec<(String, DocMetadata, Option<f32>)>,
        score_mode: ScoreMode,
    ) -> RetrievedSet {
        let mut docs: Vec<(RetrievedDoc, DocMetadata)> = Vec::with_capacity(raw.len());
        let mut seen: HashSet<DocKey> = HashSet::new();

        for (text, meta, similarity) in raw {
            if text.chars().count() < self.config.min_doc_len {
                tracing::debug!(
                    len = text.chars().count(),
                    threshold = self.config.min_doc_len,
                    "dropping short document"
                );
                continue;
            }
            let key = DocKey::for_doc(&text, &meta);
            if !seen.insert(key) {
                continue;
            }
            let image_url = extract_image_url(&meta, &text);
            let title = meta.title().unwrap_or_default();
            let url = meta.source_url().unwrap_or_default();
            docs.push((
                RetrievedDoc {
                    text,
                    similarity,
                    image_url,
                    title,
                    url,
                },
                meta,
            ));
        }

        // Backfill unknown similarities from a scored search before the
        // cutoff can apply (MMR selection returns no scores).
        if docs.iter().any(|(d, _)| d.similarity.is_none()) && score_mode == ScoreMode::Mmr {
            self.backfill_similarities(query, k, &mut docs).await;
        }

        // Similarity cutoff only when at least one similarity is known;
        // unknown values pass through. RRF scores live in a different
        // score space than distance-derived similarities and are never
        // compared against the threshold.
        let threshold = self.config.similarity_threshold;
        if threshold > 0.0
            && score_mode != ScoreMode::HybridRrf
            && docs.iter().any(|(d, _)| d.similarity.is_some())
        {
            docs.retain(|(d, _)| d.similarity.map_or(true, |s| s >= threshold));
        }

        // Per-host cap to reduce same-site dominance; docs without a host
        // are never capped.
        if self.config.domain_cap > 0 {
            let mut per_host: HashMap<String, usize> = HashMap::new();
            docs.retain(|(d, _)| match host_of(&d.url) {
                Some(host) => {
                    let count = per_host.entry(host).or_insert(0);
                    if *count >= self.config.domain_cap {
                        false
                    } else {
                        *count += 1;
                        true
                    }
                }
                None => true,
            });
        }

        RetrievedSet {
            docs: docs.into_iter().map(|(d, _)| d).collect(),
            score_mode: Some(score_mode),
        }
    }

    /// Match docs against a scored search of width `max(k, mmr_fetch)` on
    /// `(url, title, text-prefix hash)` and adopt the found similarities.
    async fn backfill_similarities(
        &self,
        query: &str,
        k: usize,
        docs: &mut [(RetrievedDoc, DocMetadata)],
    ) {
        let fetch_n = k.max(self.config.mmr_fetch);
        let scored = match self.store.similarity_search_with_score(query, fetch_n).await {
            Ok(scored) => scored,
            Err(e) => {
                tracing::debug!(error = %e, "similarity backfill search failed");
                return;
            }
        };

        let score_map: HashMap<DocKey, f32> = scored
            .into_iter()
            .map(|(doc, distance)| {
                (
                    DocKey::for_doc(&doc.text, &doc.metadata),
                    1.0 - distance,
                )
            })
            .collect();

        for (doc, meta) in docs.iter_mut() {
            if doc.similarity.is_none() {
                let key = DocKey::for_doc(&doc.text, meta);
                if let Some(similarity) = score_map.get(&key) {
                    doc.similarity = Some(*similarity);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HashEmbedder, InMemoryVectorStore};

    fn filter() -> PostRetrievalFilter {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(HashEmbedder::new(32))));
        PostRetrievalFilter::new(
            store,
            FilterConfig {
                min_doc_len: 20,
                similarity_threshold: 0.08,
                domain_cap: 2,
                mmr_fetch: 50,
            },
        )
    }

    fn meta(title: &str, url: &str) -> DocMetadata {
        DocMetadata::new().with("title", title).with("url", url)
    }

    fn long_text(tag: &str) -> String {
        format!("{} — 재료와 조리 단계가 충분히 들어 있는 레시피 본문입니다", tag)
    }

    #[tokio::test]
    async fn test_short_docs_dropped() {
        let raw = vec![
            ("짧음".to_string(), DocMetadata::new(), Some(0.9)),
            (long_text("doc"), DocMetadata::new(), Some(0.9)),
        ];
        let set = filter()
            .apply("q", 5, raw, ScoreMode::HybridRrf)
            .await;
        assert_eq!(set.docs.len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_cutoff_skipped_when_all_unknown() {
        let raw = vec![
            (long_text("a"), DocMetadata::new(), None),
            (long_text("b"), DocMetadata::new(), None),
        ];
        let set = filter().apply("q", 5, raw, ScoreMode::HybridRrf).await;
        assert_eq!(set.docs.len(), 2);
    }

    #[tokio::test]
    async fn test_similarity_cutoff_drops_low_scores() {
        let raw = vec![
            (long_text("low"), DocMetadata::new(), Some(0.01)),
            (long_text("high"), DocMetadata::new(), Some(0.5)),
        ];
        let set = filter().apply("q", 5, raw, ScoreMode::Distance).await;
        assert_eq!(set.docs.len(), 1);
        assert!(set.docs[0].text.contains("high"));
    }

    #[tokio::test]
    async fn test_cutoff_never_compares_rrf_scores() {
        // RRF scores are small fractions; a distance-mode threshold must
        // not empty the result set.
        let raw = vec![
            (long_text("a"), DocMetadata::new(), Some(0.016)),
            (long_text("b"), DocMetadata::new(), Some(0.008)),
        ];
        let set = filter().apply("q", 5, raw, ScoreMode::HybridRrf).await;
        assert_eq!(set.docs.len(), 2);
    }

    #[tokio::test]
    async fn test_domain_cap() {
        let raw = vec![
            (long_text("a"), meta("a", "https://same.com/1"), Some(0.9)),
            (long_text("b"), meta("b", "https://same.com/2"), Some(0.8)),
            (long_text("c"), meta("c", "https://same.com/3"), Some(0.7)),
            (long_text("d"), meta("d", "https://other.com/1"), Some(0.6)),
        ];
        let set = filter().apply("q", 5, raw, ScoreMode::HybridRrf).await;
        assert_eq!(set.docs.len(), 3);
        assert_eq!(set.unique_domains(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_dropped() {
        let m = meta("dup", "https://example.com/dup");
        let raw = vec![
            (long_text("dup"), m.clone(), Some(0.9)),
            (long_text("dup"), m, Some(0.8)),
        ];
        let set = filter().apply("q", 5, raw, ScoreMode::HybridRrf).await;
        assert_eq!(set.docs.len(), 1);
    }

    #[test]
    fn test_image_from_text_line() {
        let text = "제목\nImage: https://example.com/food.jpg\n본문";
        let url = extract_image_url(&DocMetadata::new(), text);
        assert_eq!(url.as_deref(), Some("https://example.com/food.jpg"));
    }

    #[test]
    fn test_image_from_extension_url() {
        let text = "사진은 https://cdn.example.com/a/b.webp 에 있음";
        let url = extract_image_url(&DocMetadata::new(), text);
        assert_eq!(url.as_deref(), Some("https://cdn.example.com/a/b.webp"));
    }

    #[test]
    fn test_meta_image_priority_over_text() {
        let m = DocMetadata::new().with("image_url", "https://meta.example.com/i.png");
        let text = "Image: https://text.example.com/i.png";
        assert_eq!(
            extract_image_url(&m, text).as_deref(),
            Some("https://meta.example.com/i.png")
        );
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://www.10000recipe.com/r/1").as_deref(),
            Some("www.10000recipe.com")
        );
        assert_eq!(host_of(""), None);
        assert_eq!(host_of("not a url"), None);
    }
}
