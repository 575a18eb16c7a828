//! Optional cross-encoder reranking of top candidates
//!
//! Re-scores the first `min(topn, len)` retrieved documents against the
//! query and stable-sorts them by score; the untouched tail is appended
//! in its original order. When no reranker is configured the stage is a
//! silent passthrough.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use recipe_chat_core::{Reranker, Result};

use crate::filter::RetrievedDoc;

/// Rerank stage wrapping an optional `Reranker`.
pub struct CrossEncoderRerank {
    reranker: Option<Arc<dyn Reranker>>,
    topn: usize,
}

impl CrossEncoderRerank {
    pub fn new(reranker: Option<Arc<dyn Reranker>>, topn: usize) -> Self {
        Self {
            reranker,
            topn: topn.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.reranker.is_some()
    }

    /// Reorder `docs` in place by cross-encoder relevance.
    ///
    /// Returns whether a rerank actually happened (for the pipeline tag).
    pub async fn apply(&self, query: &str, docs: &mut Vec<RetrievedDoc>) -> bool {
        let reranker = match &self.reranker {
            Some(r) => r,
            None => return false,
        };
        if docs.is_empty() {
            return false;
        }

        let topn = self.topn.min(docs.len());
        let pairs: Vec<(String, String)> = docs[..topn]
            .iter()
            .map(|d| (query.to_string(), d.text.clone()))
            .collect();

        let scores = match reranker.score(&pairs).await {
            Ok(scores) if scores.len() == topn => scores,
            Ok(_) => {
                tracing::warn!("reranker returned mismatched score count, passing through");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "rerank failed, passing through");
                return false;
            }
        };

        let mut order: Vec<usize> = (0..topn).collect();
        // Stable sort keeps the retrieval order for equal scores.
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let head: Vec<RetrievedDoc> = order.iter().map(|&i| docs[i].clone()).collect();
        let tail: Vec<RetrievedDoc> = docs[topn..].to_vec();
        *docs = head;
        docs.extend(tail);
        true
    }
}

/// TF-IDF-style lexical scorer usable as an in-process `Reranker`.
///
/// Term frequency with diminishing returns, a word-length IDF
/// approximation, early-query-term position weighting, and a coverage
/// bonus; stopword-filtered. Scores land in `[0, 1]`.
pub struct LexicalScorer;

const STOPWORDS: &[&str] = &[
    // English
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "can",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "and", "but",
    "if", "or", "because", "about", "how", "what", "which", "who", "this", "that", "these",
    "those", "i", "you", "we", "they", "it", "my", "your", "our",
    // Korean particles and fillers
    "은", "는", "이", "가", "을", "를", "의", "에", "에서", "으로", "로", "와", "과", "도",
    "만", "좀", "제발", "그리고", "그래서", "하지만",
];

impl LexicalScorer {
    /// Score one `(query, document)` pair.
    pub fn score_pair(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();
        let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.chars().count() > 1 && !stopwords.contains(*w))
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let doc_len = doc_words.len().max(1) as f32;

        let mut total = 0.0f32;
        let mut matched = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f32;
            if tf == 0.0 {
                continue;
            }
            matched += 1;
            let tf_score = tf.sqrt();
            let idf_approx = (1.0 + term.chars().count() as f32).ln();
            let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
            let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());
            total += tf_score * idf_approx * position_weight * length_norm;
        }

        let coverage = matched as f32 / query_terms.len() as f32;
        let raw = total + coverage * 0.3;
        (raw / (raw + 1.0)).min(1.0)
    }
}

#[async_trait]
impl Reranker for LexicalScorer {
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(q, d)| Self::score_pair(q, d))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> RetrievedDoc {
        RetrievedDoc {
            text: text.to_string(),
            similarity: None,
            image_url: None,
            title: String::new(),
            url: String::new(),
        }
    }

    #[test]
    fn test_lexical_scorer_relevance_order() {
        let specific = LexicalScorer::score_pair(
            "kimchi stew recipe",
            "kimchi stew recipe with pork and tofu",
        );
        let generic =
            LexicalScorer::score_pair("kimchi stew recipe", "weather forecast for tomorrow");
        assert!(specific > generic);
    }

    #[test]
    fn test_lexical_scorer_stopword_only_query() {
        assert_eq!(LexicalScorer::score_pair("the a an", "anything"), 0.0);
    }

    #[tokio::test]
    async fn test_passthrough_without_reranker() {
        let stage = CrossEncoderRerank::new(None, 10);
        let mut docs = vec![doc("first"), doc("second")];
        let applied = stage.apply("query", &mut docs).await;
        assert!(!applied);
        assert_eq!(docs[0].text, "first");
    }

    #[tokio::test]
    async fn test_rerank_reorders_head_keeps_tail() {
        let stage = CrossEncoderRerank::new(Some(Arc::new(LexicalScorer)), 2);
        let mut docs = vec![
            doc("weather forecast tomorrow"),
            doc("kimchi stew recipe with pork"),
            doc("untouched tail document"),
        ];
        let applied = stage.apply("kimchi stew recipe", &mut docs).await;
        assert!(applied);
        assert!(docs[0].text.contains("kimchi"));
        assert_eq!(docs[2].text, "untouched tail document");
    }
}
