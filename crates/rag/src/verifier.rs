//! Sentence-level grounding verification
//!
//! Checks a draft answer against retrieved snippets: the answer is split
//! into sentences, each sentence is scored against evenly sampled snippets
//! from the grounding docs with the cross-encoder, and the share of
//! supported sentences decides the verdict.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::constants::verifier as consts;
use recipe_chat_core::{ConfidenceLevel, Reranker, Verdict, VerifierReport};

/// Verifier thresholds; defaults come from settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Per-sentence support threshold.
    pub sent_t: f32,
    /// Support-rate threshold for a grounded verdict.
    pub support_p: f32,
    /// Documents sampled for snippets.
    pub max_docs: usize,
    /// Snippets sampled per document.
    pub snippets_per_doc: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            sent_t: consts::CE_SENT_T,
            support_p: consts::CE_SUPPORT_P,
            max_docs: consts::CE_MAX_DOCS,
            snippets_per_doc: consts::CE_SNIPPETS_PER_DOC,
        }
    }
}

/// Generic disclaimer sentences excluded from scoring.
const NEUTRAL_CUES: &[&str] = &[
    "식품 안전 수칙을 준수하세요",
    "알레르기가 있는 경우 전문가와 상담",
    "개인의 건강 상태에 따라 다를 수 있습니다",
];

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+([.,]\d+)?").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, mask numbers with a sentinel, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let t = text.trim().to_lowercase();
    let t = NUMBER_RE.replace_all(&t, "NUM");
    WHITESPACE_RE.replace_all(&t, " ").into_owned()
}

/// Split into sentences on `.!?` plus newlines; drop sentences shorter
/// than 5 characters and de-duplicate on the first 80 characters.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '.' | '!' | '?' => {
                current.push(c);
                sentences.push(std::mem::take(&mut current));
            }
            '\n' => {
                sentences.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    sentences.push(current);

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for sentence in sentences {
        let s = sentence.trim();
        if s.chars().count() < consts::MIN_SENTENCE_CHARS {
            continue;
        }
        let key: String = s.chars().take(consts::SENTENCE_DEDUP_PREFIX).collect();
        if !seen.insert(key) {
            continue;
        }
        out.push(s.to_string());
    }
    out
}

fn is_neutral_sentence(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    NEUTRAL_CUES.iter().any(|cue| lower.contains(cue))
}

/// Even-step sampling of up to `per_doc` sentences from each of the first
/// `max_docs` documents; each snippet capped at 400 characters.
pub fn extract_snippets(docs: &[String], max_docs: usize, per_doc: usize) -> Vec<String> {
    let mut snippets = Vec::new();
    for doc in docs.iter().take(max_docs) {
        let sentences = split_sentences(doc);
        if sentences.is_empty() {
            continue;
        }
        let picks: Vec<&String> = if sentences.len() <= per_doc {
            sentences.iter().collect()
        } else {
            let step = (sentences.len() / per_doc).max(1);
            sentences.iter().step_by(step).take(per_doc).collect()
        };
        for s in picks {
            snippets.push(s.chars().take(consts::SNIPPET_MAX_CHARS).collect());
        }
    }
    snippets
}

/// Cross-encoder grounding verifier.
pub struct GroundingVerifier {
    reranker: Option<Arc<dyn Reranker>>,
    config: VerifierConfig,
}

impl GroundingVerifier {
    pub fn new(reranker: Option<Arc<dyn Reranker>>, config: VerifierConfig) -> Self {
        Self { reranker, config }
    }

    /// Verify an answer against grounding documents.
    ///
    /// Degenerate inputs (no sentences, no snippets, verifier unavailable)
    /// return a notSure/unknown report with `support_rate = 0`.
    pub async fn verify(&self, answer: &str, docs: &[String]) -> VerifierReport {
        let sentences = split_sentences(answer);
        if sentences.is_empty() {
            return VerifierReport::unknown(0);
        }

        let targets: Vec<String> = sentences
            .into_iter()
            .filter(|s| !is_neutral_sentence(s))
            .collect();
        if targets.is_empty() {
            return VerifierReport::unknown(0);
        }

        let snippets = extract_snippets(docs, self.config.max_docs, self.config.snippets_per_doc);
        if snippets.is_empty() {
            return VerifierReport::unknown(targets.len());
        }

        let reranker = match &self.reranker {
            Some(r) => r,
            None => return VerifierReport::unknown(targets.len()),
        };

        let normalized_snippets: Vec<String> =
            snippets.iter().map(|s| normalize_text(s)).collect();

        let mut max_scores: Vec<f32> = Vec::with_capacity(targets.len());
        for sentence in &targets {
            let normalized = normalize_text(sentence);
            let pairs: Vec<(String, String)> = normalized_snippets
                .iter()
                .map(|snippet| (normalized.clone(), snippet.clone()))
                .collect();
            let max = match reranker.score(&pairs).await {
                Ok(scores) => scores.into_iter().fold(0.0f32, f32::max),
                Err(e) => {
                    tracing::debug!(error = %e, "verifier scoring failed for sentence");
                    0.0
                }
            };
            max_scores.push(max);
        }

        let supported = max_scores
            .iter()
            .filter(|&&s| s >= self.config.sent_t)
            .count();
        let total = targets.len();
        let support_rate = supported as f32 / total.max(1) as f32;
        let avg = max_scores.iter().sum::<f32>() / max_scores.len().max(1) as f32;
        let median = {
            let mut sorted = max_scores.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            sorted[sorted.len() / 2]
        };

        let (verdict, confidence_level) = self.classify(support_rate);

        VerifierReport {
            verdict,
            confidence_level,
            support_rate,
            avg,
            median,
            supported,
            total,
        }
    }

    /// Verdict policy with tolerance `δ = 0.05` below the grounded bar.
    fn classify(&self, support_rate: f32) -> (Verdict, ConfidenceLevel) {
        if support_rate >= self.config.support_p {
            (Verdict::Grounded, ConfidenceLevel::High)
        } else if support_rate >= (self.config.support_p - consts::DELTA).max(0.0) {
            let level = if support_rate >= 0.40 {
                ConfidenceLevel::Borderline
            } else if support_rate >= 0.20 {
                ConfidenceLevel::Weak
            } else {
                ConfidenceLevel::VeryWeak
            };
            (Verdict::NotSure, level)
        } else {
            (Verdict::NotGrounded, ConfidenceLevel::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::LexicalScorer;

    #[test]
    fn test_split_sentences_drops_short_and_dupes() {
        let text = "김치찌개는 맛있다. 김치찌개는 맛있다. 네. 재료를 준비한다!";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("맛있다"));
    }

    #[test]
    fn test_split_on_newlines() {
        let sentences = split_sentences("첫 번째 문장입니다\n두 번째 문장입니다");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_normalize_masks_numbers() {
        let normalized = normalize_text("김치 250g과  물 1.5컵");
        assert!(normalized.contains("NUM"));
        assert!(!normalized.contains("250"));
        assert!(!normalized.contains("  "));
    }

    #[test]
    fn test_extract_snippets_even_sampling() {
        let doc: String = (0..12)
            .map(|i| format!("문장 번호 {i} 입니다."))
            .collect::<Vec<_>>()
            .join(" ");
        let snippets = extract_snippets(&[doc], 8, 3);
        assert_eq!(snippets.len(), 3);
    }

    #[test]
    fn test_snippet_cap_respects_doc_limit() {
        let docs: Vec<String> = (0..10)
            .map(|i| format!("레시피 본문 {i} 이며 조리 과정을 설명한다."))
            .collect();
        let snippets = extract_snippets(&docs, 2, 3);
        assert!(snippets.len() <= 2 * 3);
    }

    #[tokio::test]
    async fn test_verify_empty_answer_is_unknown() {
        let verifier = GroundingVerifier::new(
            Some(Arc::new(LexicalScorer)),
            VerifierConfig::default(),
        );
        let report = verifier.verify("", &["문서".to_string()]).await;
        assert_eq!(report.verdict, Verdict::NotSure);
        assert_eq!(report.confidence_level, ConfidenceLevel::Unknown);
        assert_eq!(report.support_rate, 0.0);
    }

    #[tokio::test]
    async fn test_verify_no_snippets_is_unknown() {
        let verifier = GroundingVerifier::new(
            Some(Arc::new(LexicalScorer)),
            VerifierConfig::default(),
        );
        let report = verifier
            .verify("재료를 준비하고 물을 끓인다.", &[])
            .await;
        assert_eq!(report.verdict, Verdict::NotSure);
        assert_eq!(report.confidence_level, ConfidenceLevel::Unknown);
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_verify_without_reranker_is_unknown() {
        let verifier = GroundingVerifier::new(None, VerifierConfig::default());
        let report = verifier
            .verify("재료를 준비하고 물을 끓인다.", &["문서 본문이 여기 있다.".to_string()])
            .await;
        assert_eq!(report.confidence_level, ConfidenceLevel::Unknown);
    }

    #[tokio::test]
    async fn test_verify_supported_answer_is_grounded() {
        let verifier = GroundingVerifier::new(
            Some(Arc::new(LexicalScorer)),
            VerifierConfig::default(),
        );
        let doc = "kimchi stew needs kimchi and pork. boil water and add kimchi.".to_string();
        let report = verifier
            .verify("kimchi stew needs kimchi and pork.", &[doc])
            .await;
        assert_eq!(report.verdict, Verdict::Grounded);
        assert!(report.support_rate >= 0.15);
    }

    #[test]
    fn test_classify_bands() {
        let verifier = GroundingVerifier::new(None, VerifierConfig::default());
        assert_eq!(verifier.classify(0.5).0, Verdict::Grounded);
        assert_eq!(verifier.classify(0.12).0, Verdict::NotSure);
        assert_eq!(verifier.classify(0.12).1, ConfidenceLevel::VeryWeak);
        assert_eq!(verifier.classify(0.05).0, Verdict::NotGrounded);
        assert_eq!(verifier.classify(0.05).1, ConfidenceLevel::None);
    }
}
