//! Centralized constants
//!
//! Single source of truth for domain-agnostic defaults used across the
//! workspace. Tunable values are overridable through the environment via
//! `Settings::from_env`; this module only holds the fallbacks and the
//! fixed algorithm parameters.

/// Retrieval defaults
pub mod retrieval {
    /// Default number of documents to retrieve per request.
    pub const K_DEFAULT: usize = 12;

    /// Minimum similarity to keep a document when similarities are known.
    pub const SIMILARITY_THRESHOLD: f32 = 0.08;

    /// Maximum kept documents sharing one source host.
    pub const DOMAIN_CAP: usize = 3;

    /// Minimum document length (chars) to keep a retrieval hit.
    pub const MIN_DOC_LEN: usize = 20;

    /// Fetch width for MMR and similarity backfill.
    pub const MMR_FETCH: usize = 150;

    /// MMR relevance/diversity balance.
    pub const MMR_LAMBDA: f32 = 0.7;
}

/// Hybrid fusion defaults
pub mod hybrid {
    /// Dense weight in RRF fusion (sparse weight is `1 - alpha`).
    pub const ALPHA: f32 = 0.5;

    /// RRF rank constant.
    pub const K_RRF: usize = 60;

    /// Candidates fetched from each side before fusion.
    pub const FETCH_K: usize = 24;

    /// Rank assigned to a document missing from one side.
    pub const MISSING_RANK: usize = 1000;
}

/// BM25 parameters (Okapi)
pub mod bm25 {
    pub const K1: f32 = 1.5;
    pub const B: f32 = 0.75;

    /// Snapshot file name under `<base>/bm25_cache/`.
    pub const SNAPSHOT_FILE: &str = "bm25_index.bin";
    pub const SNAPSHOT_DIR: &str = "bm25_cache";
}

/// Cross-encoder verification defaults
pub mod verifier {
    /// Per-sentence support threshold.
    pub const CE_SENT_T: f32 = 0.15;

    /// Support-rate threshold for a grounded verdict.
    pub const CE_SUPPORT_P: f32 = 0.15;

    /// Verdict tolerance band below `CE_SUPPORT_P`.
    pub const DELTA: f32 = 0.05;

    /// Documents sampled for snippets.
    pub const CE_MAX_DOCS: usize = 8;

    /// Snippets sampled per document.
    pub const CE_SNIPPETS_PER_DOC: usize = 3;

    /// Candidates rescored by the optional rerank stage.
    pub const CE_TOPN: usize = 30;

    /// Snippet length cap (chars).
    pub const SNIPPET_MAX_CHARS: usize = 400;

    /// Minimum sentence length (chars) to score.
    pub const MIN_SENTENCE_CHARS: usize = 5;

    /// Dedup window over sentence prefixes (chars).
    pub const SENTENCE_DEDUP_PREFIX: usize = 80;
}

/// Out-of-domain gate defaults
pub mod ood {
    /// Cosine threshold against the domain centroid.
    pub const COS_THRESHOLD: f32 = 0.35;

    /// Two-sided margin around the threshold for the LLM tiebreak.
    pub const COS_MARGIN: f32 = 0.05;

    /// Follow-up bypass: max chars for a "very short" query.
    pub const SHORT_FOLLOWUP_CHARS: usize = 4;

    /// Follow-up bypass: max whitespace tokens.
    pub const SHORT_FOLLOWUP_TOKENS: usize = 2;
}

/// Context builder defaults
pub mod context {
    /// Maximum documents concatenated into the grounding context.
    pub const MAX_DOCS: usize = 5;

    /// Maximum context length after concatenation (chars).
    pub const MAX_LENGTH: usize = 6000;

    /// Separator between formatted documents.
    pub const SEPARATOR: &str = "\n\n---\n\n";

    /// Minimum document length (chars) to include.
    pub const MIN_DOC_CHARS: usize = 20;
}

/// Conversation memory defaults
pub mod memory {
    /// Retained turns (user+assistant pairs); history cap is twice this.
    pub const MAX_TURNS: usize = 5;

    /// Idle session expiry (minutes).
    pub const SESSION_TTL_MINUTES: i64 = 30;

    /// Turns included in the recent-context summary.
    pub const SUMMARY_TURNS: usize = 3;

    /// Most recent user/assistant pairs fed to the generator.
    pub const HISTORY_PAIRS_FOR_GENERATION: usize = 3;
}

/// Low-confidence gate defaults
pub mod lowconf {
    /// Minimum documents for a confident answer (balanced mode).
    pub const MIN_CONF_DOCS: usize = 1;

    /// Extra slack over the similarity threshold used by the balanced
    /// predicate. The asymmetry against the raw threshold is intentional
    /// and preserved.
    pub const SIM_SLACK: f32 = 0.05;

    /// Support-rate floor under which a notSure verdict counts as weak.
    pub const NOTSURE_SUPPORT_FLOOR: f32 = 0.30;
}

/// Operational timeouts (milliseconds)
pub mod timeouts {
    /// Per-stage LLM call deadline.
    pub const LLM_REQUEST_MS: u64 = 60_000;

    /// Moderation call deadline.
    pub const MODERATION_MS: u64 = 10_000;

    /// Embedding call deadline.
    pub const EMBEDDING_MS: u64 = 20_000;

    /// Whole-request deadline.
    pub const REQUEST_MS: u64 = 120_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_weights_valid() {
        assert!((0.0..=1.0).contains(&hybrid::ALPHA));
        assert!(hybrid::K_RRF >= 1);
    }

    #[test]
    fn test_verifier_thresholds_valid() {
        assert!((0.0..=1.0).contains(&verifier::CE_SENT_T));
        assert!((0.0..=1.0).contains(&verifier::CE_SUPPORT_P));
        assert!(verifier::DELTA > 0.0);
    }

    #[test]
    fn test_ood_band_valid() {
        assert!(ood::COS_MARGIN < ood::COS_THRESHOLD);
    }
}
