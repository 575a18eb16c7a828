//! Environment-driven settings
//!
//! Every tuning knob recognized by the pipeline, loaded from the process
//! environment with fallbacks from `constants`. Boolean knobs accept
//! `1`/`0` as well as `true`/`false`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{hybrid, lowconf, memory, ood, retrieval, timeouts, verifier};
use crate::ConfigError;

/// Low-confidence detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LowConfMode {
    Strict,
    #[default]
    Balanced,
    Lenient,
}

impl LowConfMode {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "strict" => LowConfMode::Strict,
            "lenient" => LowConfMode::Lenient,
            _ => LowConfMode::Balanced,
        }
    }
}

/// Full service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Paths
    /// Base directory for derived state (BM25 snapshot).
    pub base_dir: PathBuf,
    /// OOD prototypes JSON path; missing file means built-in fallback.
    pub ood_prototypes_path: PathBuf,
    /// Vector database directory; an input, never written by the core.
    pub vector_dir: PathBuf,
    /// Collection name inside the vector database.
    pub collection_name: String,

    // Retrieval
    pub k_default: usize,
    pub similarity_threshold: f32,
    pub domain_cap: usize,
    pub min_doc_len: usize,
    pub rerank_mmr: bool,
    pub mmr_fetch: usize,
    pub mmr_lambda: f32,

    // Hybrid fusion
    pub use_hybrid_search: bool,
    pub hybrid_alpha: f32,
    pub hybrid_k_rrf: usize,
    pub hybrid_fetch_k: Option<usize>,

    // Cross-encoder rerank + verification
    pub use_ce_rerank: bool,
    pub ce_topn: usize,
    pub ce_sent_t: f32,
    pub ce_support_p: f32,
    pub ce_max_docs: usize,
    pub ce_snippets_per_doc: usize,

    // Corrective retrieval + confidence gate
    pub enable_crag: bool,
    pub lowconf_mode: LowConfMode,
    pub min_conf_docs: usize,
    pub allow_no_context_answer: bool,

    // Stages
    pub enable_query_rewrite: bool,
    pub enable_moderation: bool,

    // OOD gate
    pub ood_cos_threshold: f32,
    pub ood_cos_margin: f32,

    // Models (injected capability; defaults only)
    pub generation_model: String,
    pub router_model: String,
    pub rewrite_model: String,
    pub ood_model: String,
    pub generation_temperature: f32,
    pub rewrite_temperature: f32,

    // Sessions
    pub memory_max_turns: usize,
    pub session_ttl_minutes: i64,

    // Server
    pub bind_addr: String,

    // Deadlines
    pub llm_timeout: Duration,
    pub moderation_timeout: Duration,
    pub embedding_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            ood_prototypes_path: PathBuf::from("config/ood_prototypes.json"),
            vector_dir: PathBuf::from("chroma_db"),
            collection_name: "recipes-v1".to_string(),
            k_default: retrieval::K_DEFAULT,
            similarity_threshold: retrieval::SIMILARITY_THRESHOLD,
            domain_cap: retrieval::DOMAIN_CAP,
            min_doc_len: retrieval::MIN_DOC_LEN,
            rerank_mmr: true,
            mmr_fetch: retrieval::MMR_FETCH,
            mmr_lambda: retrieval::MMR_LAMBDA,
            use_hybrid_search: true,
            hybrid_alpha: hybrid::ALPHA,
            hybrid_k_rrf: hybrid::K_RRF,
            hybrid_fetch_k: Some(hybrid::FETCH_K),
            use_ce_rerank: false,
            ce_topn: verifier::CE_TOPN,
            ce_sent_t: verifier::CE_SENT_T,
            ce_support_p: verifier::CE_SUPPORT_P,
            ce_max_docs: verifier::CE_MAX_DOCS,
            ce_snippets_per_doc: verifier::CE_SNIPPETS_PER_DOC,
            enable_crag: true,
            lowconf_mode: LowConfMode::Balanced,
            min_conf_docs: lowconf::MIN_CONF_DOCS,
            allow_no_context_answer: false,
            enable_query_rewrite: true,
            enable_moderation: true,
            ood_cos_threshold: ood::COS_THRESHOLD,
            ood_cos_margin: ood::COS_MARGIN,
            generation_model: "gpt-4o".to_string(),
            router_model: "gpt-4o".to_string(),
            rewrite_model: "gpt-4o".to_string(),
            ood_model: "gpt-4o".to_string(),
            generation_temperature: 0.0,
            rewrite_temperature: 0.0,
            memory_max_turns: memory::MAX_TURNS,
            session_ttl_minutes: memory::SESSION_TTL_MINUTES,
            bind_addr: "0.0.0.0:8000".to_string(),
            llm_timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            moderation_timeout: Duration::from_millis(timeouts::MODERATION_MS),
            embedding_timeout: Duration::from_millis(timeouts::EMBEDDING_MS),
            request_timeout: Duration::from_millis(timeouts::REQUEST_MS),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "on" | "yes"),
        Err(_) => default,
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let router_model = env_string("ROUTER_MODEL", &defaults.router_model);
        Self {
            base_dir: PathBuf::from(env_string("BASE_DIR", ".")),
            ood_prototypes_path: PathBuf::from(env_string(
                "OOD_PROTOTYPES_PATH",
                "config/ood_prototypes.json",
            )),
            vector_dir: PathBuf::from(env_string("VECTOR_DIR", "chroma_db")),
            collection_name: env_string("COLLECTION_NAME", &defaults.collection_name),
            k_default: env_usize("K_DEFAULT", defaults.k_default),
            similarity_threshold: env_f32("SIMILARITY_THRESHOLD", defaults.similarity_threshold),
            domain_cap: env_usize("DOMAIN_CAP", defaults.domain_cap),
            min_doc_len: env_usize("MIN_DOC_LEN", defaults.min_doc_len),
            rerank_mmr: env_bool("RERANK_MMR", defaults.rerank_mmr),
            mmr_fetch: env_usize("MMR_FETCH", defaults.mmr_fetch),
            mmr_lambda: env_f32("MMR_LAMBDA", defaults.mmr_lambda),
            use_hybrid_search: env_bool("USE_HYBRID_SEARCH", defaults.use_hybrid_search),
            hybrid_alpha: env_f32("HYBRID_ALPHA", defaults.hybrid_alpha),
            hybrid_k_rrf: env_usize("HYBRID_K_RRF", defaults.hybrid_k_rrf),
            hybrid_fetch_k: std::env::var("HYBRID_FETCH_K")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .or(defaults.hybrid_fetch_k),
            use_ce_rerank: env_bool("USE_CE_RERANK", defaults.use_ce_rerank),
            ce_topn: env_usize("CE_TOPN", defaults.ce_topn),
            ce_sent_t: env_f32("CE_SENT_T", defaults.ce_sent_t),
            ce_support_p: env_f32("CE_SUPPORT_P", defaults.ce_support_p),
            ce_max_docs: env_usize("CE_MAX_DOCS", defaults.ce_max_docs),
            ce_snippets_per_doc: env_usize("CE_SNIPPETS_PER_DOC", defaults.ce_snippets_per_doc),
            enable_crag: env_bool("ENABLE_CRAG", defaults.enable_crag),
            lowconf_mode: LowConfMode::parse(&env_string("LOWCONF_MODE", "balanced")),
            min_conf_docs: env_usize("MIN_CONF_DOCS", defaults.min_conf_docs),
            allow_no_context_answer: env_bool(
                "ALLOW_NO_CONTEXT_ANSWER",
                defaults.allow_no_context_answer,
            ),
            enable_query_rewrite: env_bool("ENABLE_QUERY_REWRITE", defaults.enable_query_rewrite),
            enable_moderation: env_bool("ENABLE_MODERATION", defaults.enable_moderation),
            ood_cos_threshold: env_f32("OOD_COS_THRESHOLD", defaults.ood_cos_threshold),
            ood_cos_margin: env_f32("OOD_COS_MARGIN", defaults.ood_cos_margin),
            generation_model: env_string("GENERATION_MODEL", &defaults.generation_model),
            rewrite_model: env_string("REWRITE_MODEL", &defaults.rewrite_model),
            ood_model: env_string("OOD_MODEL", &router_model),
            router_model,
            generation_temperature: env_f32(
                "GENERATION_TEMPERATURE",
                defaults.generation_temperature,
            ),
            rewrite_temperature: env_f32("REWRITE_TEMPERATURE", defaults.rewrite_temperature),
            memory_max_turns: env_usize("MEMORY_MAX_TURNS", defaults.memory_max_turns),
            session_ttl_minutes: env_i64("SESSION_TTL_MINUTES", defaults.session_ttl_minutes),
            bind_addr: env_string("BIND_ADDR", &defaults.bind_addr),
            llm_timeout: Duration::from_millis(env_i64(
                "LLM_TIMEOUT_MS",
                timeouts::LLM_REQUEST_MS as i64,
            ) as u64),
            moderation_timeout: Duration::from_millis(env_i64(
                "MODERATION_TIMEOUT_MS",
                timeouts::MODERATION_MS as i64,
            ) as u64),
            embedding_timeout: Duration::from_millis(env_i64(
                "EMBEDDING_TIMEOUT_MS",
                timeouts::EMBEDDING_MS as i64,
            ) as u64),
            request_timeout: Duration::from_millis(env_i64(
                "REQUEST_TIMEOUT_MS",
                timeouts::REQUEST_MS as i64,
            ) as u64),
        }
    }

    /// Effective per-side fetch width for hybrid fusion: `2·k` by default.
    pub fn hybrid_fetch_k(&self, k: usize) -> usize {
        self.hybrid_fetch_k.unwrap_or(k * 2)
    }

    /// BM25 snapshot path under the base directory.
    pub fn bm25_snapshot_path(&self) -> PathBuf {
        use crate::constants::bm25;
        self.base_dir.join(bm25::SNAPSHOT_DIR).join(bm25::SNAPSHOT_FILE)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            return Err(ConfigError::InvalidValue {
                field: "hybrid_alpha".to_string(),
                message: format!("must be in [0,1], got {}", self.hybrid_alpha),
            });
        }
        if self.hybrid_k_rrf < 1 {
            return Err(ConfigError::InvalidValue {
                field: "hybrid_k_rrf".to_string(),
                message: "must be >= 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ce_sent_t) || !(0.0..=1.0).contains(&self.ce_support_p) {
            return Err(ConfigError::InvalidValue {
                field: "ce thresholds".to_string(),
                message: "must be in [0,1]".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.k_default, 12);
        assert_eq!(settings.lowconf_mode, LowConfMode::Balanced);
    }

    #[test]
    fn test_hybrid_fetch_k_default_doubles_k() {
        let mut settings = Settings::default();
        settings.hybrid_fetch_k = None;
        assert_eq!(settings.hybrid_fetch_k(8), 16);
        settings.hybrid_fetch_k = Some(24);
        assert_eq!(settings.hybrid_fetch_k(8), 24);
    }

    #[test]
    fn test_lowconf_mode_parse() {
        assert_eq!(LowConfMode::parse("strict"), LowConfMode::Strict);
        assert_eq!(LowConfMode::parse("LENIENT"), LowConfMode::Lenient);
        assert_eq!(LowConfMode::parse("whatever"), LowConfMode::Balanced);
    }

    #[test]
    fn test_snapshot_path() {
        let mut settings = Settings::default();
        settings.base_dir = PathBuf::from("/tmp/app");
        assert_eq!(
            settings.bm25_snapshot_path(),
            PathBuf::from("/tmp/app/bm25_cache/bm25_index.bin")
        );
    }
}
