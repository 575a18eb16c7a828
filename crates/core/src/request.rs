//! Request/response surface of the pipeline orchestrator

use serde::{Deserialize, Serialize};

use crate::route::{Intent, Route};
use crate::verdict::{Verdict, VerifierReport};

/// Bounds on the `k` request field.
pub const K_MIN: usize = 1;
pub const K_MAX: usize = 50;

/// Bounds on the `max_images` request field.
pub const MAX_IMAGES_CAP: usize = 12;

/// When and how image URLs are attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    /// Intent whitelist + dish alignment + grounded-verdict gating.
    #[default]
    Strict,
    /// Intent whitelist only.
    Lenient,
    /// No gating beyond `max_images`.
    Always,
}

/// A user question with pipeline controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
    /// Number of documents to retrieve, in `[1, 50]`.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Per-request model hint; configuration default when `None`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enable_rewrite: bool,
    /// Allow answering despite a low-confidence result.
    #[serde(default)]
    pub allow_low_confidence: bool,
    /// Explicit decision for a pending low-confidence state:
    /// `proceed` | `clarify`.
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_images: bool,
    #[serde(default)]
    pub image_policy: ImagePolicy,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

fn default_k() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_max_images() -> usize {
    5
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: default_k(),
            model: None,
            enable_rewrite: true,
            allow_low_confidence: false,
            decision: None,
            session_id: None,
            include_images: true,
            image_policy: ImagePolicy::default(),
            max_images: default_max_images(),
        }
    }

    /// Validate request-level bounds. Returns the user-facing problem.
    pub fn validate(&self) -> Result<(), String> {
        if !(K_MIN..=K_MAX).contains(&self.k) {
            return Err(format!("k must be between {} and {}", K_MIN, K_MAX));
        }
        if self.max_images > MAX_IMAGES_CAP {
            return Err(format!("max_images must be at most {}", MAX_IMAGES_CAP));
        }
        Ok(())
    }
}

/// Answering mode tag on a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    ContextBased,
    GeneralKnowledge,
    NoContextRefusal,
    Clarify,
    OodBlock,
}

/// A source reference surfaced with the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

/// Distribution summary over the known similarity values of a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoresSummary {
    pub count: usize,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub avg: Option<f32>,
    pub p50: Option<f32>,
    pub p90: Option<f32>,
}

impl ScoresSummary {
    pub fn from_values(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let sum: f32 = sorted.iter().sum();
        Self {
            count,
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            avg: Some(sum / count as f32),
            p50: Some(sorted[count / 2]),
            p90: Some(sorted[(0.9 * (count - 1) as f32) as usize]),
        }
    }
}

/// Observability block describing the retrieval configuration and outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub score_mode: String,
    pub k: usize,
    pub mmr_enabled: bool,
    pub mmr_fetch: usize,
    pub mmr_lambda: f32,
    pub similarity_threshold: f32,
    pub domain_cap: usize,
    pub have_scores: bool,
    pub scores_summary: ScoresSummary,
    pub unique_domains: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_metrics_1: Option<VerifierReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_metrics_2: Option<VerifierReport>,
}

/// Full pipeline response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub router: Route,
    pub intent: Intent,
    pub original_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    pub context_text: String,
    pub context_len: usize,
    pub used_docs: usize,
    pub context_found: bool,
    pub retrieved_count: usize,
    /// First 5 known similarity values.
    pub retrieved_scores: Vec<f32>,
    pub image_urls: Vec<String>,
    pub k: usize,
    pub mode: ResponseMode,
    /// e.g. `has_docs`, `no_docs`, `out_of_domain`, `clarify_first`,
    /// `decision_pending`, `decision_clarify`, `internal_error`.
    pub branch: String,
    /// Ordered stage tags for observability.
    pub pipeline: Vec<String>,
    pub session_id: String,
    pub is_new_session: bool,
    pub history_used: bool,
    pub conversation_turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_verdict_1: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_verdict_2: Option<Verdict>,
    pub corrected: bool,
    pub final_pass: u8,
    /// Up to 3 `{title, url}` entries aligned to the selected context docs.
    pub sources: Vec<SourceRef>,
    pub low_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub decision_required: bool,
    pub suggested_actions: Vec<String>,
    pub retrieval_metrics: RetrievalMetrics,
}
