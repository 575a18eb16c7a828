//! Grounding verdict types

use serde::{Deserialize, Serialize};

/// Outcome of the sentence-level grounding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "grounded")]
    Grounded,
    #[serde(rename = "notSure")]
    NotSure,
    #[serde(rename = "notGrounded")]
    NotGrounded,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Grounded => "grounded",
            Verdict::NotSure => "notSure",
            Verdict::NotGrounded => "notGrounded",
        }
    }
}

/// Confidence sub-level attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Borderline,
    Weak,
    VeryWeak,
    None,
    Unknown,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Borderline => "borderline",
            ConfidenceLevel::Weak => "weak",
            ConfidenceLevel::VeryWeak => "very_weak",
            ConfidenceLevel::None => "none",
            ConfidenceLevel::Unknown => "unknown",
        }
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, ConfidenceLevel::Weak | ConfidenceLevel::VeryWeak)
    }
}

/// Full verifier output for one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierReport {
    pub verdict: Verdict,
    pub confidence_level: ConfidenceLevel,
    /// `supported / max(1, total_target_sentences)`, in `[0, 1]`.
    pub support_rate: f32,
    /// Mean of per-sentence max scores.
    pub avg: f32,
    /// Median of per-sentence max scores.
    pub median: f32,
    /// Number of sentences whose max snippet score cleared the threshold.
    pub supported: usize,
    /// Number of target sentences scored.
    pub total: usize,
}

impl VerifierReport {
    /// The degenerate result: no sentences, no snippets, or verifier
    /// unavailable.
    pub fn unknown(total: usize) -> Self {
        Self {
            verdict: Verdict::NotSure,
            confidence_level: ConfidenceLevel::Unknown,
            support_rate: 0.0,
            avg: 0.0,
            median: 0.0,
            supported: 0,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_wire_names() {
        assert_eq!(
            serde_json::to_string(&Verdict::NotGrounded).unwrap(),
            "\"notGrounded\""
        );
        assert_eq!(
            serde_json::to_string(&ConfidenceLevel::VeryWeak).unwrap(),
            "\"very_weak\""
        );
    }

    #[test]
    fn test_unknown_report() {
        let report = VerifierReport::unknown(3);
        assert_eq!(report.verdict, Verdict::NotSure);
        assert_eq!(report.confidence_level, ConfidenceLevel::Unknown);
        assert_eq!(report.support_rate, 0.0);
        assert_eq!(report.total, 3);
    }
}
