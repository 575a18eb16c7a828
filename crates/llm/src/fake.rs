//! Scripted providers for tests and model-less operation
//!
//! `StaticLlm` answers deterministically by inspecting the prompt role
//! text, so a full pipeline run can be exercised without a model server.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use recipe_chat_core::{
    ChatMessage, Error, LlmOptions, LlmProvider, ModerationProvider, ModerationReport, Result,
};

/// Deterministic scripted LLM.
///
/// - `complete_with_schema` returns the configured route JSON.
/// - `complete_text` answers `in`/`out` for the domain-classifier prompt,
///   echoes a rewritten query for the rewriter prompt, and otherwise
///   returns the configured answer text.
pub struct StaticLlm {
    answer: String,
    route_json: serde_json::Value,
    ood_verdict: String,
    fail_schema: Mutex<bool>,
    fail_all: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl StaticLlm {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            route_json: serde_json::json!({
                "intent": "recipe",
                "needs_retrieval": true,
                "notes": "scripted"
            }),
            ood_verdict: "in".to_string(),
            fail_schema: Mutex::new(false),
            fail_all: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_route(mut self, intent: &str, needs_retrieval: bool) -> Self {
        self.route_json = serde_json::json!({
            "intent": intent,
            "needs_retrieval": needs_retrieval,
            "notes": "scripted"
        });
        self
    }

    pub fn with_ood_verdict(mut self, verdict: &str) -> Self {
        self.ood_verdict = verdict.to_string();
        self
    }

    /// Make structured-output calls fail, exercising the JSON retry path.
    pub fn failing_schema(self) -> Self {
        *self.fail_schema.lock() = true;
        self
    }

    /// Make every call fail, exercising heuristic fallbacks.
    pub fn failing(self) -> Self {
        *self.fail_all.lock() = true;
        self
    }

    /// Prompts seen so far, oldest first.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, messages: &[ChatMessage]) {
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.calls.lock().push(joined);
    }
}

#[async_trait]
impl LlmProvider for StaticLlm {
    async fn complete_text(&self, messages: &[ChatMessage], _opts: &LlmOptions) -> Result<String> {
        self.record(messages);
        if *self.fail_all.lock() {
            return Err(Error::Provider("scripted failure".to_string()));
        }
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if prompt.contains("분류기") {
            return Ok(self.ood_verdict.clone());
        }
        if prompt.contains("리라이터") {
            // Echo the original question back with a retrieval-friendly tail.
            let rewritten = prompt
                .lines()
                .skip_while(|l| !l.starts_with("원본 질문"))
                .nth(1)
                .unwrap_or("")
                .trim()
                .to_string();
            return Ok(format!("{} 레시피", rewritten).trim().to_string());
        }
        if prompt.contains("JSON으로만") {
            return Ok(self.route_json.to_string());
        }
        Ok(self.answer.clone())
    }

    async fn complete_with_schema(
        &self,
        _schema: &serde_json::Value,
        messages: &[ChatMessage],
        _opts: &LlmOptions,
    ) -> Result<serde_json::Value> {
        self.record(messages);
        if *self.fail_all.lock() || *self.fail_schema.lock() {
            return Err(Error::Provider("scripted schema failure".to_string()));
        }
        Ok(self.route_json.clone())
    }
}

/// Scripted moderation classifier.
pub struct StaticModeration {
    report: ModerationReport,
    fail: bool,
}

impl StaticModeration {
    pub fn clean() -> Self {
        Self {
            report: ModerationReport::clean(),
            fail: false,
        }
    }

    /// Flagged with the given categories set.
    pub fn flagging(categories: &[&str]) -> Self {
        let mut map = HashMap::new();
        for c in categories {
            map.insert((*c).to_string(), true);
        }
        Self {
            report: ModerationReport {
                flagged: true,
                categories: map,
                category_scores: HashMap::new(),
            },
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            report: ModerationReport::clean(),
            fail: true,
        }
    }
}

#[async_trait]
impl ModerationProvider for StaticModeration {
    async fn moderate(&self, _text: &str) -> Result<ModerationReport> {
        if self.fail {
            return Err(Error::Provider("scripted moderation failure".to_string()));
        }
        Ok(self.report.clone())
    }
}
