//! Chat message and provider-exchange types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message exchanged with the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call LLM options. The model is an injected capability; the default
/// comes from configuration, with an optional per-request hint.
#[derive(Debug, Clone, Default)]
pub struct LlmOptions {
    /// Model override; provider default when `None`.
    pub model: Option<String>,
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f32>,
}

impl LlmOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            temperature: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}

/// Safety classifier result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationReport {
    pub flagged: bool,
    /// Category name -> triggered flag.
    #[serde(default)]
    pub categories: HashMap<String, bool>,
    /// Category name -> score, when the provider exposes scores.
    #[serde(default)]
    pub category_scores: HashMap<String, f32>,
}

impl ModerationReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_category_flagged(&self, category: &str) -> bool {
        self.categories.get(category).copied().unwrap_or(false)
    }
}
