//! LLM provider adapters
//!
//! An OpenAI-compatible HTTP backend implementing the core provider
//! traits (completion, structured output, embeddings, moderation) with
//! bounded retries, plus scripted fakes for tests.

pub mod backend;
pub mod fake;

pub use backend::{OpenAiBackend, OpenAiConfig};
pub use fake::{StaticLlm, StaticModeration};

use thiserror::Error;

/// LLM adapter errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("response error: {0}")]
    Response(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),
}

impl From<LlmError> for recipe_chat_core::Error {
    fn from(err: LlmError) -> Self {
        recipe_chat_core::Error::Provider(err.to_string())
    }
}
