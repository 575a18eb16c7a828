//! Request orchestration for the recipe chat service
//!
//! Wires the staged pipeline: OOD guard → router → (rewrite) → hybrid
//! retrieve → filter → (rerank) → context build → generate → verify,
//! with a corrective second pass on weak verification, a low-confidence
//! decision protocol, outbound link hygiene and per-session memory.

pub mod generate;
pub mod memory;
pub mod ood;
pub mod pipeline;
pub mod rewrite;
pub mod router;
pub mod sanitize;

pub use generate::{extract_target_dish, AnswerGenerator};
pub use memory::{ConversationMemory, Message, MessageRole, PendingDecision, SessionSnapshot};
pub use ood::{OodGuard, OodOutcome};
pub use pipeline::{Pipeline, PipelineDeps};
pub use rewrite::QueryRewriter;
pub use router::IntentRouter;

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("session error: {0}")]
    Session(String),

    #[error("stage error: {0}")]
    Stage(String),
}

impl From<AgentError> for recipe_chat_core::Error {
    fn from(err: AgentError) -> Self {
        recipe_chat_core::Error::Session(err.to_string())
    }
}
