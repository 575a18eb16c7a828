//! Core types and traits for the recipe chat pipeline
//!
//! This crate defines the domain model shared by every stage of the
//! request pipeline (documents, routes, verdicts, request/response
//! shapes) and the provider traits the pipeline consumes (vector store,
//! embeddings, LLM, moderation, reranker). Concrete adapters live in
//! sibling crates; nothing here performs I/O.

pub mod document;
pub mod llm_types;
pub mod request;
pub mod route;
pub mod traits;
pub mod verdict;

pub use document::{stable_doc_id, DocKey, DocMetadata, Document, ScoreMode, ScoredDoc};
pub use llm_types::{ChatMessage, ChatRole, LlmOptions, ModerationReport};
pub use request::{
    AskRequest, AskResponse, ImagePolicy, ResponseMode, RetrievalMetrics, ScoresSummary,
    SourceRef,
};
pub use route::{Intent, Route};
pub use traits::{EmbeddingProvider, LlmProvider, ModerationProvider, Reranker, VectorStore};
pub use verdict::{ConfidenceLevel, Verdict, VerifierReport};

use thiserror::Error;

/// Workspace-wide error taxonomy.
///
/// Stage implementations return their own crate errors and convert into
/// this at the pipeline boundary; the orchestrator decides the fallback
/// for each variant.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (empty query, out-of-range k). No external calls made.
    #[error("input error: {0}")]
    Input(String),

    /// Moderation hit. Carries the canned refusal text; never retried.
    #[error("safety block: {0}")]
    SafetyBlock(String),

    /// Out-of-domain query. Carries the canned domain refusal.
    #[error("domain block: {0}")]
    DomainBlock(String),

    /// Both dense and sparse retrieval failed.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Transient provider failure (embed/LLM/moderation/reranker).
    /// The affected stage falls back; the request still completes.
    #[error("provider error: {0}")]
    Provider(String),

    /// Session store failure.
    #[error("session error: {0}")]
    Session(String),

    /// Anything unexpected, caught at the orchestrator boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
