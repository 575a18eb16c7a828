//! Retrieval for the recipe chat pipeline
//!
//! Features:
//! - Sparse BM25 (Okapi) index with a persistable snapshot
//! - Dense vector search through the injected store
//! - Hybrid fusion with RRF
//! - Post-retrieval filtering (length, similarity cutoff, domain cap)
//! - Optional cross-encoder reranking of the top candidates
//! - Sentence-level grounding verification
//! - Context building with aligned image selection

pub mod context;
pub mod filter;
pub mod rerank;
pub mod retriever;
pub mod sparse;
pub mod store;
pub mod tokenizer;
pub mod verifier;

pub use context::{build_context_with_images, BuiltContext, ContextConfig};
pub use filter::{FilterConfig, PostRetrievalFilter, RetrievedDoc, RetrievedSet};
pub use rerank::{CrossEncoderRerank, LexicalScorer};
pub use retriever::{HybridConfig, HybridRetriever};
pub use sparse::{Bm25Index, Bm25Snapshot, SparseHit, SparseIndexHandle};
pub use store::{HashEmbedder, InMemoryVectorStore};
pub use tokenizer::Tokenizer;
pub use verifier::{GroundingVerifier, VerifierConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl From<RagError> for recipe_chat_core::Error {
    fn from(err: RagError) -> Self {
        recipe_chat_core::Error::Provider(err.to_string())
    }
}
