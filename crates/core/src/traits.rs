//! Provider traits consumed by the pipeline
//!
//! The vector store, embedding provider, LLM, moderation classifier and
//! cross-encoder reranker are external collaborators. The pipeline only
//! depends on these traits; adapters live in sibling crates and are
//! injected at construction time.

use async_trait::async_trait;

use crate::document::{DocMetadata, Document};
use crate::llm_types::{ChatMessage, LlmOptions, ModerationReport};
use crate::{Error, Result};

/// Dense vector store over the embedded document corpus.
///
/// `similarity_search_with_score` returns *distances* (lower is better);
/// callers convert with `1 - distance` when a similarity is needed.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f32)>>;

    /// Max-marginal-relevance selection. The default derives a diverse-free
    /// approximation from the scored search for stores without native MMR.
    async fn max_marginal_relevance_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        _lambda: f32,
    ) -> Result<Vec<Document>> {
        let scored = self
            .similarity_search_with_score(query, fetch_k.max(k))
            .await?;
        Ok(scored.into_iter().take(k).map(|(d, _)| d).collect())
    }

    /// Enumerate every `(text, metadata)` pair in the underlying collection.
    /// Used once to bootstrap the BM25 index.
    async fn all_entries(&self) -> Result<Vec<(String, DocMetadata)>>;
}

/// Text embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// LLM completion provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Single-turn text completion.
    async fn complete_text(&self, messages: &[ChatMessage], opts: &LlmOptions) -> Result<String>;

    /// Completion constrained to a JSON object matching `schema`.
    /// Implementations may enforce the schema via provider-native
    /// structured output or via forced JSON formatting.
    async fn complete_with_schema(
        &self,
        schema: &serde_json::Value,
        messages: &[ChatMessage],
        opts: &LlmOptions,
    ) -> Result<serde_json::Value>;
}

/// Safety moderation provider.
#[async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationReport>;
}

/// Cross-encoder scorer over `(query, passage)` pairs.
///
/// Scores are normalized to `[0, 1]`, higher meaning more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

/// Cosine similarity between two equal-length vectors; 0.0 on mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Convenience conversion for provider adapter errors.
pub fn provider_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Provider(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identity() {
        let v = vec![0.5, 0.5, 0.7071];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
