//! In-memory vector store
//!
//! Cosine-similarity store over an injected embedding provider. Serves
//! local corpora and the test suites; production deployments inject their
//! own `VectorStore` implementation instead.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use recipe_chat_core::traits::cosine_similarity;
use recipe_chat_core::{
    DocMetadata, Document, EmbeddingProvider, Error, Result, VectorStore,
};

/// Deterministic feature-hashing embedder.
///
/// Lowercased tokens and their character bigrams are hashed (FNV-1a)
/// into signed buckets, so texts sharing recipe vocabulary land close in
/// cosine space while unrelated texts stay near orthogonal. No model
/// required; adequate for tests and for exercising the pipeline without
/// an embedding service.
pub struct HashEmbedder {
    dim: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(FNV_PRIME))
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Add one hashed feature. The low hash bit picks the sign so bucket
    /// collisions tend to cancel instead of piling up.
    fn bump(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash >> 1) as usize % self.dim;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            self.bump(&mut vector, token, 1.0);
            // Character bigrams give partial credit across particle and
            // compound variations (김치찌개 vs 김치찌개는).
            let chars: Vec<char> = token.chars().collect();
            for pair in chars.windows(2) {
                let bigram: String = pair.iter().collect();
                self.bump(&mut vector, &bigram, 0.5);
            }
        }
        let length = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if length > 0.0 {
            for v in &mut vector {
                *v /= length;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Documents with precomputed embeddings behind a read-write lock.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Embed and insert one document.
    pub async fn add(&self, doc: Document) -> Result<()> {
        let embedding = self.embedder.embed_query(&doc.text).await?;
        self.entries.write().push((doc, embedding));
        Ok(())
    }

    /// Embed and insert a batch of documents.
    pub async fn add_all(&self, docs: Vec<Document>) -> Result<()> {
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != docs.len() {
            return Err(Error::Provider(
                "embedding batch length mismatch".to_string(),
            ));
        }
        let mut entries = self.entries.write();
        for (doc, embedding) in docs.into_iter().zip(embeddings) {
            entries.push((doc, embedding));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let entries = self.entries.read();

        let mut scored: Vec<(Document, f32)> = entries
            .iter()
            .map(|(doc, embedding)| {
                let distance = 1.0 - cosine_similarity(&query_vec, embedding);
                (doc.clone(), distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn all_entries(&self) -> Result<Vec<(String, DocMetadata)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(doc, _)| (doc.text.clone(), doc.metadata.clone()))
            .collect())
    }
}
