//! Hybrid retriever
//!
//! Fuses dense (vector) and sparse (BM25) candidates with Reciprocal Rank
//! Fusion. Either side may fail independently: a failed sparse side
//! degrades to pure dense scoring, a failed dense side leaves the sparse
//! ranking, and only both failing is a retrieval error.

use std::collections::HashMap;
use std::sync::Arc;

use recipe_chat_config::constants::hybrid;
use recipe_chat_core::{DocKey, DocMetadata, Error, Result, ScoreMode, VectorStore};

use crate::sparse::SparseIndexHandle;

/// Fusion parameters.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Dense weight in `[0, 1]`; sparse weight is `1 - alpha`.
    pub alpha: f32,
    /// RRF rank constant, `>= 1`.
    pub k_rrf: usize,
    /// Per-side candidate width; `2·k` when `None`.
    pub fetch_k: Option<usize>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            alpha: hybrid::ALPHA,
            k_rrf: hybrid::K_RRF,
            fetch_k: Some(hybrid::FETCH_K),
        }
    }
}

/// One fused retrieval hit.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub text: String,
    pub meta: DocMetadata,
    /// RRF score, or `1 - distance` on the dense-only fallback path.
    pub score: f32,
}

struct RankEntry {
    text: String,
    meta: DocMetadata,
    dense_rank: Option<usize>,
    sparse_rank: Option<usize>,
}

/// Dense + sparse retrieval with RRF fusion.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    sparse: Arc<SparseIndexHandle>,
    config: HybridConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        sparse: Arc<SparseIndexHandle>,
        config: HybridConfig,
    ) -> Self {
        Self {
            store,
            sparse,
            config,
        }
    }

    /// Retrieve the top `k` fused hits for a query.
    ///
    /// Returns the hits and the score mode the similarity values live in.
    pub async fn search(&self, query: &str, k: usize) -> Result<(Vec<FusedHit>, ScoreMode)> {
        if query.trim().is_empty() || k == 0 {
            return Ok((Vec::new(), ScoreMode::HybridRrf));
        }
        let fetch_k = self.config.fetch_k.unwrap_or(k * 2).max(k);

        let dense = match self
            .store
            .similarity_search_with_score(query, fetch_k)
            .await
        {
            Ok(results) => Some(results),
            Err(e) => {
                tracing::warn!(error = %e, "dense retrieval failed");
                None
            }
        };

        let sparse_index = self.sparse.get_or_build(self.store.as_ref()).await;
        let sparse_hits = sparse_index
            .as_ref()
            .map(|index| index.search(query, fetch_k, self.sparse.tokenizer()));

        match (dense, sparse_hits) {
            (None, None) => Err(Error::RetrievalUnavailable(
                "both dense and sparse retrieval failed".to_string(),
            )),
            // Sparse unavailable: degrade to pure dense similarities.
            (Some(dense), None) => {
                let hits = dense
                    .into_iter()
                    .take(k)
                    .map(|(doc, distance)| FusedHit {
                        score: 1.0 - distance,
                        text: doc.text,
                        meta: doc.metadata,
                    })
                    .collect();
                Ok((hits, ScoreMode::Distance))
            }
            (dense, Some(sparse)) => {
                let dense = dense.unwrap_or_default();
                let fused = self.rrf_fusion(
                    dense
                        .into_iter()
                        .map(|(doc, _)| (doc.text, doc.metadata))
                        .collect(),
                    sparse
                        .into_iter()
                        .map(|hit| (hit.text, hit.meta))
                        .collect(),
                    k,
                );
                Ok((fused, ScoreMode::HybridRrf))
            }
        }
    }

    /// Reciprocal Rank Fusion over two ranked candidate lists.
    ///
    /// `rrf = alpha/(k_rrf + rank_dense) + (1-alpha)/(k_rrf + rank_sparse)`
    /// with a missing side treated as rank 1000. Ties break by dense rank,
    /// then sparse rank, then the document key.
    fn rrf_fusion(
        &self,
        dense: Vec<(String, DocMetadata)>,
        sparse: Vec<(String, DocMetadata)>,
        k: usize,
    ) -> Vec<FusedHit> {
        let mut entries: HashMap<DocKey, RankEntry> = HashMap::new();

        for (rank, (text, meta)) in dense.into_iter().enumerate() {
            let key = DocKey::for_doc(&text, &meta);
            entries
                .entry(key)
                .or_insert_with(|| RankEntry {
                    text,
                    meta,
                    dense_rank: None,
                    sparse_rank: None,
                })
                .dense_rank
                .get_or_insert(rank + 1);
        }

        for (rank, (text, meta)) in sparse.into_iter().enumerate() {
            let key = DocKey::for_doc(&text, &meta);
            entries
                .entry(key)
                .or_insert_with(|| RankEntry {
                    text,
                    meta,
                    dense_rank: None,
                    sparse_rank: None,
                })
                .sparse_rank
                .get_or_insert(rank + 1);
        }

        let alpha = self.config.alpha;
        let k_rrf = self.config.k_rrf as f32;

        let mut fused: Vec<(DocKey, RankEntry, f32)> = entries
            .into_iter()
            .map(|(key, entry)| {
                let dense_rank = entry.dense_rank.unwrap_or(hybrid::MISSING_RANK) as f32;
                let sparse_rank = entry.sparse_rank.unwrap_or(hybrid::MISSING_RANK) as f32;
                let score =
                    alpha / (k_rrf + dense_rank) + (1.0 - alpha) / (k_rrf + sparse_rank);
                (key, entry, score)
            })
            .collect();

        fused.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ar = a.1.dense_rank.unwrap_or(hybrid::MISSING_RANK);
                    let br = b.1.dense_rank.unwrap_or(hybrid::MISSING_RANK);
                    ar.cmp(&br)
                })
                .then_with(|| {
                    let ar = a.1.sparse_rank.unwrap_or(hybrid::MISSING_RANK);
                    let br = b.1.sparse_rank.unwrap_or(hybrid::MISSING_RANK);
                    ar.cmp(&br)
                })
                .then_with(|| a.0.cmp(&b.0))
        });

        fused
            .into_iter()
            .take(k)
            .map(|(_, entry, score)| FusedHit {
                text: entry.text,
                meta: entry.meta,
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HashEmbedder, InMemoryVectorStore};
    use crate::tokenizer::Tokenizer;
    use recipe_chat_core::Document;

    fn meta(title: &str, url: &str) -> DocMetadata {
        DocMetadata::new().with("title", title).with("url", url)
    }

    fn retriever_with(alpha: f32) -> HybridRetriever {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(HashEmbedder::new(64))));
        let dir = std::env::temp_dir().join(format!("rrf-test-{}", uuid_like()));
        let sparse = Arc::new(SparseIndexHandle::new(
            dir.join("bm25_index.bin"),
            Tokenizer::default(),
        ));
        HybridRetriever::new(
            store,
            sparse,
            HybridConfig {
                alpha,
                k_rrf: 60,
                fetch_k: Some(10),
            },
        )
    }

    fn uuid_like() -> u128 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    fn list(items: &[(&str, &str)]) -> Vec<(String, DocMetadata)> {
        items
            .iter()
            .map(|(text, title)| {
                (
                    text.to_string(),
                    meta(title, &format!("https://example.com/{}", title)),
                )
            })
            .collect()
    }

    #[test]
    fn test_rrf_prefers_documents_on_both_sides() {
        let retriever = retriever_with(0.5);
        let dense = list(&[("doc a", "a"), ("doc b", "b")]);
        let sparse = list(&[("doc b", "b"), ("doc c", "c")]);

        let fused = retriever.rrf_fusion(dense, sparse, 10);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].meta.get("title"), Some("b"));
    }

    #[test]
    fn test_rrf_symmetry_under_swapped_alpha() {
        // Fusing (dense, sparse) with alpha and (sparse, dense) with
        // 1 - alpha must produce the same ordering.
        let a = retriever_with(0.7);
        let b = retriever_with(0.3);

        let left = list(&[("doc a", "a"), ("doc b", "b"), ("doc c", "c")]);
        let right = list(&[("doc c", "c"), ("doc d", "d")]);

        let fused_ab = a.rrf_fusion(left.clone(), right.clone(), 10);
        let fused_ba = b.rrf_fusion(right, left, 10);

        let order_ab: Vec<_> = fused_ab
            .iter()
            .map(|h| h.meta.get("title").unwrap().to_string())
            .collect();
        let order_ba: Vec<_> = fused_ba
            .iter()
            .map(|h| h.meta.get("title").unwrap().to_string())
            .collect();
        assert_eq!(order_ab, order_ba);
    }

    #[test]
    fn test_rrf_missing_side_uses_sentinel_rank() {
        let retriever = retriever_with(0.5);
        let dense = list(&[("only dense", "a")]);
        let fused = retriever.rrf_fusion(dense, Vec::new(), 10);

        let expected = 0.5 / (60.0 + 1.0) + 0.5 / (60.0 + 1000.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_end_to_end_hybrid_search() {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(HashEmbedder::new(64))));
        store
            .add(Document::new(
                "김치찌개 레시피: 김치와 돼지고기를 볶는다",
                meta("김치찌개", "https://example.com/kimchi"),
            ))
            .await
            .unwrap();
        store
            .add(Document::new(
                "브라우니 굽는 법: 초콜릿을 녹인다",
                meta("브라우니", "https://example.com/brownie"),
            ))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let sparse = Arc::new(SparseIndexHandle::new(
            dir.path().join("bm25_index.bin"),
            Tokenizer::default(),
        ));
        let retriever = HybridRetriever::new(store, sparse, HybridConfig::default());

        let (hits, mode) = retriever.search("김치찌개 레시피", 2).await.unwrap();
        assert_eq!(mode, ScoreMode::HybridRrf);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].meta.get("title"), Some("김치찌개"));
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let retriever = retriever_with(0.5);
        let (hits, _) = retriever.search("   ", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
