//! Sparse BM25 (Okapi) index with a persistable snapshot
//!
//! Built once from the vector store's underlying collection and queried
//! many times. The snapshot `(tokenized corpus, doc texts, doc metas,
//! parameters)` is serialized to a single file under the base directory;
//! a present and consistent snapshot is loaded instead of rebuilding.
//! Construction is single-flight: the first caller builds while later
//! callers wait, after which reads are lock-free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use recipe_chat_config::constants::bm25;
use recipe_chat_core::{DocMetadata, VectorStore};

use crate::tokenizer::Tokenizer;
use crate::RagError;

/// Serialized form of the index: the tokenized corpus plus the raw texts
/// and metadata it was built from.
///
/// Invariant: `tokenized.len() == texts.len() == metas.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Snapshot {
    pub tokenized: Vec<Vec<String>>,
    pub texts: Vec<String>,
    pub metas: Vec<DocMetadata>,
    pub k1: f32,
    pub b: f32,
}

impl Bm25Snapshot {
    pub fn is_consistent(&self) -> bool {
        self.tokenized.len() == self.texts.len() && self.texts.len() == self.metas.len()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// A single sparse search hit.
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub text: String,
    pub meta: DocMetadata,
    /// Non-negative BM25 score; higher is better.
    pub score: f32,
}

/// In-memory BM25 index derived from a snapshot.
pub struct Bm25Index {
    snapshot: Bm25Snapshot,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_freqs: HashMap<String, u32>,
    doc_lens: Vec<f32>,
    avg_len: f32,
}

impl Bm25Index {
    /// Derive query-time statistics from a snapshot.
    pub fn from_snapshot(snapshot: Bm25Snapshot) -> Result<Self, RagError> {
        if !snapshot.is_consistent() {
            return Err(RagError::Snapshot(format!(
                "inconsistent snapshot: {} tokenized / {} texts / {} metas",
                snapshot.tokenized.len(),
                snapshot.texts.len(),
                snapshot.metas.len()
            )));
        }

        let mut term_freqs = Vec::with_capacity(snapshot.tokenized.len());
        let mut doc_freqs: HashMap<String, u32> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(snapshot.tokenized.len());

        for tokens in &snapshot.tokenized {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len() as f32);
            term_freqs.push(freqs);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<f32>() / doc_lens.len() as f32
        };

        Ok(Self {
            snapshot,
            term_freqs,
            doc_freqs,
            doc_lens,
            avg_len,
        })
    }

    /// Build from `(text, metadata)` pairs using the given tokenizer.
    pub fn build(
        entries: Vec<(String, DocMetadata)>,
        tokenizer: &Tokenizer,
    ) -> Result<Self, RagError> {
        let mut tokenized = Vec::with_capacity(entries.len());
        let mut texts = Vec::with_capacity(entries.len());
        let mut metas = Vec::with_capacity(entries.len());
        for (text, meta) in entries {
            tokenized.push(tokenizer.tokenize(&text));
            texts.push(text);
            metas.push(meta);
        }
        Self::from_snapshot(Bm25Snapshot {
            tokenized,
            texts,
            metas,
            k1: bm25::K1,
            b: bm25::B,
        })
    }

    pub fn snapshot(&self) -> &Bm25Snapshot {
        &self.snapshot
    }

    pub fn doc_count(&self) -> usize {
        self.snapshot.len()
    }

    /// Okapi BM25 score of one document for a tokenized query.
    fn score_doc(&self, doc_idx: usize, query_tokens: &[String]) -> f32 {
        let n = self.doc_count() as f32;
        let freqs = &self.term_freqs[doc_idx];
        let len_norm = 1.0 - self.snapshot.b
            + self.snapshot.b * self.doc_lens[doc_idx] / self.avg_len.max(1e-6);

        let mut score = 0.0f32;
        for term in query_tokens {
            let tf = freqs.get(term).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            score += idf * tf * (self.snapshot.k1 + 1.0) / (tf + self.snapshot.k1 * len_norm);
        }
        score
    }

    /// Top-k documents by BM25 score. Empty corpus or an empty tokenized
    /// query returns an empty result without error.
    pub fn search(&self, query: &str, k: usize, tokenizer: &Tokenizer) -> Vec<SparseHit> {
        if self.snapshot.is_empty() || k == 0 {
            return Vec::new();
        }
        let query_tokens = tokenizer.tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = (0..self.doc_count())
            .map(|i| (i, self.score_doc(i, &query_tokens)))
            .collect();
        // Stable sort keeps corpus order for equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| SparseHit {
                text: self.snapshot.texts[i].clone(),
                meta: self.snapshot.metas[i].clone(),
                score: score.max(0.0),
            })
            .collect()
    }

    /// Serialize the snapshot to `path`, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<(), RagError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::Snapshot(format!("create {}: {}", parent.display(), e)))?;
        }
        let bytes = bincode::serialize(&self.snapshot)
            .map_err(|e| RagError::Snapshot(format!("serialize: {}", e)))?;
        std::fs::write(path, bytes)
            .map_err(|e| RagError::Snapshot(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Load a snapshot from disk; fails on a missing, unreadable or
    /// inconsistent file.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        let bytes = std::fs::read(path)
            .map_err(|e| RagError::Snapshot(format!("read {}: {}", path.display(), e)))?;
        let snapshot: Bm25Snapshot = bincode::deserialize(&bytes)
            .map_err(|e| RagError::Snapshot(format!("deserialize: {}", e)))?;
        Self::from_snapshot(snapshot)
    }
}

/// Lazily constructed process-wide BM25 index.
///
/// The first caller builds (or loads) the index while concurrent callers
/// wait on the same initialization; afterwards every call is a lock-free
/// read. A failed build caches the "not available" outcome so the hot
/// path does not retry on every request.
pub struct SparseIndexHandle {
    cell: OnceCell<Option<Arc<Bm25Index>>>,
    tokenizer: Tokenizer,
    snapshot_path: PathBuf,
}

impl SparseIndexHandle {
    pub fn new(snapshot_path: PathBuf, tokenizer: Tokenizer) -> Self {
        Self {
            cell: OnceCell::new(),
            tokenizer,
            snapshot_path,
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Get the index, building it from the store on first use.
    pub async fn get_or_build(&self, store: &dyn VectorStore) -> Option<Arc<Bm25Index>> {
        self.cell
            .get_or_init(|| async {
                match self.init(store).await {
                    Ok(index) => Some(Arc::new(index)),
                    Err(e) => {
                        tracing::warn!(error = %e, "BM25 index unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn init(&self, store: &dyn VectorStore) -> Result<Bm25Index, RagError> {
        if self.snapshot_path.exists() {
            match Bm25Index::load(&self.snapshot_path) {
                Ok(index) => {
                    tracing::info!(
                        docs = index.doc_count(),
                        path = %self.snapshot_path.display(),
                        "BM25 snapshot loaded"
                    );
                    return Ok(index);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stale BM25 snapshot, rebuilding");
                }
            }
        }

        let entries = store
            .all_entries()
            .await
            .map_err(|e| RagError::Index(format!("corpus enumeration failed: {}", e)))?;

        let index = Bm25Index::build(entries, &self.tokenizer)?;
        tracing::info!(docs = index.doc_count(), "BM25 index built");

        // Fire-and-forget persistence: a failed write never fails the request.
        if let Err(e) = index.persist(&self.snapshot_path) {
            tracing::warn!(error = %e, "failed to persist BM25 snapshot");
        }

        Ok(index)
    }
}
