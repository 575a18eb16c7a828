//! Local corpus loading
//!
//! Reads the embedding builder's JSONL export (`{"text": ..., "metadata":
//! {...}}` per line) into the in-memory vector store. The vector database
//! directory itself is an input the core never writes; this loader exists
//! for local corpora and development setups.

use std::path::Path;
use std::sync::Arc;

use recipe_chat_core::{DocMetadata, Document};
use recipe_chat_rag::InMemoryVectorStore;
use serde::Deserialize;

use crate::ServerError;

#[derive(Deserialize)]
struct CorpusLine {
    text: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, serde_json::Value>,
}

/// Load every JSONL line into the store. Malformed lines are skipped with
/// a warning rather than failing startup.
pub async fn load_jsonl(
    store: &Arc<InMemoryVectorStore>,
    path: &Path,
) -> Result<usize, ServerError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Corpus(format!("read {}: {}", path.display(), e)))?;

    let mut docs = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CorpusLine>(line) {
            Ok(parsed) => {
                let mut meta = DocMetadata::new();
                for (key, value) in parsed.metadata {
                    match value {
                        serde_json::Value::String(s) => meta.insert(key, s),
                        other => meta.insert(key, other.to_string()),
                    }
                }
                docs.push(Document::new(parsed.text, meta));
            }
            Err(e) => {
                tracing::warn!(lineno = lineno + 1, error = %e, "skipping malformed corpus line");
            }
        }
    }

    let count = docs.len();
    store
        .add_all(docs)
        .await
        .map_err(|e| ServerError::Corpus(format!("index corpus: {}", e)))?;
    tracing::info!(count, path = %path.display(), "corpus loaded");
    Ok(count)
}
