//! Chunk records produced by ingestion and written to the vector store.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::splitter::TextWindow;

/// Embedded window of a source document, ready for the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    /// Store identifier, `"{source}_{chunk_index}"`.
    pub id: String,
    /// Uploaded filename the chunk came from.
    pub source: String,
    /// Position of the chunk inside its document.
    pub chunk_index: usize,
    /// Chunk body text submitted to the embedding model.
    pub text: String,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    /// Pairs a text window with its embedding.
    pub fn from_window(source: &str, window: TextWindow, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk_id(source, window.index),
            source: source.to_string(),
            chunk_index: window.index,
            text: window.text,
            embedding,
        }
    }

    /// Metadata stored next to the vector.
    pub fn metadata(&self) -> Value {
        json!({
            "source": self.source,
            "chunk_index": self.chunk_index,
        })
    }
}

/// Deterministic chunk identifier; re-ingesting a file reuses the same ids.
pub fn chunk_id(source: &str, index: usize) -> String {
    format!("{source}_{index}")
}
