//! Document ingestion: extract, window, embed, store.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::embeddings::DocumentChunk;
use crate::loader::{DocumentKind, LoadError};
use crate::splitter::split_text;
use crate::state::AppState;

/// Body of a successful `/ingest` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    /// Always `"ok"`.
    pub status: String,
    /// Number of chunks written to the store.
    pub chunks_stored: usize,
    /// Uploaded filename, also the `source` metadata of every chunk.
    pub filename: String,
}

impl IngestReport {
    fn ok(filename: &str, chunks_stored: usize) -> Self {
        Self {
            status: "ok".to_string(),
            chunks_stored,
            filename: filename.to_string(),
        }
    }
}

/// Reasons an ingestion fails.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The upload could not be decoded as its declared type.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Chroma could not be reached or rejected the write.
    #[error("ChromaDB unreachable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    /// The embedding model call failed.
    #[error("Error: {0:#}")]
    EmbeddingUnavailable(anyhow::Error),
}

/// Runs one upload through the pipeline and reports how many chunks were stored.
///
/// Text with no non-whitespace content yields zero chunks and no external call.
pub async fn ingest_document(
    state: &AppState,
    filename: &str,
    kind: DocumentKind,
    bytes: Vec<u8>,
) -> Result<IngestReport, IngestError> {
    let text = kind.extract_text(bytes).await?;
    let windows = split_text(&text, &state.chunking);
    if windows.is_empty() {
        info!(filename, "document has no text; nothing stored");
        return Ok(IngestReport::ok(filename, 0));
    }

    state
        .store
        .ensure_collection()
        .await
        .map_err(IngestError::StoreUnavailable)?;

    let mut chunks = Vec::with_capacity(windows.len());
    for batch in windows.chunks(state.embed_batch_size) {
        let inputs: Vec<&str> = batch.iter().map(|w| w.text.as_str()).collect();
        let vectors = state
            .embedder
            .embed(&inputs)
            .await
            .map_err(IngestError::EmbeddingUnavailable)?;
        debug!(filename, batch = inputs.len(), "embedded batch");
        chunks.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(window, vector)| DocumentChunk::from_window(filename, window, vector)),
        );
    }

    state
        .store
        .add(&chunks)
        .await
        .map_err(IngestError::StoreUnavailable)?;

    info!(
        filename,
        chunks = chunks.len(),
        collection = %state.store.collection(),
        "ingested document"
    );
    Ok(IngestReport::ok(filename, chunks.len()))
}
