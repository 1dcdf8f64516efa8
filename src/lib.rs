#![warn(missing_docs)]
//! Core library for the ragscope retrieval-augmented Q&A service.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod health;
pub mod ingest;
pub mod judge;
pub mod loader;
pub mod ollama;
pub mod prompts;
pub mod query;
pub mod readiness;
pub mod record;
pub mod server;
pub mod splitter;
pub mod state;
pub mod tracking;
pub mod vector_store;

pub use config::{LogFormat, ModelNames, ServiceCli, ServiceSettings};
pub use embeddings::DocumentChunk;
pub use error::{ApiError, ErrorBody};
pub use health::HealthReport;
pub use ingest::{IngestError, IngestReport};
pub use judge::{Judge, JudgeDimension, JudgeOutcome, JudgeScores, SENTINEL_SCORE};
pub use loader::{DocumentKind, LoadError};
pub use ollama::{ModelHandle, OllamaClient};
pub use query::{QueryError, QueryRequest, QueryResponse, NO_DOCUMENTS_MESSAGE};
pub use readiness::{spawn_model_gate, Readiness};
pub use record::{QueryOutcome, QueryRecord};
pub use server::router;
pub use splitter::{split_text, ChunkingConfig, TextWindow};
pub use state::AppState;
pub use tracking::{MlflowTracker, RunStatus};
pub use vector_store::{ChromaStore, CollectionName, RetrievedChunk};
