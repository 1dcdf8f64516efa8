//! Dependency health checks.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::AppState;

/// Body of `/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    /// `"ok"` when every check passed, otherwise `"degraded"`.
    pub status: String,
    /// Chroma heartbeat result, `"ok"` or `"error"`.
    pub chromadb: String,
    /// Ollama tag listing result, `"ok"` or `"error"`.
    pub ollama: String,
}

impl HealthReport {
    fn from_checks(chroma_ok: bool, ollama_ok: bool) -> Self {
        let label = |ok: bool| String::from(if ok { "ok" } else { "error" });
        Self {
            status: String::from(if chroma_ok && ollama_ok { "ok" } else { "degraded" }),
            chromadb: label(chroma_ok),
            ollama: label(ollama_ok),
        }
    }
}

/// Checks Chroma and Ollama concurrently. Never fails; failures show up in the report.
pub async fn check_health(state: &AppState) -> HealthReport {
    let (chroma, ollama) = tokio::join!(state.store.heartbeat(), state.ollama.ping());
    if let Err(err) = &chroma {
        let error = format!("{err:#}");
        warn!(%error, "chroma heartbeat failed");
    }
    if let Err(err) = &ollama {
        let error = format!("{err:#}");
        warn!(%error, "ollama ping failed");
    }
    HealthReport::from_checks(chroma.is_ok(), ollama.is_ok())
}
