//! Startup gate: requests are refused until the required models are confirmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::ollama::OllamaClient;

/// Detail returned while the gate is closed.
pub const STARTING_MESSAGE: &str = "Service is starting: waiting for models";

/// Two-state readiness flag: not ready, then ready forever.
#[derive(Clone, Debug, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether requests may be served.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Opens the gate.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// Middleware that answers 503 until the gate opens.
pub async fn require_ready(
    State(readiness): State<Readiness>,
    request: Request,
    next: Next,
) -> Response {
    if readiness.is_ready() {
        return next.run(request).await;
    }
    ApiError::service_unavailable(STARTING_MESSAGE).into_response()
}

/// Confirms every model in order, then opens the gate.
pub fn spawn_model_gate(
    ollama: OllamaClient,
    models: Vec<String>,
    readiness: Readiness,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            server = ollama.base_url(),
            models = ?models,
            "pulling required models before accepting requests"
        );
        for model in &models {
            ensure_model(&ollama, model).await;
        }
        readiness.mark_ready();
        info!("all models ready; accepting requests");
    })
}

/// Pulls `model` until the server lists it. Never gives up.
pub async fn ensure_model(ollama: &OllamaClient, model: &str) {
    let mut attempt = 0usize;
    loop {
        match confirm_model(ollama, model).await {
            Ok(()) => {
                info!(model, "model ready");
                return;
            }
            Err(err) => {
                attempt += 1;
                let delay = retry_backoff(attempt);
                warn!(
                    model,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{err:#}"),
                    "model not confirmed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn confirm_model(ollama: &OllamaClient, model: &str) -> Result<()> {
    info!(model, "pulling model");
    ollama.pull(model).await?;
    anyhow::ensure!(
        ollama.has_model(model).await?,
        "{model} missing from the tag listing after pull"
    );
    Ok(())
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(5), Duration::from_millis(16_000));
        assert_eq!(retry_backoff(50), Duration::from_millis(16_000));
    }

    #[test]
    fn gate_opens_once() {
        let readiness = Readiness::new();
        let shared = readiness.clone();
        assert!(!shared.is_ready());
        readiness.mark_ready();
        assert!(shared.is_ready());
    }

    #[tokio::test]
    async fn gate_opens_after_all_models_confirmed() {
        let server = MockServer::start_async().await;
        let pulls = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/pull");
                then.status(200).json_body(json!({ "status": "success" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(200).json_body(json!({
                    "models": [
                        { "name": "llama3.2:latest" },
                        { "name": "mistral:latest" },
                        { "name": "nomic-embed-text:latest" }
                    ]
                }));
            })
            .await;

        let ollama = OllamaClient::new(&server.base_url(), Duration::from_secs(5)).unwrap();
        let readiness = Readiness::new();
        let models = vec![
            "llama3.2".to_string(),
            "mistral".to_string(),
            "nomic-embed-text".to_string(),
        ];
        spawn_model_gate(ollama, models, readiness.clone())
            .await
            .expect("gate task joined");

        assert!(readiness.is_ready());
        pulls.assert_hits_async(3).await;
    }
}
