//! HTTP surface: `/ingest`, `/query` and `/health` behind the readiness gate.

use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tracing::debug;

use crate::error::ApiError;
use crate::health::{check_health, HealthReport};
use crate::ingest::{ingest_document, IngestError, IngestReport};
use crate::loader::DocumentKind;
use crate::query::{handle_query, QueryRequest, QueryResponse};
use crate::readiness::require_ready;
use crate::state::AppState;

/// Multipart field carrying the uploaded document.
pub const FILE_FIELD: &str = "file";

/// Builds the service router. Uploads larger than `max_upload_bytes` are refused.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.readiness.clone(),
            require_ready,
        ))
        .with_state(state)
}

async fn ingest_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestReport>, ApiError> {
    let mut multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        // Reject by extension before the body is read.
        let kind = DocumentKind::from_filename(&filename).map_err(IngestError::from)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(err.status(), err.body_text()))?;
        debug!(filename = %filename, bytes = bytes.len(), "received upload");
        let report = ingest_document(&state, &filename, kind, bytes.to_vec()).await?;
        return Ok(Json(report));
    }
    Err(ApiError::unprocessable(format!(
        "multipart field '{FILE_FIELD}' is required"
    )))
}

async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
    let response = handle_query(&state, request).await?;
    Ok(Json(response))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(check_health(&state).await)
}
