//! HTTP error responses with a `{"detail": ...}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;
use crate::loader::LoadError;
use crate::query::QueryError;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub detail: String,
}

/// Status code plus detail message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// Arbitrary status.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// 400.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    /// 404.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    /// 422.
    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    /// 503.
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail)
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response detail.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let detail = err.to_string();
        match err {
            IngestError::Load(LoadError::Unsupported { .. }) => Self::bad_request(detail),
            IngestError::Load(_) => Self::unprocessable(detail),
            IngestError::StoreUnavailable(_) | IngestError::EmbeddingUnavailable(_) => {
                Self::service_unavailable(detail)
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let detail = err.to_string();
        match err {
            QueryError::EmptyQuestion | QueryError::InvalidTopK => Self::unprocessable(detail),
            QueryError::NoDocuments => Self::not_found(detail),
            QueryError::Dependency(_) => Self::service_unavailable(detail),
        }
    }
}
