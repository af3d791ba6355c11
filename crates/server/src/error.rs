use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use quotar_core::errors::DomainError;
use quotar_db::repositories::RepositoryError;

/// Wire shape of every error response: a stable machine-readable kind and
/// a human-readable message, nothing internal.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub error: String,
}

#[derive(Clone, Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { kind, error: message.into() } }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "Access denied. Insufficient permissions.")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    /// Document generation failed after the record was committed. Reported
    /// with its own kind so the caller knows the save stands and only the
    /// render needs retrying.
    pub fn render_failure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "render_failure", message)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(repository_error: RepositoryError) -> Self {
        let kind = repository_error.kind();
        match &repository_error {
            RepositoryError::Domain(domain) => {
                let status = match domain {
                    DomainError::Validation { .. } => StatusCode::BAD_REQUEST,
                    DomainError::InvalidTransition { .. } => StatusCode::CONFLICT,
                };
                Self::new(status, kind, domain.to_string())
            }
            RepositoryError::NotFound { entity } => {
                Self::new(StatusCode::NOT_FOUND, kind, format!("{entity} not found"))
            }
            RepositoryError::ReferenceConflict { .. } => Self::new(
                StatusCode::CONFLICT,
                kind,
                "could not assign a unique reference number; please retry",
            ),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                error!(
                    event_name = "api.storage.error",
                    error = %repository_error,
                    "storage operation failed"
                );
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    kind,
                    "storage is temporarily unavailable; please retry",
                )
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(domain_error: DomainError) -> Self {
        RepositoryError::from(domain_error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
