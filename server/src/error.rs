use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Content is required and must be a non-empty string")]
    EmptyContent,
    #[error("ttl_seconds must be an integer >= 1")]
    TtlSeconds,
    #[error("max_views must be an integer between 1 and {}", u32::MAX)]
    MaxViews,
    #[error("Invalid request body: {0}")]
    Body(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Covers both absent and expired pastes.
    #[error("Paste not found or expired")]
    NotFound,
    #[error("Failed to generate a unique paste id after {0} attempts")]
    GenerationExhausted(usize),
    #[error("Storage is unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            // Only insert can collide, and the service retries those itself
            StoreError::DuplicateId => Self::StoreUnavailable(e.to_string()),
        }
    }
}

impl Error {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::GenerationExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the failure is ours rather than the client's.
    pub const fn is_server_fault(&self) -> bool {
        matches!(self, Self::GenerationExhausted(_) | Self::StoreUnavailable(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.is_server_fault() {
            error!("Request failed: {}", self);
        } else {
            debug!("Rejected request: {}", self);
        }

        let message = match &self {
            // Internal details stay in the logs
            Self::StoreUnavailable(_) => "Storage is temporarily unavailable".to_string(),
            e => e.to_string(),
        };

        (
            self.status(),
            Json(json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_uniform_outcomes() {
        assert_eq!(Error::from(StoreError::NotFound), Error::NotFound);
        assert!(matches!(
            Error::from(StoreError::Unavailable("disk gone".to_string())),
            Error::StoreUnavailable(reason) if reason == "disk gone"
        ));
    }

    #[test]
    fn statuses() {
        assert_eq!(
            Error::from(ValidationError::EmptyContent).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::GenerationExhausted(5).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::StoreUnavailable(String::new()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn only_internal_failures_are_server_faults() {
        assert!(!Error::from(ValidationError::TtlSeconds).is_server_fault());
        assert!(!Error::NotFound.is_server_fault());
        assert!(Error::GenerationExhausted(5).is_server_fault());
        assert!(Error::StoreUnavailable("disk".to_string()).is_server_fault());
    }
}
