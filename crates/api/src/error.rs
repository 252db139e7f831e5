//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Orchestrator error.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_error_status(err),
        }
    }
}

fn saga_error_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::SagaNotFound(_) | SagaError::SagaNotRegistered(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidDefinition { .. } => StatusCode::BAD_REQUEST,
        SagaError::CompensationDisabled(_) => StatusCode::CONFLICT,
        SagaError::NotStarted => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::InvalidStepTransition { .. }
        | SagaError::Aborted(_)
        | SagaError::Handler(_)
        | SagaError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaId;

    #[test]
    fn test_saga_error_status_mapping() {
        let cases = [
            (SagaError::SagaNotFound(SagaId::new()), StatusCode::NOT_FOUND),
            (
                SagaError::SagaNotRegistered("Missing".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                SagaError::InvalidDefinition {
                    saga_type: "Bad".to_string(),
                    reason: "no steps".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                SagaError::CompensationDisabled("Order".to_string()),
                StatusCode::CONFLICT,
            ),
            (SagaError::NotStarted, StatusCode::SERVICE_UNAVAILABLE),
            (
                SagaError::Handler("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(
            ApiError::BadRequest("nope".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("gone".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
