//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or collaborator failure.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match (&err, err.kind()) {
        (SagaError::RoundNotFound { .. }, _) => StatusCode::NOT_FOUND,
        (SagaError::RoundFinished(_), _) => StatusCode::CONFLICT,
        (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        (_, ErrorKind::BusinessRule) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorKind::Transient) => StatusCode::SERVICE_UNAVAILABLE,
        (_, ErrorKind::Collaborator) => StatusCode::BAD_GATEWAY,
        (_, ErrorKind::Orchestration) => {
            tracing::error!(error = %err, "orchestration fault");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SessionId;
    use domain::Money;

    fn status(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_saga_errors_map_by_kind() {
        assert_eq!(
            status(SagaError::RoundNotFound {
                session_id: SessionId::new(),
                ext_round_id: "r".into(),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(SagaError::RoundFinished("r".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(SagaError::InsufficientBalance {
                amount: Money::from_minor(10),
                available: Money::zero(),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(SagaError::Timeout("wallet".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(SagaError::Wallet("rejected".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
