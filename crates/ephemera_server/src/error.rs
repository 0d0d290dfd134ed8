use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ephemera_core::EngineError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedBody(rejection.body_text())
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::Expired) => StatusCode::GONE,
            ApiError::Engine(EngineError::Conflict { .. }) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::CapacityExceeded { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Engine(EngineError::InvalidArgument(_)) | ApiError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(EngineError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Engine(EngineError::Internal(_)) => ErrorBody {
                error: "internal",
                message: "internal server error".to_string(),
            },
            ApiError::Engine(err) => ErrorBody {
                error: err.code(),
                message: err.to_string(),
            },
            ApiError::MalformedBody(_) => ErrorBody {
                error: "invalid_argument",
                message: self.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Engine(EngineError::Internal(detail)) = &self {
            error!("Internal error: {}", detail);
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::NotFound, StatusCode::NOT_FOUND),
            (EngineError::Expired, StatusCode::GONE),
            (
                EngineError::Conflict { current_version: 3 },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::CapacityExceeded { limit: 5 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::InvalidArgument("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Internal("disk".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let body = ApiError::from(EngineError::Internal("sqlite exploded".to_string())).body();
        assert_eq!(body.error, "internal");
        assert!(!body.message.contains("sqlite"));

        let body = ApiError::from(EngineError::Conflict { current_version: 4 }).body();
        assert_eq!(body.error, "conflict");
        assert!(body.message.contains('4'));
    }
}
