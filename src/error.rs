use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::{RecordKind, StoreError};

/* -------------------------
   Engine errors
--------------------------*/

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("failed to {action}: {source}")]
    Persistence {
        action: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("an update for {0} is already in progress")]
    Busy(String),

    #[error("instance generation failed: {0}")]
    Generation(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap a store failure; a missing record stays a `NotFound`.
    pub fn persistence(action: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            source => EngineError::Persistence { action, source },
        }
    }
}

/* -------------------------
   HTTP errors
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match &e {
            EngineError::Validation(_) => ApiError::BadRequest("VALIDATION_ERROR", e.to_string()),
            EngineError::Generation(_) => ApiError::BadRequest("GENERATION_FAILED", e.to_string()),
            EngineError::NotFound { .. } => ApiError::NotFound("NOT_FOUND", e.to_string()),
            EngineError::Busy(_) => ApiError::Conflict("IN_FLIGHT", e.to_string()),
            EngineError::Persistence { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("PERSISTENCE_ERROR", &msg),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_keeps_action_and_cause() {
        let e = EngineError::persistence(
            "log planned visit",
            StoreError::Unavailable("write rejected".into()),
        );
        assert_eq!(
            e.to_string(),
            "failed to log planned visit: storage unavailable: write rejected"
        );
    }

    #[test]
    fn missing_record_is_not_a_persistence_failure() {
        let e = EngineError::persistence(
            "delete service",
            StoreError::NotFound {
                kind: RecordKind::Service,
                id: "s9".into(),
            },
        );
        assert!(matches!(e, EngineError::NotFound { .. }));
        assert_eq!(e.to_string(), "service s9 not found");
    }

    #[test]
    fn engine_errors_map_to_status_codes() {
        let resp = ApiError::from(EngineError::Busy("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = ApiError::from(EngineError::validation("bad")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(EngineError::not_found(RecordKind::Plan, "z")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
