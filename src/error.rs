use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

#[derive(Debug, ThisError)]
pub enum LabGuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Malformed JSON payload: {0}")]
    InvalidJson(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Unsupported compliance framework: {0}")]
    UnsupportedFramework(String),
}

impl LabGuardError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LabGuardError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl IntoResponse for LabGuardError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            LabGuardError::DatabaseError(_)
            | LabGuardError::RactorError(_)
            | LabGuardError::Io(_)
            | LabGuardError::Serde(_)
            | LabGuardError::Internal(_)
            | LabGuardError::Config(_)
            | LabGuardError::Figment(_) => {
                error!("internal error: {}", self);
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = ApiErrorBody {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                };
                (status, body)
            }
            LabGuardError::NotFound { .. } => {
                let body = ApiErrorBody {
                    code: "NOT_FOUND".to_string(),
                    message: self.to_string(),
                };
                (StatusCode::NOT_FOUND, body)
            }
            LabGuardError::InvalidTransition { .. } => {
                let body = ApiErrorBody {
                    code: "INVALID_TRANSITION".to_string(),
                    message: self.to_string(),
                };
                (StatusCode::CONFLICT, body)
            }
            LabGuardError::InvalidMeasurement(msg) => {
                let body = ApiErrorBody {
                    code: "INVALID_MEASUREMENT".to_string(),
                    message: msg,
                };
                (StatusCode::UNPROCESSABLE_ENTITY, body)
            }
            LabGuardError::InvalidInput(msg) => {
                let body = ApiErrorBody {
                    code: "INVALID_INPUT".to_string(),
                    message: msg,
                };
                (StatusCode::UNPROCESSABLE_ENTITY, body)
            }
            LabGuardError::InvalidJson(msg) => {
                let body = ApiErrorBody {
                    code: "INVALID_JSON".to_string(),
                    message: msg,
                };
                (StatusCode::BAD_REQUEST, body)
            }
            LabGuardError::InvalidRequest(msg) => {
                let body = ApiErrorBody {
                    code: "INVALID_REQUEST".to_string(),
                    message: msg,
                };
                (StatusCode::BAD_REQUEST, body)
            }
            LabGuardError::PayloadTooLarge(msg) => {
                let body = ApiErrorBody {
                    code: "PAYLOAD_TOO_LARGE".to_string(),
                    message: msg,
                };
                (StatusCode::PAYLOAD_TOO_LARGE, body)
            }
            LabGuardError::Crypto(_) => {
                // Never echo crypto internals back to the caller.
                let body = ApiErrorBody {
                    code: "CRYPTO_ERROR".to_string(),
                    message: "Unable to process encrypted payload.".to_string(),
                };
                (StatusCode::BAD_REQUEST, body)
            }
            LabGuardError::UnsupportedFramework(name) => {
                let body = ApiErrorBody {
                    code: "UNSUPPORTED_FRAMEWORK".to_string(),
                    message: format!("framework `{name}` is not supported"),
                };
                (StatusCode::BAD_REQUEST, body)
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
