//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.
//! Domain errors keep their message; the code tells clients what kind of
//! failure it was.

use crate::duels::DuelError;
use crate::games::GameError;
use crate::identity::IdentityError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, VALIDATION_FAILED, INSUFFICIENT_BALANCE, ...)
    pub code: String,
    /// Human-readable error message, safe to show to the acting user
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    BadRequest,
    Unauthorized,
    Forbidden,
    Conflict,
    Unprocessable,
    InternalError,
    ServiceUnavailable,
}

impl ApiErrorKind {
    fn status(&self) -> StatusCode {
        match self {
            ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
            ApiErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorKind::Conflict => StatusCode::CONFLICT,
            ApiErrorKind::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn default_code(&self) -> &'static str {
        match self {
            ApiErrorKind::NotFound => "NOT_FOUND",
            ApiErrorKind::BadRequest => "BAD_REQUEST",
            ApiErrorKind::Unauthorized => "UNAUTHORIZED",
            ApiErrorKind::Forbidden => "FORBIDDEN",
            ApiErrorKind::Conflict => "CONFLICT",
            ApiErrorKind::Unprocessable => "UNPROCESSABLE",
            ApiErrorKind::InternalError => "INTERNAL_ERROR",
            ApiErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, request_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            details: None,
            request_id: request_id.to_string(),
        }
    }

    pub fn not_found(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, request_id, message)
    }

    pub fn bad_request(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::BadRequest, request_id, message)
    }

    pub fn unauthorized(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthorized, request_id, message)
    }

    pub fn internal_error(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InternalError, request_id, message)
    }

    pub fn service_unavailable(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServiceUnavailable, request_id, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn from_game(request_id: &str, e: GameError) -> Self {
        let message = e.to_string();
        match e {
            GameError::UnsupportedGame(_) => {
                Self::bad_request(request_id, message).with_code("UNSUPPORTED_GAME")
            }
            GameError::InvalidParameters(_) => {
                Self::bad_request(request_id, message).with_code("INVALID_PARAMETERS")
            }
            GameError::MalformedResult(_) => {
                Self::bad_request(request_id, message).with_code("MALFORMED_RESULT")
            }
            GameError::MissingIdentity(_) => {
                Self::new(ApiErrorKind::Conflict, request_id, message).with_code("MISSING_IDENTITY")
            }
        }
    }

    /// Map a state machine error onto a response
    pub fn from_duel(request_id: &str, e: DuelError) -> Self {
        let message = e.to_string();
        match e {
            DuelError::Validation(_) => {
                Self::bad_request(request_id, message).with_code("VALIDATION_FAILED")
            }
            DuelError::InsufficientBalance {
                participant,
                available,
                required,
            } => Self::new(ApiErrorKind::Unprocessable, request_id, message)
                .with_code("INSUFFICIENT_BALANCE")
                .with_details(json!({
                    "participant_id": participant,
                    "available": available,
                    "required": required,
                })),
            DuelError::NotParticipant { .. } => {
                Self::new(ApiErrorKind::Forbidden, request_id, message).with_code("NOT_PARTICIPANT")
            }
            DuelError::InvalidTransition { status, .. } => {
                Self::new(ApiErrorKind::Conflict, request_id, message)
                    .with_code("INVALID_TRANSITION")
                    .with_details(json!({ "status": status }))
            }
            DuelError::NotFound(_) => Self::not_found(request_id, message),
            DuelError::MissingIdentity(_) => {
                Self::new(ApiErrorKind::Conflict, request_id, message).with_code("MISSING_IDENTITY")
            }
            DuelError::GameDisabled(_) => {
                Self::service_unavailable(request_id, message).with_code("GAME_DISABLED")
            }
            DuelError::ServerUnavailable(_) => {
                Self::service_unavailable(request_id, message).with_code("SERVER_UNAVAILABLE")
            }
            DuelError::Game(e) => Self::from_game(request_id, e),
            DuelError::Ledger(_) | DuelError::Storage(_) => {
                error!(%request_id, error = %message, "Duel operation failed");
                Self::service_unavailable(request_id, "Your request is pending, please retry shortly")
            }
        }
    }

    pub fn from_identity(request_id: &str, e: IdentityError) -> Self {
        let message = e.to_string();
        match e {
            IdentityError::UsernameTaken { .. } => {
                Self::new(ApiErrorKind::Conflict, request_id, message).with_code("USERNAME_TAKEN")
            }
            IdentityError::InvalidUsername(_) | IdentityError::InvalidAddress(_) => {
                Self::bad_request(request_id, message).with_code("VALIDATION_FAILED")
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        });

        (self.kind.status(), body).into_response()
    }
}
