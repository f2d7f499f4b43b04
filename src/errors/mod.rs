//! Error handling module for the CodeLink backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const VERSION_MISMATCH: &str = "VERSION_MISMATCH";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const DECODE_ERROR: &str = "DECODE_ERROR";
    pub const LISTENER_ERROR: &str = "LISTENER_ERROR";
    pub const COMMENT_NOT_POSTED: &str = "COMMENT_NOT_POSTED";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Step of comment creation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStage {
    /// Writing the comment record itself
    Persist,
    /// Bumping the publication's comment counter
    CountIncrement,
}

impl CommentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentStage::Persist => "persist",
            CommentStage::CountIncrement => "count_increment",
        }
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Optimistic concurrency conflict, or a transaction that ran out of retries
    Conflict {
        message: String,
        current_version: i64,
    },
    /// Database error
    Database(String),
    /// A stored record does not match its expected shape
    Decode(String),
    /// A realtime subscription could not read its collection
    Listener(String),
    /// A critical step of comment creation failed; the draft is handed back for resubmission
    CommentNotPosted {
        stage: CommentStage,
        message: String,
        draft_text: String,
    },
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Listener(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CommentNotPosted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Conflict { .. } => codes::VERSION_MISMATCH,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Decode(_) => codes::DECODE_ERROR,
            AppError::Listener(_) => codes::LISTENER_ERROR,
            AppError::CommentNotPosted { .. } => codes::COMMENT_NOT_POSTED,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict { message, .. } => message.clone(),
            AppError::Database(msg) => msg.clone(),
            AppError::Decode(msg) => msg.clone(),
            AppError::Listener(msg) => msg.clone(),
            AppError::CommentNotPosted { stage, message, .. } => {
                format!("Comment not posted ({}): {}", stage.as_str(), message)
            }
            AppError::Internal(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Structured details for the response envelope, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Conflict {
                current_version, ..
            } => Some(serde_json::json!({ "currentVersion": current_version })),
            AppError::CommentNotPosted {
                stage, draft_text, ..
            } => Some(serde_json::json!({
                "stage": stage.as_str(),
                "draftText": draft_text,
            })),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub revision_id: i64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, revision_id: i64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: error.details(),
            },
            revision_id,
        }
    }
}

/// Wrapper type for errors that carry revision_id context.
#[derive(Debug)]
pub struct AppErrorWithRevision {
    pub error: AppError,
    pub revision_id: i64,
}

impl IntoResponse for AppErrorWithRevision {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.revision_id);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_not_posted_carries_draft() {
        let err = AppError::CommentNotPosted {
            stage: CommentStage::CountIncrement,
            message: "transaction gave up".to_string(),
            draft_text: "hola".to_string(),
        };

        let body = ErrorResponse::new(&err, 7);
        assert_eq!(body.error.code, "COMMENT_NOT_POSTED");
        assert_eq!(body.revision_id, 7);
        let details = body.error.details.unwrap();
        assert_eq!(details["draftText"], "hola");
        assert_eq!(details["stage"], "count_increment");
    }

    #[test]
    fn test_conflict_details() {
        let err = AppError::Conflict {
            message: "Version mismatch".to_string(),
            current_version: 3,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.details().unwrap()["currentVersion"], 3);
    }
}
