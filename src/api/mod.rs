//! REST API module.
//!
//! Handlers are thin: they call into [`crate::services`] and wrap the result
//! in the response envelope, stamped with the store revision.

mod comments;
mod messages;
mod notifications;
mod publications;
mod revision;
mod stream;
mod users;

pub use comments::*;
pub use messages::*;
pub use notifications::*;
pub use publications::*;
pub use revision::*;
pub use stream::*;
pub use users::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Envelope a service result with the revision current after the call.
async fn respond<T: Serialize>(state: &AppState, result: Result<T, AppError>) -> ApiResult<T> {
    let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);
    match result {
        Ok(data) => success(data, revision_id),
        Err(e) => error(e, revision_id),
    }
}
