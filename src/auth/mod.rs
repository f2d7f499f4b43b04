//! Request authentication.
//!
//! Two layers: an optional pre-shared key gating the whole API (compared in
//! constant time), and the `x-user-id` header naming the user a request acts
//! for. Identity is asserted by the trusted client; verifying it belongs to the
//! sign-in provider in front of this service.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppErrorWithRevision, ErrorResponse};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header naming the acting user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let headers = request.headers();
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        });

    match provided {
        Some(key) if constant_time_compare(key, &expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing or invalid API key"),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse::new(&AppError::Unauthorized(message.to_string()), 0);
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// The user a request acts for, taken from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser(pub String);

impl ActingUser {
    pub fn uid(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppErrorWithRevision;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(|uid| ActingUser(uid.to_string()))
            .ok_or_else(|| AppErrorWithRevision {
                error: AppError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)),
                revision_id: 0,
            })
    }
}
