//! User profile endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, respond, ApiResult};
use crate::auth::ActingUser;
use crate::errors::AppError;
use crate::models::{PublicProfile, UpsertProfileRequest, UserSearchQuery};
use crate::AppState;

/// PUT /api/users/{uid} - Create or replace the acting user's own profile.
pub async fn upsert_user(
    State(state): State<AppState>,
    user: ActingUser,
    Path(uid): Path<String>,
    Json(request): Json<UpsertProfileRequest>,
) -> ApiResult<PublicProfile> {
    if user.uid() != uid {
        let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);
        return error(
            AppError::Unauthorized("Profiles can only be edited by their owner".to_string()),
            revision_id,
        );
    }

    let result = state
        .services
        .users
        .upsert_profile(&uid, request)
        .await
        .map(PublicProfile::from);
    respond(&state, result).await
}

/// GET /api/users/{uid} - Get a profile.
pub async fn get_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<PublicProfile> {
    let result = state
        .services
        .users
        .require_profile(&uid)
        .await
        .map(PublicProfile::from);
    respond(&state, result).await
}

/// GET /api/users?q= - Search profiles by username or full name.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserSearchQuery>,
) -> ApiResult<Vec<PublicProfile>> {
    let result = state
        .services
        .users
        .search(&query.q)
        .await
        .map(|profiles| profiles.into_iter().map(PublicProfile::from).collect());
    respond(&state, result).await
}
