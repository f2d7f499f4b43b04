//! Publication endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::{error, respond, success, ApiResult};
use crate::auth::ActingUser;
use crate::errors::AppError;
use crate::models::{
    CreatePublicationRequest, LikeRequest, Publication, UpdatePublicationRequest,
};
use crate::AppState;

/// Outcome of a like toggle. `likes` is absent when the store did not take the change.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<i64>,
}

/// GET /api/publications - List the feed, newest first.
pub async fn list_publications(State(state): State<AppState>) -> ApiResult<Vec<Publication>> {
    let result = state.services.publications.list().await;
    respond(&state, result).await
}

/// GET /api/publications/{id} - Get a single publication.
pub async fn get_publication(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Publication> {
    let result = state.services.publications.get(&id).await;
    respond(&state, result).await
}

/// POST /api/publications - Publish as the acting user.
pub async fn create_publication(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<CreatePublicationRequest>,
) -> ApiResult<Publication> {
    let result = state
        .services
        .publications
        .create(user.uid(), request)
        .await;
    respond(&state, result).await
}

/// PUT /api/publications/{id} - Edit a publication. Only its author may.
pub async fn update_publication(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<String>,
    Json(request): Json<UpdatePublicationRequest>,
) -> ApiResult<Publication> {
    let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);

    match state.services.publications.get(&id).await {
        Ok(existing) if existing.author_uid != user.uid() => {
            return error(
                AppError::Unauthorized("Only the author can edit a publication".to_string()),
                revision_id,
            )
        }
        Ok(_) => {}
        Err(e) => return error(e, revision_id),
    }

    let result = state.services.publications.update(&id, request).await;
    respond(&state, result).await
}

/// DELETE /api/publications/{id} - Delete a publication and its comments.
pub async fn delete_publication(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);

    match state.services.publications.get(&id).await {
        Ok(existing) if existing.author_uid != user.uid() => {
            return error(
                AppError::Unauthorized("Only the author can delete a publication".to_string()),
                revision_id,
            )
        }
        Ok(_) => {}
        Err(e) => return error(e, revision_id),
    }

    let result = state.services.publications.delete(&id).await;
    respond(&state, result).await
}

/// POST /api/publications/{id}/like - Like or unlike. Never fails on store errors.
pub async fn like_publication(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LikeRequest>,
) -> ApiResult<LikeResponse> {
    let likes = state
        .services
        .publications
        .set_liked(&id, request.liked)
        .await;

    let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);
    success(
        LikeResponse {
            liked: request.liked,
            likes,
        },
        revision_id,
    )
}
