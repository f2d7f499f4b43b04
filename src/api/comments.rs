//! Comment endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{respond, ApiResult};
use crate::auth::ActingUser;
use crate::models::{CommentDraft, CommentThread, PostedComment};
use crate::AppState;

/// GET /api/publications/{id}/comments - Comment threads of a publication.
pub async fn list_comment_threads(
    State(state): State<AppState>,
    Path(publication_id): Path<String>,
) -> ApiResult<Vec<CommentThread>> {
    let result = state.services.comments.threads(&publication_id).await;
    respond(&state, result).await
}

/// POST /api/publications/{id}/comments - Comment or reply as the acting user.
///
/// A failed post answers 503 with the draft text in `error.details.draftText`.
pub async fn add_comment(
    State(state): State<AppState>,
    user: ActingUser,
    Path(publication_id): Path<String>,
    Json(draft): Json<CommentDraft>,
) -> ApiResult<PostedComment> {
    let result = state
        .services
        .comments
        .add_comment(&publication_id, user.uid(), draft)
        .await;
    respond(&state, result).await
}

/// DELETE /api/publications/{id}/comments/{commentId} - Returns the new comment count.
///
/// Allowed for the comment's author and the publication's author. Deleting a
/// top-level comment takes its replies with it.
pub async fn delete_comment(
    State(state): State<AppState>,
    user: ActingUser,
    Path((publication_id, comment_id)): Path<(String, String)>,
) -> ApiResult<i64> {
    let result = state
        .services
        .comments
        .delete_comment(&publication_id, &comment_id, user.uid())
        .await;
    respond(&state, result).await
}
