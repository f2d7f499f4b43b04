//! Notification endpoints.

use axum::extract::{Path, Query, State};

use super::{error, respond, ApiResult};
use crate::auth::ActingUser;
use crate::errors::AppError;
use crate::models::{Notification, RecipientQuery};
use crate::AppState;

/// GET /api/notifications?recipient= - Notifications for one user, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<RecipientQuery>,
) -> ApiResult<Vec<Notification>> {
    let result = state
        .services
        .notifications
        .list_for(&query.recipient)
        .await;
    respond(&state, result).await
}

/// The notification, if `user` is its recipient.
async fn addressed_to_user(
    state: &AppState,
    user: &ActingUser,
    id: &str,
) -> Result<Notification, AppError> {
    let notification = state.services.notifications.get(id).await?;
    if notification.recipient_uid != user.uid() {
        return Err(AppError::Unauthorized(
            "Notifications can only be changed by their recipient".to_string(),
        ));
    }
    Ok(notification)
}

/// POST /api/notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Notification> {
    if let Err(e) = addressed_to_user(&state, &user, &id).await {
        let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);
        return error(e, revision_id);
    }

    let result = state.services.notifications.mark_read(&id).await;
    respond(&state, result).await
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    if let Err(e) = addressed_to_user(&state, &user, &id).await {
        let revision_id = state.services.store.get_revision_id().await.unwrap_or(0);
        return error(e, revision_id);
    }

    let result = state.services.notifications.delete(&id).await;
    respond(&state, result).await
}
