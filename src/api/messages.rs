//! Direct message endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{respond, ApiResult};
use crate::auth::ActingUser;
use crate::models::{Conversation, Message, ParticipantQuery, SendMessageRequest};
use crate::AppState;

/// POST /api/messages - Send a message as the acting user.
pub async fn send_message(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let result = state
        .services
        .messages
        .send_message(user.uid(), request)
        .await;
    respond(&state, result).await
}

/// GET /api/conversations?user= - Conversations of a user, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ParticipantQuery>,
) -> ApiResult<Vec<Conversation>> {
    let result = state.services.messages.conversations_for(&query.user).await;
    respond(&state, result).await
}

/// GET /api/conversations/{id}/messages - Messages of a conversation, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Vec<Message>> {
    let result = state.services.messages.messages(&conversation_id).await;
    respond(&state, result).await
}

/// POST /api/conversations/{id}/messages/{messageId}/read - Only the recipient may.
pub async fn mark_message_read(
    State(state): State<AppState>,
    user: ActingUser,
    Path((conversation_id, message_id)): Path<(String, String)>,
) -> ApiResult<Message> {
    let result = state
        .services
        .messages
        .mark_message_read(&conversation_id, &message_id, user.uid())
        .await;
    respond(&state, result).await
}
