//! Server-sent event streams over realtime listeners.
//!
//! Each stream owns its [`Subscription`]. When the client disconnects axum
//! drops the stream, the subscription goes with it and the listener stops.
//! Every event carries a full snapshot: `event: snapshot` with the JSON list,
//! or `event: error` with an error body when the listener could not read.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::errors::{AppError, ErrorDetails};
use crate::listener::{Subscription, Update};
use crate::models::{ParticipantQuery, RecipientQuery};
use crate::AppState;

fn snapshot_event<T: Serialize>(update: Update<T>) -> Event {
    let event = match update {
        Ok(data) => Event::default().event("snapshot").json_data(&data),
        Err(e) => Event::default().event("error").json_data(error_body(&e)),
    };
    event.unwrap_or_else(|e| {
        tracing::error!("Failed to encode stream event: {}", e);
        Event::default().event("error").data(e.to_string())
    })
}

fn error_body(error: &AppError) -> ErrorDetails {
    ErrorDetails {
        code: error.error_code().to_string(),
        message: error.message(),
        details: error.details(),
    }
}

fn snapshot_stream<T>(
    subscription: Subscription,
    receiver: UnboundedReceiver<Update<T>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    tracing::debug!(collection = subscription.collection(), "stream opened");

    let events = stream::unfold(
        (subscription, receiver),
        |(subscription, mut receiver)| async move {
            let update = receiver.recv().await?;
            Some((
                Ok::<_, Infallible>(snapshot_event(update)),
                (subscription, receiver),
            ))
        },
    );
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /api/publications/stream - The feed, re-sent on every change.
pub async fn stream_publications(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.services.publications.watch();
    snapshot_stream(subscription, receiver)
}

/// GET /api/publications/{id}/comments/stream - Comment threads, re-sent on every change.
pub async fn stream_comment_threads(
    State(state): State<AppState>,
    Path(publication_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.services.comments.watch_threads(&publication_id);
    snapshot_stream(subscription, receiver)
}

/// GET /api/notifications/stream?recipient=
pub async fn stream_notifications(
    State(state): State<AppState>,
    Query(query): Query<RecipientQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.services.notifications.watch_for(&query.recipient);
    snapshot_stream(subscription, receiver)
}

/// GET /api/conversations/stream?user=
pub async fn stream_conversations(
    State(state): State<AppState>,
    Query(query): Query<ParticipantQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.services.messages.watch_conversations(&query.user);
    snapshot_stream(subscription, receiver)
}

/// GET /api/conversations/{id}/messages/stream
pub async fn stream_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, receiver) = state.services.messages.watch_messages(&conversation_id);
    snapshot_stream(subscription, receiver)
}
