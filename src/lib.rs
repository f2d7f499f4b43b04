//! CodeLink backend
//!
//! Realtime feed, comment threads, counters and notifications for the CodeLink
//! social app, served over REST and server-sent events from a SQLite-backed store.

pub mod api;
pub mod auth;
pub mod config;
pub mod counter;
pub mod errors;
pub mod listener;
pub mod models;
pub mod services;
pub mod store;
pub mod threads;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use services::Services;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        .route("/revision", get(api::get_revision))
        // Users
        .route("/users", get(api::search_users))
        .route("/users/{uid}", get(api::get_user))
        .route("/users/{uid}", put(api::upsert_user))
        // Publications
        .route("/publications", get(api::list_publications))
        .route("/publications", post(api::create_publication))
        .route("/publications/stream", get(api::stream_publications))
        .route("/publications/{id}", get(api::get_publication))
        .route("/publications/{id}", put(api::update_publication))
        .route("/publications/{id}", delete(api::delete_publication))
        .route("/publications/{id}/like", post(api::like_publication))
        // Comments
        .route("/publications/{id}/comments", get(api::list_comment_threads))
        .route("/publications/{id}/comments", post(api::add_comment))
        .route(
            "/publications/{id}/comments/stream",
            get(api::stream_comment_threads),
        )
        .route(
            "/publications/{id}/comments/{comment_id}",
            delete(api::delete_comment),
        )
        // Notifications
        .route("/notifications", get(api::list_notifications))
        .route("/notifications/stream", get(api::stream_notifications))
        .route("/notifications/{id}/read", post(api::mark_notification_read))
        .route("/notifications/{id}", delete(api::delete_notification))
        // Messages
        .route("/messages", post(api::send_message))
        .route("/conversations", get(api::list_conversations))
        .route("/conversations/stream", get(api::stream_conversations))
        .route("/conversations/{id}/messages", get(api::list_messages))
        .route(
            "/conversations/{id}/messages/stream",
            get(api::stream_messages),
        )
        .route(
            "/conversations/{id}/messages/{message_id}/read",
            post(api::mark_message_read),
        )
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
