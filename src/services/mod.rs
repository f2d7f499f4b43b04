//! Application services over the realtime store.
//!
//! Services are plain values built once by [`Services::new`] and handed to
//! whoever needs them. Each one owns a clone of the store handle; nothing here
//! is global.

mod comments;
mod messages;
mod notifications;
mod publications;
mod users;

pub use comments::*;
pub use messages::*;
pub use notifications::*;
pub use publications::*;
pub use users::*;

use serde::Serialize;
use serde_json::Value;

use crate::counter::CounterMutator;
use crate::errors::AppError;
use crate::listener::{CollectionListener, Record};
use crate::store::{Node, Store};

/// Every service the backend exposes, wired to one store.
#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub users: UserDirectory,
    pub publications: PublicationService,
    pub comments: CommentService,
    pub notifications: NotificationService,
    pub messages: MessageService,
}

impl Services {
    pub fn new(store: Store) -> Self {
        let listener = CollectionListener::new(store.clone());
        let counters = CounterMutator::new(store.clone());

        let users = UserDirectory::new(store.clone());
        let notifications = NotificationService::new(store.clone(), listener.clone());
        let publications = PublicationService::new(
            store.clone(),
            users.clone(),
            counters.clone(),
            listener.clone(),
        );
        let comments = CommentService::new(
            store.clone(),
            users.clone(),
            publications.clone(),
            notifications.clone(),
            counters.clone(),
            listener.clone(),
        );
        let messages = MessageService::new(store.clone(), users.clone(), counters, listener);

        Self {
            store,
            users,
            publications,
            comments,
            notifications,
            messages,
        }
    }

    /// Release the store. Live subscriptions stop receiving updates.
    pub async fn close(&self) {
        self.store.close().await;
        tracing::info!("Services closed");
    }
}

/// Decode a single stored child the same way listeners do.
pub(crate) fn decode_node<R: Record>(collection: &str, node: Node) -> Result<R, AppError> {
    let mut record: R = serde_json::from_value(node.value).map_err(|e| {
        AppError::Decode(format!("{}/{} is malformed: {}", collection, node.key, e))
    })?;
    record.assign_key(&node.key);
    record.assign_version(node.version);
    Ok(record)
}

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Value, AppError> {
    serde_json::to_value(record)
        .map_err(|e| AppError::Internal(format!("Failed to encode record: {}", e)))
}

#[cfg(test)]
pub(crate) async fn test_services() -> (Services, tempfile::TempDir) {
    use crate::models::UpsertProfileRequest;

    let (store, dir) = crate::store::test_store().await;
    let services = Services::new(store);

    for (uid, username, full_name) in [
        ("ana", "ana_dev", "Ana Torres"),
        ("bob", "bobby", "Roberto Díaz"),
        ("carl", "carl_ios", "Carla Ruiz"),
    ] {
        services
            .users
            .upsert_profile(
                uid,
                UpsertProfileRequest {
                    username: username.to_string(),
                    full_name: full_name.to_string(),
                    profile_picture_url: Some(format!("https://img.example/{}.png", uid)),
                    field: None,
                    push_token: None,
                },
            )
            .await
            .expect("Failed to seed user");
    }

    (services, dir)
}
