//! Notification records under `notifications/{id}`.
//!
//! Records are written for the push collaborator, which delivers and then
//! deletes them. Clients may also list, watch and mark them read.

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{decode_node, encode};
use crate::errors::AppError;
use crate::listener::{read_snapshot, CollectionListener, CollectionQuery, Subscription, Update};
use crate::models::Notification;
use crate::store::Store;

const NOTIFICATIONS: &str = "notifications";

fn addressed_to(recipient_uid: &str) -> CollectionQuery {
    CollectionQuery::all(NOTIFICATIONS).where_equals("recipientUid", recipient_uid)
}

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
    listener: CollectionListener,
}

impl NotificationService {
    pub fn new(store: Store, listener: CollectionListener) -> Self {
        Self { store, listener }
    }

    /// Write a new notification under a fresh key.
    pub async fn enqueue(&self, mut notification: Notification) -> Result<Notification, AppError> {
        notification.id = self.store.new_key();
        self.store
            .create_child(NOTIFICATIONS, &notification.id, &encode(&notification)?)
            .await?;

        tracing::debug!(
            id = %notification.id,
            recipient = %notification.recipient_uid,
            kind = %notification.kind,
            "Notification enqueued"
        );
        Ok(notification)
    }

    pub async fn get(&self, id: &str) -> Result<Notification, AppError> {
        let node = self
            .store
            .get_child(NOTIFICATIONS, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
        decode_node(NOTIFICATIONS, node)
    }

    /// Notifications for one recipient, newest first.
    pub async fn list_for(&self, recipient_uid: &str) -> Result<Vec<Notification>, AppError> {
        read_snapshot(&self.store, &addressed_to(recipient_uid)).await
    }

    pub fn listen_for<F>(&self, recipient_uid: &str, on_update: F) -> Subscription
    where
        F: FnMut(Update<Vec<Notification>>) + Send + 'static,
    {
        self.listener.subscribe(addressed_to(recipient_uid), on_update)
    }

    pub fn watch_for(
        &self,
        recipient_uid: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<Notification>>>) {
        self.listener.watch(addressed_to(recipient_uid))
    }

    /// Mark as read. Already-read notifications are returned untouched.
    pub async fn mark_read(&self, id: &str) -> Result<Notification, AppError> {
        let notification = self.get(id).await?;
        if notification.is_read {
            return Ok(notification);
        }

        let mut fields = Map::new();
        fields.insert("isRead".to_string(), Value::Bool(true));
        let node = self
            .store
            .update_fields(NOTIFICATIONS, id, fields, None)
            .await?;
        decode_node(NOTIFICATIONS, node)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if !self.store.remove_child(NOTIFICATIONS, id).await? {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio::time::timeout;

    use crate::errors::AppError;
    use crate::models::{Notification, NEW_COMMENT};
    use crate::services::test_services;

    fn notification(recipient: &str, created_at: f64) -> Notification {
        Notification {
            id: String::new(),
            recipient_uid: recipient.to_string(),
            sender_uid: "bob".to_string(),
            sender_username: "bobby".to_string(),
            kind: NEW_COMMENT.to_string(),
            publication_id: Some("p1".to_string()),
            comment_text: Some("hi".to_string()),
            created_at,
            is_read: false,
        }
    }

    #[tokio::test]
    async fn test_list_for_recipient_newest_first() {
        let (services, _dir) = test_services().await;
        let older = services
            .notifications
            .enqueue(notification("ana", 10.0))
            .await
            .unwrap();
        let newer = services
            .notifications
            .enqueue(notification("ana", 20.0))
            .await
            .unwrap();
        services
            .notifications
            .enqueue(notification("carl", 30.0))
            .await
            .unwrap();

        let ids: Vec<String> = services
            .notifications
            .list_for("ana")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_mark_read_and_delete() {
        let (services, _dir) = test_services().await;
        let created = services
            .notifications
            .enqueue(notification("ana", 1.0))
            .await
            .unwrap();

        let read = services.notifications.mark_read(&created.id).await.unwrap();
        assert!(read.is_read);
        let revision = services.store.get_revision_id().await.unwrap();

        // Second call writes nothing
        services.notifications.mark_read(&created.id).await.unwrap();
        assert_eq!(services.store.get_revision_id().await.unwrap(), revision);

        services.notifications.delete(&created.id).await.unwrap();
        assert!(matches!(
            services.notifications.delete(&created.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    async fn next(rx: &mut UnboundedReceiver<Result<usize, AppError>>) -> usize {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
            .expect("listener failed")
    }

    #[tokio::test]
    async fn test_listen_for_sees_only_own_notifications() {
        let (services, _dir) = test_services().await;
        let (tx, mut rx) = unbounded_channel();
        let _subscription = services.notifications.listen_for("ana", move |update| {
            let _ = tx.send(update.map(|list: Vec<Notification>| list.len()));
        });

        assert_eq!(next(&mut rx).await, 0);
        services
            .notifications
            .enqueue(notification("ana", 1.0))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, 1);

        // Writes for someone else still trigger a re-read of the collection
        services
            .notifications
            .enqueue(notification("carl", 2.0))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, 1);
    }
}
