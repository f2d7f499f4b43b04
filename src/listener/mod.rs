//! Realtime collection listener.
//!
//! A subscription watches one collection of the store. Every change event for
//! that collection triggers a full re-read: each child is decoded into a typed
//! record, children that fail to decode are logged and skipped, the store key
//! becomes the record id, and the resulting list is sorted before it is handed
//! to the subscriber. There is no diffing and no coalescing of bursts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

use crate::errors::AppError;
use crate::store::{ChangeEvent, Node, Store};

/// Order in which a collection's records are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Descending by sort key (feeds, notifications)
    NewestFirst,
    /// Ascending by sort key (comments, chat messages)
    OldestFirst,
}

/// A typed record living as a child of some collection.
pub trait Record: DeserializeOwned + Send + 'static {
    const ORDER: SortOrder;

    /// Replace any embedded id with the store key.
    fn assign_key(&mut self, key: &str);

    fn assign_version(&mut self, _version: i64) {}

    fn sort_key(&self) -> f64;

    fn record_id(&self) -> &str;
}

/// Server-side style child filter, applied to the raw JSON before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `child[field] == value`
    ChildEquals(String, Value),
    /// `child[field]` is an array containing `value`
    ChildContains(String, Value),
}

impl Filter {
    fn matches(&self, child: &Value) -> bool {
        match self {
            Filter::ChildEquals(field, expected) => child.get(field) == Some(expected),
            Filter::ChildContains(field, expected) => child
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(expected)),
        }
    }
}

/// Which children a listener watches.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub collection: String,
    pub filter: Option<Filter>,
}

impl CollectionQuery {
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: None,
        }
    }

    pub fn where_equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::ChildEquals(field.into(), value.into()));
        self
    }

    pub fn where_contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::ChildContains(field.into(), value.into()));
        self
    }
}

/// What a subscriber receives: a freshly sorted snapshot, or the reason none could be read.
pub type Update<T> = Result<T, AppError>;

/// Sort records by their collection order. Ties fall back to the id.
pub fn sort_records<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| {
        let by_key = match R::ORDER {
            SortOrder::OldestFirst => a.sort_key().total_cmp(&b.sort_key()),
            SortOrder::NewestFirst => b.sort_key().total_cmp(&a.sort_key()),
        };
        by_key.then_with(|| a.record_id().cmp(b.record_id()))
    });
}

/// Decode and sort a snapshot. Children that fail to decode are skipped.
pub fn decode_snapshot<R: Record>(query: &CollectionQuery, nodes: Vec<Node>) -> Vec<R> {
    let mut records: Vec<R> = nodes
        .into_iter()
        .filter(|node| query.filter.as_ref().map_or(true, |f| f.matches(&node.value)))
        .filter_map(|node| match serde_json::from_value::<R>(node.value) {
            Ok(mut record) => {
                record.assign_key(&node.key);
                record.assign_version(node.version);
                Some(record)
            }
            Err(e) => {
                tracing::warn!(
                    collection = %query.collection,
                    key = %node.key,
                    "Skipping child that failed to decode: {}",
                    e
                );
                None
            }
        })
        .collect();
    sort_records(&mut records);
    records
}

/// Read and decode the current contents of a collection once.
pub async fn read_snapshot<R: Record>(
    store: &Store,
    query: &CollectionQuery,
) -> Result<Vec<R>, AppError> {
    let nodes = store.children(&query.collection).await?;
    Ok(decode_snapshot(query, nodes))
}

/// A live subscription. Cancelled explicitly or when dropped.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    cancelled: Arc<AtomicBool>,
    task: AbortHandle,
}

impl Subscription {
    /// Stop delivering updates. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.task.abort();
            tracing::debug!(collection = %self.collection, "listener cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && !self.task.is_finished()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Creates subscriptions against one store.
#[derive(Clone)]
pub struct CollectionListener {
    store: Store,
}

impl CollectionListener {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Subscribe with a callback. Must be called from within a tokio runtime.
    ///
    /// `on_update` first receives the current snapshot, then one snapshot per
    /// change to the collection, in the order the store emitted them.
    pub fn subscribe<R, F>(&self, query: CollectionQuery, on_update: F) -> Subscription
    where
        R: Record,
        F: FnMut(Update<Vec<R>>) + Send + 'static,
    {
        self.spawn(query, Arc::new(AtomicBool::new(false)), on_update)
    }

    /// Subscribe as a channel of snapshots.
    pub fn watch<R: Record>(
        &self,
        query: CollectionQuery,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<R>>>) {
        self.watch_map(query, |records: Vec<R>| records)
    }

    /// Subscribe as a channel, transforming each snapshot first.
    ///
    /// Dropping the receiver cancels the subscription at the next update.
    pub fn watch_map<R, T, M>(
        &self,
        query: CollectionQuery,
        mut map: M,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<T>>)
    where
        R: Record,
        T: Send + 'static,
        M: FnMut(Vec<R>) -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let subscription = self.spawn(query, cancelled, move |update: Update<Vec<R>>| {
            if sender.send(update.map(&mut map)).is_err() {
                flag.store(true, Ordering::Release);
            }
        });
        (subscription, receiver)
    }

    fn spawn<R, F>(
        &self,
        query: CollectionQuery,
        cancelled: Arc<AtomicBool>,
        on_update: F,
    ) -> Subscription
    where
        R: Record,
        F: FnMut(Update<Vec<R>>) + Send + 'static,
    {
        // Register before returning so no write after `subscribe` is missed
        let changes = self.store.subscribe_changes();
        let collection = query.collection.clone();
        let task = tokio::spawn(run_listener(
            self.store.clone(),
            query,
            changes,
            cancelled.clone(),
            on_update,
        ));

        tracing::debug!(collection = %collection, "listener subscribed");
        Subscription {
            collection,
            cancelled,
            task: task.abort_handle(),
        }
    }
}

async fn run_listener<R, F>(
    store: Store,
    query: CollectionQuery,
    mut changes: broadcast::Receiver<ChangeEvent>,
    cancelled: Arc<AtomicBool>,
    mut on_update: F,
) where
    R: Record,
    F: FnMut(Update<Vec<R>>),
{
    deliver(&store, &query, &cancelled, &mut on_update).await;

    loop {
        match changes.recv().await {
            Ok(event) if event.collection == query.collection => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    collection = %query.collection,
                    skipped,
                    "Listener fell behind the change feed, resyncing"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        if cancelled.load(Ordering::Acquire) {
            break;
        }
        deliver(&store, &query, &cancelled, &mut on_update).await;
    }
}

async fn deliver<R, F>(
    store: &Store,
    query: &CollectionQuery,
    cancelled: &AtomicBool,
    on_update: &mut F,
) where
    R: Record,
    F: FnMut(Update<Vec<R>>),
{
    let update = read_snapshot(store, query).await.map_err(|e| {
        tracing::error!(collection = %query.collection, "Listener read failed: {}", e);
        AppError::Listener(format!("Could not read {}: {}", query.collection, e.message()))
    });

    // The owner may have gone away while we were reading
    if cancelled.load(Ordering::Acquire) {
        return;
    }
    on_update(update);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::models::{Comment, Notification, Publication};
    use crate::store::test_store;

    fn publication_json(created_at: f64) -> Value {
        json!({
            "authorUid": "u1",
            "authorUsername": "ana",
            "description": "post",
            "createdAt": created_at,
            "status": "help"
        })
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<Update<T>>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for snapshot")
            .expect("listener closed")
            .expect("listener failed")
    }

    #[tokio::test]
    async fn test_read_failure_reported_and_listener_recovers() {
        let (store, _dir) = test_store().await;
        store
            .create_child("publications", "p1", &publication_json(10.0))
            .await
            .unwrap();

        let listener = CollectionListener::new(store.clone());
        let (subscription, mut rx) = listener.watch::<Publication>(CollectionQuery::all("publications"));
        assert_eq!(next(&mut rx).await.len(), 1);

        // A row that is not JSON at all fails the whole read
        sqlx::query("UPDATE nodes SET value = '{' WHERE collection = 'publications' AND key = 'p1'")
            .execute(store.pool())
            .await
            .unwrap();
        store
            .create_child("publications", "p2", &publication_json(20.0))
            .await
            .unwrap();

        let update = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for error")
            .expect("listener closed");
        assert!(matches!(update, Err(AppError::Listener(_))));
        assert!(subscription.is_active());

        store.remove_child("publications", "p1").await.unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "p2");
    }

    #[tokio::test]
    async fn test_snapshot_skips_malformed_children_and_uses_keys() {
        let (store, _dir) = test_store().await;
        let mut body = publication_json(10.0);
        body["id"] = json!("embedded-id");
        store.create_child("publications", "p1", &body).await.unwrap();
        store
            .create_child("publications", "broken", &json!({ "description": 3 }))
            .await
            .unwrap();

        let listener = CollectionListener::new(store);
        let (_subscription, mut rx) = listener.watch::<Publication>(CollectionQuery::all("publications"));

        let snapshot = next(&mut rx).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "p1");
        assert_eq!(snapshot[0].version, 1);
    }

    #[tokio::test]
    async fn test_removing_a_child_redelivers_sorted_snapshot() {
        let (store, _dir) = test_store().await;
        for (key, at) in [("a", 20.0), ("b", 30.0), ("c", 10.0)] {
            store
                .create_child("publications", key, &publication_json(at))
                .await
                .unwrap();
        }

        let listener = CollectionListener::new(store.clone());
        let (_subscription, mut rx) = listener.watch::<Publication>(CollectionQuery::all("publications"));

        let initial = next(&mut rx).await;
        let ids: Vec<&str> = initial.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        store.remove_child("publications", "a").await.unwrap();

        let after = next(&mut rx).await;
        let ids: Vec<&str> = after.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_comments_sort_oldest_first() {
        let (store, _dir) = test_store().await;
        for (key, at) in [("late", 300.0), ("early", 100.0)] {
            store
                .create_child(
                    "comments/p1",
                    key,
                    &json!({
                        "publicationId": "p1",
                        "authorUid": "u1",
                        "authorUsername": "ana",
                        "text": key,
                        "createdAt": at
                    }),
                )
                .await
                .unwrap();
        }

        let comments: Vec<Comment> = read_snapshot(&store, &CollectionQuery::all("comments/p1"))
            .await
            .unwrap();
        assert_eq!(comments[0].id, "early");
        assert_eq!(comments[1].id, "late");
    }

    #[tokio::test]
    async fn test_other_collections_do_not_trigger_updates() {
        let (store, _dir) = test_store().await;
        let listener = CollectionListener::new(store.clone());
        let (_subscription, mut rx) = listener.watch::<Comment>(CollectionQuery::all("comments/p1"));
        assert!(next(&mut rx).await.is_empty());

        store
            .create_child("comments/p2", "x", &json!({}))
            .await
            .unwrap();

        let quiet = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(quiet.is_err(), "unexpected update for an unrelated collection");
    }

    #[tokio::test]
    async fn test_filter_by_recipient() {
        let (store, _dir) = test_store().await;
        for (key, recipient) in [("n1", "ana"), ("n2", "bob")] {
            store
                .create_child(
                    "notifications",
                    key,
                    &json!({
                        "recipientUid": recipient,
                        "senderUid": "carl",
                        "senderUsername": "carl",
                        "type": "new_comment",
                        "createdAt": 5.0,
                        "isRead": false
                    }),
                )
                .await
                .unwrap();
        }

        let query = CollectionQuery::all("notifications").where_equals("recipientUid", "ana");
        let mine: Vec<Notification> = read_snapshot(&store, &query).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "n1");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stops_delivery() {
        let (store, _dir) = test_store().await;
        let listener = CollectionListener::new(store.clone());
        let (subscription, mut rx) = listener.watch::<Publication>(CollectionQuery::all("publications"));
        assert!(next(&mut rx).await.is_empty());

        subscription.cancel();
        subscription.cancel();
        assert!(!subscription.is_active());

        store
            .create_child("publications", "p1", &publication_json(1.0))
            .await
            .unwrap();

        let closed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_callback_subscription_and_drop() {
        let (store, _dir) = test_store().await;
        let listener = CollectionListener::new(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = listener.subscribe(
            CollectionQuery::all("publications"),
            move |update: Update<Vec<Publication>>| {
                let _ = tx.send(update.map(|p| p.len()));
            },
        );

        assert_eq!(next(&mut rx).await, 0);
        store
            .create_child("publications", "p1", &publication_json(1.0))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, 1);

        drop(subscription);
        store
            .create_child("publications", "p2", &publication_json(2.0))
            .await
            .unwrap();
        let closed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
