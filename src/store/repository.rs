//! Keyed-collection operations on the realtime store.
//!
//! Uses conditional updates on a per-child version for optimistic concurrency.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use super::{ChangeEvent, ChangeKind};
use crate::errors::AppError;
use crate::models::RevisionInfo;

/// A stored child: its key under the collection, JSON value and version.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub key: String,
    pub value: Value,
    pub version: i64,
}

/// Handle to the realtime store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
    tx_retries: u32,
}

impl Store {
    pub fn new(pool: SqlitePool, tx_retries: u32, change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            pool,
            changes,
            tx_retries: tx_retries.max(1),
        }
    }

    /// Register for change events. Events published after this call are seen by the receiver.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Generate a fresh child key.
    pub fn new_key(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID and return the new value.
    async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1 RETURNING revision_id",
        )
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("revision_id"))
    }

    /// Bump the revision and tell listeners about the write.
    async fn announce(&self, collection: &str, key: &str, kind: ChangeKind) -> Result<(), AppError> {
        let revision = self.increment_revision().await?;
        // No receivers is not an error.
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            key: key.to_string(),
            kind,
            revision,
        });
        Ok(())
    }

    /// Get a single child.
    pub async fn get_child(&self, collection: &str, key: &str) -> Result<Option<Node>, AppError> {
        let row = sqlx::query("SELECT key, value, version FROM nodes WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(node_from_row).transpose()
    }

    /// Read every child of a collection, ordered by key.
    pub async fn children(&self, collection: &str) -> Result<Vec<Node>, AppError> {
        let rows = sqlx::query(
            "SELECT key, value, version FROM nodes WHERE collection = ? ORDER BY key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    /// Create a child that must not exist yet.
    pub async fn create_child(
        &self,
        collection: &str,
        key: &str,
        value: &Value,
    ) -> Result<Node, AppError> {
        let now = Utc::now().to_rfc3339();
        let encoded = serde_json::to_string(value)?;

        let result = sqlx::query(
            "INSERT INTO nodes (collection, key, value, version, updated_at) VALUES (?, ?, ?, 1, ?) ON CONFLICT(collection, key) DO NOTHING",
        )
        .bind(collection)
        .bind(key)
        .bind(&encoded)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_child(collection, key).await?;
            return Err(AppError::Conflict {
                message: format!("{}/{} already exists", collection, key),
                current_version: current.map(|n| n.version).unwrap_or(0),
            });
        }

        self.announce(collection, key, ChangeKind::Added).await?;

        Ok(Node {
            key: key.to_string(),
            value: value.clone(),
            version: 1,
        })
    }

    /// Write a child, replacing whatever was there.
    pub async fn set_child(
        &self,
        collection: &str,
        key: &str,
        value: &Value,
    ) -> Result<Node, AppError> {
        let now = Utc::now().to_rfc3339();
        let encoded = serde_json::to_string(value)?;

        let row = sqlx::query(
            r#"INSERT INTO nodes (collection, key, value, version, updated_at) VALUES (?, ?, ?, 1, ?)
               ON CONFLICT(collection, key) DO UPDATE SET
                   value = excluded.value,
                   version = nodes.version + 1,
                   updated_at = excluded.updated_at
               RETURNING version"#,
        )
        .bind(collection)
        .bind(key)
        .bind(&encoded)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        let version: i64 = row.get("version");

        let kind = if version == 1 {
            ChangeKind::Added
        } else {
            ChangeKind::Changed
        };
        self.announce(collection, key, kind).await?;

        Ok(Node {
            key: key.to_string(),
            value: value.clone(),
            version,
        })
    }

    /// Remove a child. Returns whether it existed.
    pub async fn remove_child(&self, collection: &str, key: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM nodes WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.announce(collection, key, ChangeKind::Removed).await?;
        Ok(true)
    }

    /// Remove every child of a collection. Returns how many were removed.
    pub async fn remove_collection(&self, collection: &str) -> Result<u64, AppError> {
        let keys: Vec<String> = sqlx::query("DELETE FROM nodes WHERE collection = ? RETURNING key")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get("key"))
            .collect();

        for key in &keys {
            self.announce(collection, key, ChangeKind::Removed).await?;
        }
        Ok(keys.len() as u64)
    }

    /// Apply `apply` to the current value of a child and write the result back,
    /// retrying from a fresh read whenever another writer got there first.
    pub async fn transaction<F>(&self, collection: &str, key: &str, apply: F) -> Result<Node, AppError>
    where
        F: FnMut(&mut Value) -> Result<(), AppError>,
    {
        self.transact(collection, key, None, apply).await
    }

    /// Merge top-level fields into an object child.
    pub async fn update_fields(
        &self,
        collection: &str,
        key: &str,
        fields: Map<String, Value>,
        expected_version: Option<i64>,
    ) -> Result<Node, AppError> {
        self.transact(collection, key, expected_version, |value| {
            let object = value.as_object_mut().ok_or_else(|| {
                AppError::Decode(format!("{}/{} is not an object", collection, key))
            })?;
            for (field, v) in &fields {
                object.insert(field.clone(), v.clone());
            }
            Ok(())
        })
        .await
    }

    async fn transact<F>(
        &self,
        collection: &str,
        key: &str,
        expected_version: Option<i64>,
        mut apply: F,
    ) -> Result<Node, AppError>
    where
        F: FnMut(&mut Value) -> Result<(), AppError>,
    {
        let mut last_version = 0;

        for attempt in 1..=self.tx_retries {
            let existing = self
                .get_child(collection, key)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{}/{} not found", collection, key)))?;

            // Check version for optimistic concurrency
            if let Some(expected) = expected_version {
                if existing.version != expected {
                    return Err(AppError::Conflict {
                        message: format!(
                            "Version mismatch: expected {}, current {}",
                            expected, existing.version
                        ),
                        current_version: existing.version,
                    });
                }
            }

            let mut value = existing.value.clone();
            apply(&mut value)?;

            let now = Utc::now().to_rfc3339();
            let encoded = serde_json::to_string(&value)?;

            // Conditional UPDATE: only lands if nobody wrote since our read
            let result = sqlx::query(
                "UPDATE nodes SET value = ?, version = version + 1, updated_at = ? WHERE collection = ? AND key = ? AND version = ?",
            )
            .bind(&encoded)
            .bind(&now)
            .bind(collection)
            .bind(key)
            .bind(existing.version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                self.announce(collection, key, ChangeKind::Changed).await?;
                return Ok(Node {
                    key: key.to_string(),
                    value,
                    version: existing.version + 1,
                });
            }

            last_version = existing.version;
            tracing::debug!(collection, key, attempt, "concurrent write detected, retrying");
        }

        tracing::warn!(
            collection,
            key,
            attempts = self.tx_retries,
            "transaction ran out of retries"
        );
        Err(AppError::Conflict {
            message: format!(
                "Concurrent modification of {}/{} not resolved after {} attempts",
                collection, key, self.tx_retries
            ),
            current_version: last_version,
        })
    }
}

// Helper functions for row conversion

fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Node, AppError> {
    let raw: String = row.get("value");
    let value = serde_json::from_str(&raw)
        .map_err(|e| AppError::Decode(format!("Stored value is not JSON: {}", e)))?;
    Ok(Node {
        key: row.get("key"),
        value,
        version: row.get("version"),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn test_create_get_remove() {
        let (store, _dir) = test_store().await;

        let key = store.new_key();
        store
            .create_child("publications", &key, &json!({ "description": "hola" }))
            .await
            .unwrap();

        let node = store.get_child("publications", &key).await.unwrap().unwrap();
        assert_eq!(node.value["description"], "hola");
        assert_eq!(node.version, 1);

        assert!(store.remove_child("publications", &key).await.unwrap());
        assert!(!store.remove_child("publications", &key).await.unwrap());
        assert!(store.get_child("publications", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let (store, _dir) = test_store().await;

        store.create_child("users", "u1", &json!({})).await.unwrap();
        let err = store.create_child("users", "u1", &json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { current_version: 1, .. }));
    }

    #[tokio::test]
    async fn test_writes_announce_changes_and_bump_revision() {
        let (store, _dir) = test_store().await;
        let mut changes = store.subscribe_changes();
        let initial = store.get_revision_id().await.unwrap();

        store.set_child("users", "u1", &json!({ "username": "a" })).await.unwrap();
        store.set_child("users", "u1", &json!({ "username": "b" })).await.unwrap();
        store.remove_child("users", "u1").await.unwrap();

        let kinds: Vec<ChangeKind> = (0..3).map(|_| changes.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed]
        );
        assert_eq!(store.get_revision_id().await.unwrap(), initial + 3);
    }

    #[tokio::test]
    async fn test_update_fields_checks_expected_version() {
        let (store, _dir) = test_store().await;
        store
            .create_child("publications", "p1", &json!({ "description": "a", "likes": 4 }))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("description".to_string(), json!("b"));
        let node = store
            .update_fields("publications", "p1", fields.clone(), Some(1))
            .await
            .unwrap();
        assert_eq!(node.version, 2);
        assert_eq!(node.value["description"], "b");
        assert_eq!(node.value["likes"], 4);

        let err = store
            .update_fields("publications", "p1", fields, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { current_version: 2, .. }));
    }

    #[tokio::test]
    async fn test_remove_collection() {
        let (store, _dir) = test_store().await;
        store.create_child("comments/p1", "a", &json!({})).await.unwrap();
        store.create_child("comments/p1", "b", &json!({})).await.unwrap();
        store.create_child("comments/p2", "c", &json!({})).await.unwrap();

        assert_eq!(store.remove_collection("comments/p1").await.unwrap(), 2);
        assert!(store.children("comments/p1").await.unwrap().is_empty());
        assert_eq!(store.children("comments/p2").await.unwrap().len(), 1);
    }
}
