//! Atomic counters on record fields.
//!
//! `likes` and `commentCount` are only ever changed through here. Each
//! adjustment is a store transaction: read the field (absent or non-numeric
//! reads as 0), apply the delta, clamp at 0, write back only if nobody wrote in
//! between, otherwise retry from a fresh read.
//!
//! A field may be a `/`-separated path into nested objects, e.g.
//! `unreadCounts/ana`. Missing intermediate objects are created.

use serde_json::Value;

use crate::errors::AppError;
use crate::store::Store;

/// Direction of a counter adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    pub fn value(self) -> i64 {
        match self {
            Delta::Increment => 1,
            Delta::Decrement => -1,
        }
    }
}

/// Location of a numeric field: `{collection}/{key}.{field}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRef {
    pub collection: String,
    pub key: String,
    pub field: String,
}

impl CounterRef {
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn likes(publication_id: &str) -> Self {
        Self::new("publications", publication_id, "likes")
    }

    pub fn comment_count(publication_id: &str) -> Self {
        Self::new("publications", publication_id, "commentCount")
    }

    /// Per-participant unread counter of a conversation.
    pub fn unread(conversation_id: &str, uid: &str) -> Self {
        Self::new("conversations", conversation_id, format!("unreadCounts/{}", uid))
    }
}

impl std::fmt::Display for CounterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}.{}", self.collection, self.key, self.field)
    }
}

/// Applies transactional increments and decrements.
#[derive(Clone)]
pub struct CounterMutator {
    store: Store,
}

impl CounterMutator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Adjust the counter and return its settled value.
    pub async fn adjust(&self, counter: &CounterRef, delta: Delta) -> Result<i64, AppError> {
        self.adjust_by(counter, delta.value()).await
    }

    /// Add `amount` (possibly negative) in one transaction, clamping at 0.
    pub async fn adjust_by(&self, counter: &CounterRef, amount: i64) -> Result<i64, AppError> {
        let mut settled = 0;

        self.store
            .transaction(&counter.collection, &counter.key, |value| {
                let slot = field_slot(value, counter)?;
                let current = match &*slot {
                    Value::Null => 0,
                    v => v.as_i64().unwrap_or_else(|| {
                        tracing::warn!(counter = %counter, "Non-integer counter value {}, treating as 0", v);
                        0
                    }),
                };
                settled = (current + amount).max(0);
                *slot = Value::from(settled);
                Ok(())
            })
            .await?;

        tracing::debug!(counter = %counter, settled, "counter adjusted");
        Ok(settled)
    }

    /// Fire-and-forget adjustment for non-critical counters. Failures are logged.
    pub fn adjust_detached(&self, counter: CounterRef, delta: Delta) {
        let mutator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mutator.adjust(&counter, delta).await {
                tracing::warn!(counter = %counter, "Counter adjustment dropped: {}", e);
            }
        });
    }
}

/// Walk `counter.field` into `value`, creating missing objects on the way.
/// An absent leaf comes back as `Null`.
fn field_slot<'a>(value: &'a mut Value, counter: &CounterRef) -> Result<&'a mut Value, AppError> {
    let mut slot = value;
    for segment in counter.field.split('/') {
        let object = slot
            .as_object_mut()
            .ok_or_else(|| AppError::Decode(format!("{} is not inside an object", counter)))?;
        slot = object.entry(segment).or_insert(Value::Null);
    }
    Ok(slot)
}
