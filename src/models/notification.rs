//! Notification model.

use serde::{Deserialize, Serialize};

use super::Timestamp;
use crate::listener::{Record, SortOrder};

/// Notification type written when someone comments on a publication.
pub const NEW_COMMENT: &str = "new_comment";

/// A notification addressed to one user. The push collaborator removes it after delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    pub recipient_uid: String,
    pub sender_uid: String,
    pub sender_username: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub is_read: bool,
}

impl Record for Notification {
    const ORDER: SortOrder = SortOrder::NewestFirst;

    fn assign_key(&mut self, key: &str) {
        self.id = key.to_string();
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Query string for notification listings.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientQuery {
    pub recipient: String,
}
