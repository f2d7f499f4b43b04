//! Direct message and conversation models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Timestamp;
use crate::listener::{Record, SortOrder};

/// A two-party conversation. `participant_uids` is kept sorted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: String,
    pub participant_uids: Vec<String>,
    #[serde(default)]
    pub participant_usernames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_text: Option<String>,
    pub last_message_timestamp: Timestamp,
    /// Unread messages per participant uid
    #[serde(default)]
    pub unread_counts: BTreeMap<String, i64>,
}

impl Conversation {
    pub fn unread_for(&self, uid: &str) -> i64 {
        self.unread_counts.get(uid).copied().unwrap_or(0)
    }
}

impl Record for Conversation {
    const ORDER: SortOrder = SortOrder::NewestFirst;

    fn assign_key(&mut self, key: &str) {
        self.id = key.to_string();
    }

    fn sort_key(&self) -> Timestamp {
        self.last_message_timestamp
    }

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A single message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub conversation_id: String,
    pub sender_uid: String,
    pub sender_username: String,
    pub recipient_uid: String,
    pub text: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub is_read: bool,
}

impl Record for Message {
    const ORDER: SortOrder = SortOrder::OldestFirst;

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

/// Request body for sending a direct message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_uid: String,
    pub text: String,
}

/// Query string for conversation listings.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantQuery {
    pub user: String,
}
