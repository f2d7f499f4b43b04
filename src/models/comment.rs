//! Comment model and the derived thread view.

use serde::{Deserialize, Serialize};

use super::Timestamp;
use crate::listener::{Record, SortOrder};

/// A comment on a publication. Created once, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Overwritten with the store key on decode
    #[serde(default)]
    pub id: String,
    pub publication_id: String,
    pub author_uid: String,
    pub author_username: String,
    #[serde(
        default,
        alias = "profileImageURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_avatar_url: Option<String>,
    pub text: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Comment {
    /// The parent this comment replies to, if any. An empty id counts as none.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }
}

impl Record for Comment {
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

/// A top-level comment with its direct replies, oldest first.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentThread {
    pub parent: Comment,
    pub replies: Vec<Comment>,
}

impl CommentThread {
    pub fn id(&self) -> &str {
        &self.parent.id
    }
}

/// What the user typed, before anything is written.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommentDraft {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Result of a successful comment post.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedComment {
    pub comment: Comment,
    /// Settled `commentCount` of the publication after the increment
    pub comment_count: i64,
    /// Id of the notification written for the publication's author, if one was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
}
