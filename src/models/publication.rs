//! Publication model.

use serde::{Deserialize, Serialize};

use super::Timestamp;
use crate::listener::{Record, SortOrder};

/// What kind of post a publication is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublicationStatus {
    #[serde(rename = "help", alias = "Ayuda")]
    Help,
    #[serde(rename = "info", alias = "Informar")]
    Info,
    #[serde(rename = "meme", alias = "Meme")]
    Meme,
}

/// A feed post. `likes` and `comment_count` are store-maintained counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    /// Overwritten with the store key on decode
    #[serde(default)]
    pub id: String,
    pub author_uid: String,
    pub author_username: String,
    #[serde(
        default,
        alias = "authorProfilePictureURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_avatar_url: Option<String>,
    pub description: String,
    #[serde(default, alias = "imageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: Timestamp,
    pub status: PublicationStatus,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comment_count: i64,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Record for Publication {
    const ORDER: SortOrder = SortOrder::NewestFirst;

    fn assign_key(&mut self, key: &str) {
        self.id = key.to_string();
    }

    fn assign_version(&mut self, version: i64) {
        self.version = version;
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Request body for creating a new publication.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePublicationRequest {
    pub description: String,
    pub status: PublicationStatus,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Request body for editing a publication. Counters are not editable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePublicationRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<PublicationStatus>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for liking or unliking a publication.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub liked: bool,
}
