//! User profile model.

use serde::{Deserialize, Serialize};

use super::Timestamp;
use crate::listener::{Record, SortOrder};

/// Profile stored under `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(
        default,
        alias = "profilePictureURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_picture_url: Option<String>,
    /// e.g. "Frontend", "Backend", "iOS Developer"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Device token read by the push collaborator
    #[serde(default, alias = "fcmToken", skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

impl Record for UserProfile {
    const ORDER: SortOrder = SortOrder::OldestFirst;

    fn assign_key(&mut self, key: &str) {
        self.uid = key.to_string();
    }

    // Profiles carry no timestamp; callers sort by username.
    fn sort_key(&self) -> Timestamp {
        0.0
    }

    fn record_id(&self) -> &str {
        &self.uid
    }
}

/// A profile as other clients see it. The push token stays in the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub uid: String,
    pub username: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<UserProfile> for PublicProfile {
    fn from(profile: UserProfile) -> Self {
        Self {
            uid: profile.uid,
            username: profile.username,
            full_name: profile.full_name,
            profile_picture_url: profile.profile_picture_url,
            field: profile.field,
        }
    }
}

/// Request body for creating or replacing a profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProfileRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}

/// Query string for user search.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub q: String,
}
