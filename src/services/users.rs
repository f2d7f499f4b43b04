//! User profiles under `users/{uid}`.

use super::{decode_node, encode};
use crate::errors::AppError;
use crate::listener::{read_snapshot, CollectionQuery};
use crate::models::{UpsertProfileRequest, UserProfile};
use crate::store::Store;

const USERS: &str = "users";

#[derive(Clone)]
pub struct UserDirectory {
    store: Store,
}

impl UserDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create or replace the profile of `uid`.
    pub async fn upsert_profile(
        &self,
        uid: &str,
        request: UpsertProfileRequest,
    ) -> Result<UserProfile, AppError> {
        if uid.trim().is_empty() {
            return Err(AppError::Validation("User id is required".to_string()));
        }
        let username = request.username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }

        let profile = UserProfile {
            uid: uid.to_string(),
            username: username.to_string(),
            full_name: request.full_name.trim().to_string(),
            profile_picture_url: request.profile_picture_url,
            field: request.field,
            push_token: request.push_token,
        };
        self.store.set_child(USERS, uid, &encode(&profile)?).await?;

        tracing::info!(uid, username = %profile.username, "Profile saved");
        Ok(profile)
    }

    pub async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        self.store
            .get_child(USERS, uid)
            .await?
            .map(|node| decode_node(USERS, node))
            .transpose()
    }

    /// Like [`get_profile`](Self::get_profile) but a missing profile is an error.
    pub async fn require_profile(&self, uid: &str) -> Result<UserProfile, AppError> {
        self.get_profile(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", uid)))
    }

    /// Case-insensitive substring match on username or full name, sorted by username.
    /// A blank query matches nobody.
    pub async fn search(&self, query: &str) -> Result<Vec<UserProfile>, AppError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let profiles: Vec<UserProfile> =
            read_snapshot(&self.store, &CollectionQuery::all(USERS)).await?;
        let mut matches: Vec<UserProfile> = profiles
            .into_iter()
            .filter(|p| {
                p.username.to_lowercase().contains(&needle)
                    || p.full_name.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by_cached_key(|p| p.username.to_lowercase());

        Ok(matches)
    }
}
