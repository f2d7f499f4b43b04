//! Publications under `publications/{id}`.

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{decode_node, encode, UserDirectory};
use crate::counter::{CounterMutator, CounterRef, Delta};
use crate::errors::AppError;
use crate::listener::{read_snapshot, CollectionListener, CollectionQuery, Subscription, Update};
use crate::models::{
    now_timestamp, CreatePublicationRequest, Publication, UpdatePublicationRequest,
};
use crate::store::Store;

const PUBLICATIONS: &str = "publications";

pub(crate) fn comments_path(publication_id: &str) -> String {
    format!("comments/{}", publication_id)
}

/// Stored form of a publication. The version lives on the node, not in the value.
fn stored(publication: &Publication) -> Result<Value, AppError> {
    let mut value = encode(publication)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("version");
    }
    Ok(value)
}

#[derive(Clone)]
pub struct PublicationService {
    store: Store,
    users: UserDirectory,
    counters: CounterMutator,
    listener: CollectionListener,
}

impl PublicationService {
    pub fn new(
        store: Store,
        users: UserDirectory,
        counters: CounterMutator,
        listener: CollectionListener,
    ) -> Self {
        Self {
            store,
            users,
            counters,
            listener,
        }
    }

    /// Create a publication for `author_uid`. Author name and avatar are copied
    /// from the profile; both counters start at zero.
    pub async fn create(
        &self,
        author_uid: &str,
        request: CreatePublicationRequest,
    ) -> Result<Publication, AppError> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("Description is required".to_string()));
        }
        let author = self.users.require_profile(author_uid).await?;

        let mut publication = Publication {
            id: self.store.new_key(),
            author_uid: author.uid,
            author_username: author.username,
            author_avatar_url: author.profile_picture_url,
            description: description.to_string(),
            image_url: request.image_url.filter(|url| !url.trim().is_empty()),
            created_at: now_timestamp(),
            status: request.status,
            likes: 0,
            comment_count: 0,
            version: 0,
        };

        let node = self
            .store
            .create_child(PUBLICATIONS, &publication.id, &stored(&publication)?)
            .await?;
        publication.version = node.version;

        tracing::info!(id = %publication.id, author = %publication.author_uid, "Publication created");
        Ok(publication)
    }

    pub async fn get(&self, id: &str) -> Result<Publication, AppError> {
        let node = self
            .store
            .get_child(PUBLICATIONS, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Publication {} not found", id)))?;
        decode_node(PUBLICATIONS, node)
    }

    /// All publications, newest first.
    pub async fn list(&self) -> Result<Vec<Publication>, AppError> {
        read_snapshot(&self.store, &CollectionQuery::all(PUBLICATIONS)).await
    }

    /// Edit description, status or image. Counters are left alone.
    pub async fn update(
        &self,
        id: &str,
        request: UpdatePublicationRequest,
    ) -> Result<Publication, AppError> {
        let mut fields = Map::new();

        if let Some(description) = request.description {
            let description = description.trim();
            if description.is_empty() {
                return Err(AppError::Validation("Description cannot be empty".to_string()));
            }
            fields.insert("description".to_string(), Value::from(description));
        }
        if let Some(status) = request.status {
            fields.insert("status".to_string(), encode(&status)?);
        }
        if let Some(image_url) = request.image_url {
            let image_url = image_url.trim();
            let value = if image_url.is_empty() {
                Value::Null
            } else {
                Value::from(image_url)
            };
            fields.insert("imageUrl".to_string(), value);
        }

        if fields.is_empty() {
            return self.get(id).await;
        }

        let node = self
            .store
            .update_fields(PUBLICATIONS, id, fields, request.expected_version)
            .await?;
        decode_node(PUBLICATIONS, node)
    }

    /// Remove a publication together with its comments.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if !self.store.remove_child(PUBLICATIONS, id).await? {
            return Err(AppError::NotFound(format!("Publication {} not found", id)));
        }
        let removed = self.store.remove_collection(&comments_path(id)).await?;

        tracing::info!(id, comments = removed, "Publication deleted");
        Ok(())
    }

    /// Like or unlike. Failures are logged and swallowed; returns the settled
    /// like count when the adjustment went through.
    pub async fn set_liked(&self, id: &str, liked: bool) -> Option<i64> {
        let delta = if liked {
            Delta::Increment
        } else {
            Delta::Decrement
        };

        match self.counters.adjust(&CounterRef::likes(id), delta).await {
            Ok(likes) => Some(likes),
            Err(e) => {
                tracing::warn!(publication = id, liked, "Like not recorded: {}", e);
                None
            }
        }
    }

    pub fn listen<F>(&self, on_update: F) -> Subscription
    where
        F: FnMut(Update<Vec<Publication>>) + Send + 'static,
    {
        self.listener
            .subscribe(CollectionQuery::all(PUBLICATIONS), on_update)
    }

    pub fn watch(&self) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<Publication>>>) {
        self.listener.watch(CollectionQuery::all(PUBLICATIONS))
    }
}
