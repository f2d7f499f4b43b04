//! Comments under `comments/{publicationId}/{commentId}`.
//!
//! Posting a comment walks `Draft -> Persisted -> CountIncremented ->
//! NotificationEnqueued`. The first two steps are critical and fail the whole
//! post with the draft text handed back. The notification is best-effort.

use tokio::sync::mpsc;

use super::publications::comments_path;
use super::{decode_node, encode, NotificationService, PublicationService, UserDirectory};
use crate::counter::{CounterMutator, CounterRef, Delta};
use crate::errors::{AppError, CommentStage};
use crate::listener::{read_snapshot, CollectionListener, CollectionQuery, Subscription, Update};
use crate::models::{
    now_timestamp, Comment, CommentDraft, CommentThread, Notification, PostedComment, NEW_COMMENT,
};
use crate::store::Store;
use crate::threads::assemble;

#[derive(Clone)]
pub struct CommentService {
    store: Store,
    users: UserDirectory,
    publications: PublicationService,
    notifications: NotificationService,
    counters: CounterMutator,
    listener: CollectionListener,
}

impl CommentService {
    pub fn new(
        store: Store,
        users: UserDirectory,
        publications: PublicationService,
        notifications: NotificationService,
        counters: CounterMutator,
        listener: CollectionListener,
    ) -> Self {
        Self {
            store,
            users,
            publications,
            notifications,
            counters,
            listener,
        }
    }

    /// Post `draft` on a publication as `author_uid`.
    pub async fn add_comment(
        &self,
        publication_id: &str,
        author_uid: &str,
        draft: CommentDraft,
    ) -> Result<PostedComment, AppError> {
        let text = draft.text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Comment text is required".to_string()));
        }

        let publication = self.publications.get(publication_id).await?;
        let author = self.users.require_profile(author_uid).await?;
        let collection = comments_path(publication_id);

        let parent_id = match draft.parent_id.as_deref().filter(|p| !p.is_empty()) {
            Some(parent_id) => {
                self.require_root(&collection, parent_id).await?;
                Some(parent_id.to_string())
            }
            None => None,
        };

        let comment = Comment {
            id: self.store.new_key(),
            publication_id: publication_id.to_string(),
            author_uid: author.uid,
            author_username: author.username,
            author_avatar_url: author.profile_picture_url,
            text: text.to_string(),
            created_at: now_timestamp(),
            parent_id,
        };

        // Persisted
        let persisted = match encode(&comment) {
            Ok(value) => self.store.create_child(&collection, &comment.id, &value).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            tracing::error!(publication = publication_id, "Comment not persisted: {}", e);
            return Err(AppError::CommentNotPosted {
                stage: CommentStage::Persist,
                message: e.message(),
                draft_text: draft.text,
            });
        }

        // CountIncremented
        let comment_count = match self
            .counters
            .adjust(&CounterRef::comment_count(publication_id), Delta::Increment)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    publication = publication_id,
                    comment = %comment.id,
                    "Comment count not incremented, rolling back comment: {}",
                    e
                );
                if let Err(rollback) = self.store.remove_child(&collection, &comment.id).await {
                    tracing::error!(
                        publication = publication_id,
                        comment = %comment.id,
                        "Rollback failed, comment is stored without a counted increment: {}",
                        rollback
                    );
                }
                return Err(AppError::CommentNotPosted {
                    stage: CommentStage::CountIncrement,
                    message: e.message(),
                    draft_text: draft.text,
                });
            }
        };

        // NotificationEnqueued
        let notification_id = if comment.author_uid != publication.author_uid {
            let notification = Notification {
                id: String::new(),
                recipient_uid: publication.author_uid.clone(),
                sender_uid: comment.author_uid.clone(),
                sender_username: comment.author_username.clone(),
                kind: NEW_COMMENT.to_string(),
                publication_id: Some(publication_id.to_string()),
                comment_text: Some(comment.text.clone()),
                created_at: comment.created_at,
                is_read: false,
            };
            match self.notifications.enqueue(notification).await {
                Ok(n) => Some(n.id),
                Err(e) => {
                    tracing::warn!(
                        publication = publication_id,
                        comment = %comment.id,
                        "Notification not enqueued: {}",
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(
            publication = publication_id,
            comment = %comment.id,
            comment_count,
            "Comment posted"
        );
        Ok(PostedComment {
            comment,
            comment_count,
            notification_id,
        })
    }

    /// Replies may only target a top-level comment of the same publication.
    async fn require_root(&self, collection: &str, parent_id: &str) -> Result<(), AppError> {
        let node = self
            .store
            .get_child(collection, parent_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("Parent comment {} not found", parent_id)))?;
        let parent: Comment = decode_node(collection, node)?;

        if parent.parent().is_some() {
            return Err(AppError::Validation(format!(
                "Comment {} is a reply and cannot be replied to",
                parent_id
            )));
        }
        Ok(())
    }

    /// Delete a comment as `actor_uid`, who must be its author or the
    /// publication's author. Deleting a root also deletes its replies. The
    /// count drops by the number of records removed; returns the settled count.
    pub async fn delete_comment(
        &self,
        publication_id: &str,
        comment_id: &str,
        actor_uid: &str,
    ) -> Result<i64, AppError> {
        let collection = comments_path(publication_id);
        let comment: Comment = match self.store.get_child(&collection, comment_id).await? {
            Some(node) => decode_node(&collection, node)?,
            None => return Err(AppError::NotFound(format!("Comment {} not found", comment_id))),
        };
        let publication = self.publications.get(publication_id).await?;
        if actor_uid != comment.author_uid && actor_uid != publication.author_uid {
            return Err(AppError::Unauthorized(
                "Only the comment or publication author can delete a comment".to_string(),
            ));
        }

        let mut doomed: Vec<String> = if comment.parent().is_none() {
            self.comments(publication_id)
                .await?
                .into_iter()
                .filter(|c| c.parent() == Some(comment_id))
                .map(|c| c.id)
                .collect()
        } else {
            Vec::new()
        };
        // Replies first, so a failure never leaves replies without their root
        doomed.push(comment.id.clone());

        let mut removed = 0;
        for id in &doomed {
            if self.store.remove_child(&collection, id).await? {
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(AppError::NotFound(format!("Comment {} not found", comment_id)));
        }

        let count = self
            .counters
            .adjust_by(&CounterRef::comment_count(publication_id), -removed)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    publication = publication_id,
                    comment = comment_id,
                    removed,
                    "Comments removed but count not decremented: {}",
                    e
                )
            })?;

        tracing::info!(publication = publication_id, comment = comment_id, removed, "Comment deleted");
        Ok(count)
    }

    /// Flat comment list, oldest first.
    pub async fn comments(&self, publication_id: &str) -> Result<Vec<Comment>, AppError> {
        read_snapshot(&self.store, &CollectionQuery::all(comments_path(publication_id))).await
    }

    pub async fn threads(&self, publication_id: &str) -> Result<Vec<CommentThread>, AppError> {
        Ok(assemble(&self.comments(publication_id).await?))
    }

    /// Receive the assembled threads of a publication after every change.
    pub fn listen_threads<F>(&self, publication_id: &str, mut on_update: F) -> Subscription
    where
        F: FnMut(Update<Vec<CommentThread>>) + Send + 'static,
    {
        self.listener.subscribe(
            CollectionQuery::all(comments_path(publication_id)),
            move |update: Update<Vec<Comment>>| on_update(update.map(|c| assemble(&c))),
        )
    }

    pub fn watch_threads(
        &self,
        publication_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<CommentThread>>>) {
        self.listener.watch_map(
            CollectionQuery::all(comments_path(publication_id)),
            |comments: Vec<Comment>| assemble(&comments),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::errors::{AppError, CommentStage};
    use crate::listener::Update;
    use crate::models::{CommentDraft, CommentThread, CreatePublicationRequest, PublicationStatus};
    use crate::services::{test_services, Services};

    async fn publish(services: &Services, author: &str) -> String {
        services
            .publications
            .create(
                author,
                CreatePublicationRequest {
                    description: "¿Por qué mi app crashea?".to_string(),
                    status: PublicationStatus::Help,
                    image_url: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    fn draft(text: &str, parent_id: Option<&str>) -> CommentDraft {
        CommentDraft {
            text: text.to_string(),
            parent_id: parent_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_comment_and_reply_end_to_end() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;

        let a = services
            .comments
            .add_comment(&pid, "ana", draft("Revisa los logs", None))
            .await
            .unwrap();
        assert_eq!(a.comment_count, 1);
        assert!(a.notification_id.is_none());

        let b = services
            .comments
            .add_comment(&pid, "bob", draft("Era un optional", Some(&a.comment.id)))
            .await
            .unwrap();
        assert_eq!(b.comment_count, 2);
        assert!(b.notification_id.is_some());

        let threads = services.comments.threads(&pid).await.unwrap();
        assert_eq!(
            threads,
            vec![CommentThread {
                parent: a.comment.clone(),
                replies: vec![b.comment.clone()],
            }]
        );
        assert_eq!(services.publications.get(&pid).await.unwrap().comment_count, 2);

        let notifications = services.notifications.list_for("ana").await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].sender_uid, "bob");
        assert_eq!(notifications[0].publication_id.as_deref(), Some(pid.as_str()));
        assert_eq!(notifications[0].comment_text.as_deref(), Some("Era un optional"));
        assert!(services.notifications.list_for("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_comment_creates_no_notification() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "carl").await;

        let posted = services
            .comments
            .add_comment(&pid, "carl", draft("Lo resolví", None))
            .await
            .unwrap();

        assert_eq!(posted.comment_count, 1);
        assert!(services.notifications.list_for("carl").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_draft_never_writes() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        let revision = services.store.get_revision_id().await.unwrap();

        let err = services
            .comments
            .add_comment(&pid, "bob", draft(" \n\t", None))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(services.store.get_revision_id().await.unwrap(), revision);
    }

    #[tokio::test]
    async fn test_reply_must_target_existing_root() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;

        let err = services
            .comments
            .add_comment(&pid, "bob", draft("?", Some("nonexistent")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let root = services
            .comments
            .add_comment(&pid, "bob", draft("root", None))
            .await
            .unwrap();
        let reply = services
            .comments
            .add_comment(&pid, "carl", draft("reply", Some(&root.comment.id)))
            .await
            .unwrap();
        let err = services
            .comments
            .add_comment(&pid, "ana", draft("nested", Some(&reply.comment.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(services.publications.get(&pid).await.unwrap().comment_count, 2);
    }

    #[tokio::test]
    async fn test_count_failure_rolls_back_and_returns_draft() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        sqlx::query(
            "CREATE TRIGGER reject_publication_updates BEFORE UPDATE ON nodes
             WHEN NEW.collection = 'publications'
             BEGIN SELECT RAISE(ABORT, 'publication writes rejected'); END",
        )
        .execute(services.store.pool())
        .await
        .unwrap();

        let err = services
            .comments
            .add_comment(&pid, "bob", draft("  hola  ", None))
            .await
            .unwrap_err();

        match err {
            AppError::CommentNotPosted {
                stage, draft_text, ..
            } => {
                assert_eq!(stage, CommentStage::CountIncrement);
                assert_eq!(draft_text, "  hola  ");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(services.comments.comments(&pid).await.unwrap().is_empty());
        assert!(services.notifications.list_for("ana").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_publication() {
        let (services, _dir) = test_services().await;

        let err = services
            .comments
            .add_comment("ghost", "bob", draft("hola", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_root_removes_its_replies() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        let root = services
            .comments
            .add_comment(&pid, "bob", draft("root", None))
            .await
            .unwrap();
        services
            .comments
            .add_comment(&pid, "carl", draft("reply", Some(&root.comment.id)))
            .await
            .unwrap();
        let other = services
            .comments
            .add_comment(&pid, "carl", draft("other", None))
            .await
            .unwrap();

        let count = services
            .comments
            .delete_comment(&pid, &root.comment.id, "bob")
            .await
            .unwrap();

        assert_eq!(count, 1);
        let stored = services.comments.comments(&pid).await.unwrap();
        assert_eq!(stored, vec![other.comment.clone()]);
        assert_eq!(services.publications.get(&pid).await.unwrap().comment_count, 1);
        assert!(matches!(
            services.comments.delete_comment(&pid, &root.comment.id, "bob").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_reply_keeps_root() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        let root = services
            .comments
            .add_comment(&pid, "bob", draft("root", None))
            .await
            .unwrap();
        let reply = services
            .comments
            .add_comment(&pid, "carl", draft("reply", Some(&root.comment.id)))
            .await
            .unwrap();

        // The publication author may moderate
        let count = services
            .comments
            .delete_comment(&pid, &reply.comment.id, "ana")
            .await
            .unwrap();

        assert_eq!(count, 1);
        let threads = services.comments.threads(&pid).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert!(threads[0].replies.is_empty());
    }

    #[tokio::test]
    async fn test_delete_comment_requires_author() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        let root = services
            .comments
            .add_comment(&pid, "bob", draft("root", None))
            .await
            .unwrap();

        let err = services
            .comments
            .delete_comment(&pid, &root.comment.id, "carl")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(services.comments.comments(&pid).await.unwrap().len(), 1);
        assert_eq!(services.publications.get(&pid).await.unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn test_watch_threads_follows_new_comments() {
        let (services, _dir) = test_services().await;
        let pid = publish(&services, "ana").await;
        let (_subscription, mut rx) = services.comments.watch_threads(&pid);

        async fn next(
            rx: &mut tokio::sync::mpsc::UnboundedReceiver<Update<Vec<CommentThread>>>,
        ) -> Vec<CommentThread> {
            timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("closed")
                .expect("listener failed")
        }

        assert!(next(&mut rx).await.is_empty());
        let root = services
            .comments
            .add_comment(&pid, "bob", draft("root", None))
            .await
            .unwrap();

        let threads = next(&mut rx).await;
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id(), root.comment.id);
    }
}
