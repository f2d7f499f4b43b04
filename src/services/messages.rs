//! Direct messages.
//!
//! A conversation lives at `conversations/{a}_{b}` where `a` and `b` are the
//! participant uids in sorted order, so both sides resolve the same record.
//! Messages live under `messages/{conversationId}`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{decode_node, encode, UserDirectory};
use crate::counter::{CounterMutator, CounterRef, Delta};
use crate::errors::AppError;
use crate::listener::{read_snapshot, CollectionListener, CollectionQuery, Subscription, Update};
use crate::models::{now_timestamp, Conversation, Message, SendMessageRequest};
use crate::store::{Node, Store};

const CONVERSATIONS: &str = "conversations";

fn messages_path(conversation_id: &str) -> String {
    format!("messages/{}", conversation_id)
}

fn involving(uid: &str) -> CollectionQuery {
    CollectionQuery::all(CONVERSATIONS).where_contains("participantUids", uid)
}

/// Conversation key for two participants, independent of who writes first.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

#[derive(Clone)]
pub struct MessageService {
    store: Store,
    users: UserDirectory,
    counters: CounterMutator,
    listener: CollectionListener,
}

impl MessageService {
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

    /// Send a message, creating the conversation on first contact.
    pub async fn send_message(
        &self,
        sender_uid: &str,
        request: SendMessageRequest,
    ) -> Result<Message, AppError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Message text is required".to_string()));
        }
        if request.recipient_uid == sender_uid {
            return Err(AppError::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }

        let sender = self.users.require_profile(sender_uid).await?;
        let recipient = self.users.require_profile(&request.recipient_uid).await?;
        let conversation = self
            .find_or_create(
                &sender.uid,
                &sender.username,
                &recipient.uid,
                &recipient.username,
            )
            .await?;

        let message = Message {
            id: self.store.new_key(),
            conversation_id: conversation.id.clone(),
            sender_uid: sender.uid,
            sender_username: sender.username,
            recipient_uid: recipient.uid,
            text: text.to_string(),
            created_at: now_timestamp(),
            is_read: false,
        };
        self.store
            .create_child(&messages_path(&conversation.id), &message.id, &encode(&message)?)
            .await?;

        // The message is stored; the conversation preview may lag behind
        let mut fields = Map::new();
        fields.insert("lastMessageText".to_string(), Value::from(message.text.as_str()));
        fields.insert(
            "lastMessageTimestamp".to_string(),
            Value::from(message.created_at),
        );
        if let Err(e) = self
            .store
            .update_fields(CONVERSATIONS, &conversation.id, fields, None)
            .await
        {
            tracing::warn!(conversation = %conversation.id, "Conversation preview not updated: {}", e);
        }
        let unread = CounterRef::unread(&conversation.id, &message.recipient_uid);
        if let Err(e) = self.counters.adjust(&unread, Delta::Increment).await {
            tracing::warn!(counter = %unread, "Unread count not incremented: {}", e);
        }

        tracing::debug!(conversation = %conversation.id, message = %message.id, "Message sent");
        Ok(message)
    }

    async fn find_or_create(
        &self,
        sender_uid: &str,
        sender_username: &str,
        recipient_uid: &str,
        recipient_username: &str,
    ) -> Result<Conversation, AppError> {
        let id = conversation_id(sender_uid, recipient_uid);
        if let Some(node) = self.store.get_child(CONVERSATIONS, &id).await? {
            return decode_node(CONVERSATIONS, node);
        }

        let (participant_uids, participant_usernames) = if sender_uid <= recipient_uid {
            (
                vec![sender_uid.to_string(), recipient_uid.to_string()],
                vec![sender_username.to_string(), recipient_username.to_string()],
            )
        } else {
            (
                vec![recipient_uid.to_string(), sender_uid.to_string()],
                vec![recipient_username.to_string(), sender_username.to_string()],
            )
        };
        let conversation = Conversation {
            id: id.clone(),
            participant_uids,
            participant_usernames,
            last_message_text: None,
            last_message_timestamp: now_timestamp(),
            unread_counts: BTreeMap::new(),
        };

        match self
            .store
            .create_child(CONVERSATIONS, &id, &encode(&conversation)?)
            .await
        {
            Ok(_) => {
                tracing::info!(conversation = %id, "Conversation started");
                Ok(conversation)
            }
            // The other side started it first
            Err(AppError::Conflict { .. }) => {
                let node = self
                    .store
                    .get_child(CONVERSATIONS, &id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?;
                decode_node(CONVERSATIONS, node)
            }
            Err(e) => Err(e),
        }
    }

    /// Conversations `uid` takes part in, most recent activity first.
    pub async fn conversations_for(&self, uid: &str) -> Result<Vec<Conversation>, AppError> {
        read_snapshot(&self.store, &involving(uid)).await
    }

    /// Messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        read_snapshot(&self.store, &CollectionQuery::all(messages_path(conversation_id))).await
    }

    pub fn watch_conversations(
        &self,
        uid: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<Conversation>>>) {
        self.listener.watch(involving(uid))
    }

    pub fn watch_messages(
        &self,
        conversation_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Update<Vec<Message>>>) {
        self.listener
            .watch(CollectionQuery::all(messages_path(conversation_id)))
    }

    /// Mark a message read as its recipient and lower their unread count.
    /// Only the call that flips `isRead` decrements.
    pub async fn mark_message_read(
        &self,
        conversation_id: &str,
        message_id: &str,
        reader_uid: &str,
    ) -> Result<Message, AppError> {
        let path = messages_path(conversation_id);
        let node = self.require_message(&path, message_id).await?;
        let version = node.version;
        let message: Message = decode_node(&path, node)?;
        if message.recipient_uid != reader_uid {
            return Err(AppError::Unauthorized(
                "Only the recipient can mark a message read".to_string(),
            ));
        }
        if message.is_read {
            return Ok(message);
        }

        let mut fields = Map::new();
        fields.insert("isRead".to_string(), Value::Bool(true));
        let node = match self
            .store
            .update_fields(&path, message_id, fields, Some(version))
            .await
        {
            Ok(node) => node,
            // Someone else flipped it in between
            Err(AppError::Conflict { .. }) => {
                let current: Message =
                    decode_node(&path, self.require_message(&path, message_id).await?)?;
                if current.is_read {
                    return Ok(current);
                }
                return Err(AppError::Conflict {
                    message: format!("Message {} changed while marking it read", message_id),
                    current_version: version,
                });
            }
            Err(e) => return Err(e),
        };

        let unread = CounterRef::unread(conversation_id, reader_uid);
        if let Err(e) = self.counters.adjust(&unread, Delta::Decrement).await {
            tracing::warn!(counter = %unread, "Unread count not decremented: {}", e);
        }
        decode_node(&path, node)
    }

    async fn require_message(
        &self,
        path: &str,
        message_id: &str,
    ) -> Result<Node, AppError> {
        self.store
            .get_child(path, message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))
    }
}
