//! Collaborator seams for chat persistence and user lookup.
//!
//! The delivery path only talks to these traits. Relationship rules (who
//! may message whom) belong to the store, not the server; its rejection
//! is propagated to the sender as-is.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::error::StoreError;
use crate::protocol::{MessageEnvelope, MessageStatus, MessageType};

/// Durable chat storage. Messages must be stored before any live-relay
/// attempt: a failed push delays delivery, it never loses the message.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist one message and return the stored envelope.
    /// Per sender→receiver pair, calls are stored in call order.
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<MessageEnvelope, StoreError>;
}

/// Resolves a user id to a display name for enriching pushed messages.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Option<String>;
}

// ── In-Memory Implementations ─────────────────────────────────────────────────

/// In-memory chat store backing the binary and the tests.
///
/// Conversations are keyed by the sorted user pair, so both directions of
/// a chat land in the same insertion-ordered history.
#[derive(Default)]
pub struct MemoryChatStore {
    conversations: DashMap<String, Vec<MessageEnvelope>>,
    blocked_pairs: DashSet<String>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic conversation id from the sorted user pair.
    pub fn conversation_id(a: &str, b: &str) -> String {
        if a <= b {
            format!("{}:{}", a, b)
        } else {
            format!("{}:{}", b, a)
        }
    }

    /// Forbid messaging between two users. Stands in for the relationship
    /// rules a production store enforces (friendship, blocks).
    pub fn block_pair(&self, a: &str, b: &str) {
        self.blocked_pairs.insert(Self::conversation_id(a, b));
    }

    /// All stored messages between two users, in storage order.
    pub fn history(&self, a: &str, b: &str) -> Vec<MessageEnvelope> {
        self.conversations
            .get(&Self::conversation_id(a, b))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.conversations
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<MessageEnvelope, StoreError> {
        let conversation_id = Self::conversation_id(sender_id, receiver_id);

        if self.blocked_pairs.contains(&conversation_id) {
            return Err(StoreError::NotPermitted(format!(
                "'{}' may not message '{}'",
                sender_id, receiver_id
            )));
        }

        let message = MessageEnvelope {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            message_type,
            conversation_id: conversation_id.clone(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        };

        self.conversations
            .entry(conversation_id)
            .or_default()
            .push(message.clone());

        tracing::debug!(
            sender = sender_id,
            receiver = receiver_id,
            message_id = message.id.as_str(),
            "Stored message"
        );

        Ok(message)
    }
}

/// In-memory user directory. Unknown users resolve to `None`; the
/// delivery path falls back to the raw user id.
#[derive(Default)]
pub struct MemoryUserDirectory {
    names: DashMap<String, String>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, display_name: &str) {
        self.names
            .insert(user_id.to_string(), display_name.to_string());
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn display_name(&self, user_id: &str) -> Option<String> {
        self.names.get(user_id).map(|entry| entry.value().clone())
    }
}
