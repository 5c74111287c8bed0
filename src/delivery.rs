//! Message delivery path and ephemeral-signal relays.
//!
//! Durable storage is the correctness anchor; the live push is a latency
//! optimization. A message is persisted before any relay attempt, and a
//! failed push is logged, never surfaced; durability already succeeded.

use crate::error::SendError;
use crate::protocol::{MessageEnvelope, MessageType, ServerEvent};
use crate::state::AppState;

/// Move one message from sender to receiver.
///
/// Validates, persists through the chat store (whose relationship rules
/// propagate as-is), then best-effort pushes `new_message` to the receiver
/// and `message_sent` back to the sender's own connection. Returns the
/// persisted envelope regardless of live-push outcome.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    receiver_id: &str,
    content: &str,
    message_type: MessageType,
) -> Result<MessageEnvelope, SendError> {
    if receiver_id.trim().is_empty() {
        return Err(SendError::Validation("receiverId is required".to_string()));
    }
    if content.trim().is_empty() {
        return Err(SendError::Validation("content is required".to_string()));
    }

    let message = state
        .store
        .save_message(sender_id, receiver_id, content, message_type)
        .await?;

    let sender_name = state
        .directory
        .display_name(sender_id)
        .await
        .unwrap_or_else(|| sender_id.to_string());

    let pushed = state.registry.send_to(
        receiver_id,
        ServerEvent::NewMessage {
            message: message.clone(),
            sender_name,
            is_from_current_user: false,
        },
    );
    if !pushed {
        tracing::debug!(
            receiver = receiver_id,
            message_id = message.id.as_str(),
            "Receiver not reachable live, stored only"
        );
    }

    // Keeps other tabs/devices of the sender in sync, independent of the
    // API-level acknowledgment already returned to the caller.
    state.registry.send_to(
        sender_id,
        ServerEvent::MessageSent {
            message: message.clone(),
            is_from_current_user: true,
        },
    );

    Ok(message)
}

/// Relay a typing indicator. Dropped silently when the target is offline;
/// the signal is stale the moment they reconnect.
pub fn relay_typing(state: &AppState, from_user_id: &str, to_user_id: &str, is_typing: bool) {
    let forwarded = state.registry.send_to(
        to_user_id,
        ServerEvent::TypingStatus {
            sender_id: from_user_id.to_string(),
            is_typing,
        },
    );
    if !forwarded {
        tracing::trace!(to = to_user_id, "Typing signal dropped, target offline");
    }
}

/// Relay a read receipt. Same drop semantics as typing.
pub fn relay_read_receipt(state: &AppState, from_user_id: &str, to_user_id: &str, message_id: &str) {
    let forwarded = state.registry.send_to(
        to_user_id,
        ServerEvent::MessageRead {
            message_id: message_id.to_string(),
            from: from_user_id.to_string(),
        },
    );
    if !forwarded {
        tracing::trace!(to = to_user_id, "Read receipt dropped, target offline");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::error::StoreError;
    use crate::presence::ClientSender;
    use crate::state::ServerConfig;
    use crate::storage::{MemoryChatStore, MemoryUserDirectory};

    struct Fixture {
        state: AppState,
        store: Arc<MemoryChatStore>,
        directory: Arc<MemoryUserDirectory>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        let state = AppState::new(
            ServerConfig::default(),
            store.clone(),
            directory.clone(),
        );
        Fixture { state, store, directory }
    }

    fn connect(state: &AppState, user_id: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx): (ClientSender, _) = mpsc::unbounded_channel();
        state.registry.register(user_id, tx);
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_end_to_end_send() {
        let f = fixture();
        f.directory.insert("u1", "Uma");
        let mut u1_rx = connect(&f.state, "u1");
        let mut u2_rx = connect(&f.state, "u2");
        drain(&mut u1_rx);
        drain(&mut u2_rx);

        let message = send_message(&f.state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap();
        assert_eq!(message.content, "hi");

        let u2_events = drain(&mut u2_rx);
        assert_eq!(u2_events.len(), 1);
        match &u2_events[0] {
            ServerEvent::NewMessage { message, sender_name, is_from_current_user } => {
                assert_eq!(message.content, "hi");
                assert_eq!(sender_name, "Uma");
                assert!(!*is_from_current_user);
            }
            other => panic!("Expected new_message, got {:?}", other),
        }

        let u1_events = drain(&mut u1_rx);
        assert_eq!(u1_events.len(), 1);
        match &u1_events[0] {
            ServerEvent::MessageSent { message, is_from_current_user } => {
                assert_eq!(message.content, "hi");
                assert!(*is_from_current_user);
            }
            other => panic!("Expected message_sent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture();

        let err = send_message(&f.state, "u1", "", "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));

        let err = send_message(&f.state, "u1", "u2", "  ", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));

        assert_eq!(f.store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_store_rejection_propagates_without_push() {
        let f = fixture();
        f.store.block_pair("u1", "u2");
        let mut u2_rx = connect(&f.state, "u2");
        drain(&mut u2_rx);

        let err = send_message(&f.state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Store(StoreError::NotPermitted(_))));

        // Nothing durable, so nothing was pushed
        assert!(drain(&mut u2_rx).is_empty());
    }

    struct FailingChatStore;

    #[async_trait::async_trait]
    impl crate::storage::ChatStore for FailingChatStore {
        async fn save_message(
            &self,
            _sender_id: &str,
            _receiver_id: &str,
            _content: &str,
            _message_type: MessageType,
        ) -> Result<MessageEnvelope, StoreError> {
            Err(StoreError::Backend("database unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_propagates_without_push() {
        let state = AppState::new(
            ServerConfig::default(),
            Arc::new(FailingChatStore),
            Arc::new(MemoryUserDirectory::new()),
        );
        let mut u2_rx = connect(&state, "u2");
        drain(&mut u2_rx);

        let err = send_message(&state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Store(StoreError::Backend(_))));
        assert!(drain(&mut u2_rx).is_empty());
    }

    #[tokio::test]
    async fn test_durability_wins_over_broken_live_push() {
        let f = fixture();

        // Receiver resolves but their drain task is gone
        let (broken_tx, broken_rx) = mpsc::unbounded_channel();
        f.state.registry.register("u2", broken_tx);
        drop(broken_rx);

        let message = send_message(&f.state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap();
        assert_eq!(message.receiver_id, "u2");
        assert_eq!(f.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_receiver_still_persists_and_acks_sender() {
        let f = fixture();
        let mut u1_rx = connect(&f.state, "u1");
        drain(&mut u1_rx);

        let message = send_message(&f.state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap();
        assert_eq!(f.store.history("u1", "u2").len(), 1);
        assert_eq!(message.status, crate::protocol::MessageStatus::Sent);

        // Sender's own connection still gets the live ack
        let u1_events = drain(&mut u1_rx);
        assert!(matches!(u1_events[0], ServerEvent::MessageSent { .. }));
    }

    #[tokio::test]
    async fn test_unknown_sender_name_falls_back_to_id() {
        let f = fixture();
        let mut u2_rx = connect(&f.state, "u2");
        drain(&mut u2_rx);

        send_message(&f.state, "u1", "u2", "hi", MessageType::Text)
            .await
            .unwrap();

        match &drain(&mut u2_rx)[0] {
            ServerEvent::NewMessage { sender_name, .. } => assert_eq!(sender_name, "u1"),
            other => panic!("Expected new_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typing_relay_and_offline_drop() {
        let f = fixture();
        let mut u2_rx = connect(&f.state, "u2");
        drain(&mut u2_rx);

        relay_typing(&f.state, "u1", "u2", true);
        relay_typing(&f.state, "u1", "u2", false);

        let events = drain(&mut u2_rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ServerEvent::TypingStatus { sender_id, is_typing } => {
                assert_eq!(sender_id, "u1");
                assert!(*is_typing);
            }
            other => panic!("Expected typing_status, got {:?}", other),
        }
        match &events[1] {
            ServerEvent::TypingStatus { is_typing, .. } => assert!(!*is_typing),
            other => panic!("Expected typing_status, got {:?}", other),
        }

        // Offline target: returns without error, relays nothing
        relay_typing(&f.state, "u1", "u-offline", true);
        relay_read_receipt(&f.state, "u1", "u-offline", "m1");
    }

    #[tokio::test]
    async fn test_read_receipt_relay() {
        let f = fixture();
        let mut u1_rx = connect(&f.state, "u1");
        drain(&mut u1_rx);

        relay_read_receipt(&f.state, "u2", "u1", "m-42");

        match &drain(&mut u1_rx)[0] {
            ServerEvent::MessageRead { message_id, from } => {
                assert_eq!(message_id, "m-42");
                assert_eq!(from, "u2");
            }
            other => panic!("Expected message-read, got {:?}", other),
        }
    }
}
