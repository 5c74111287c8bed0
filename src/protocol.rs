//! Wire protocol definitions.
//!
//! The server speaks a simple JSON-over-WebSocket protocol: internally
//! tagged events with camelCase payload fields, matching what the web and
//! mobile clients emit. SDP offers/answers and ICE candidates are opaque
//! JSON values; the server relays them verbatim and never inspects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Client → Server ───────────────────────────────────────────────────────────

/// Events sent from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Bind this connection to a user identity.
    /// Must be sent first after connecting.
    #[serde(rename = "register", rename_all = "camelCase")]
    Register { user_id: String },

    /// Send a chat message. Persisted first, then pushed live if the
    /// receiver is online.
    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        receiver_id: String,
        content: String,
        #[serde(default)]
        message_type: MessageType,
    },

    /// The sender started typing in a conversation.
    #[serde(rename = "typing_start", rename_all = "camelCase")]
    TypingStart { receiver_id: String },

    /// The sender stopped typing.
    #[serde(rename = "typing_stop", rename_all = "camelCase")]
    TypingStop { receiver_id: String },

    /// The sender read a message; relay the receipt to its author.
    #[serde(rename = "message-read", rename_all = "camelCase")]
    MessageRead { to: String, message_id: String },

    /// Start ringing a callee.
    #[serde(rename = "call-request", rename_all = "camelCase")]
    CallRequest {
        to: String,
        call_id: String,
        #[serde(default)]
        is_video: bool,
    },

    /// Callee accepts the incoming call.
    #[serde(rename = "call-accept", rename_all = "camelCase")]
    CallAccept { to: String, call_id: String },

    /// Callee rejects the incoming call.
    #[serde(rename = "call-reject", rename_all = "camelCase")]
    CallReject { to: String, call_id: String },

    /// Caller's SDP offer, relayed verbatim.
    #[serde(rename = "call-offer", rename_all = "camelCase")]
    CallOffer {
        to: String,
        call_id: String,
        offer: Value,
    },

    /// Callee's SDP answer, relayed verbatim.
    #[serde(rename = "call-answer", rename_all = "camelCase")]
    CallAnswer {
        to: String,
        call_id: String,
        answer: Value,
    },

    /// Trickled ICE candidate, either direction, any number of times.
    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        to: String,
        call_id: String,
        candidate: Value,
    },

    /// Hang up, either party, any non-ended phase.
    #[serde(rename = "call-end", rename_all = "camelCase")]
    CallEnd { to: String, call_id: String },

    /// Keep-alive.
    #[serde(rename = "ping")]
    Ping,
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// Events sent from the server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Acknowledgement of successful registration.
    #[serde(rename = "registered", rename_all = "camelCase")]
    Registered { user_id: String },

    /// Presence delta, broadcast on connect/disconnect and replayed to a
    /// newly registered connection for every user already online.
    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        user_id: String,
        online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },

    /// A chat message pushed to its receiver.
    #[serde(rename = "new_message", rename_all = "camelCase")]
    NewMessage {
        message: MessageEnvelope,
        sender_name: String,
        is_from_current_user: bool,
    },

    /// Live-path confirmation pushed back to the sender's own connection,
    /// distinct from the API-level acknowledgment.
    #[serde(rename = "message_sent", rename_all = "camelCase")]
    MessageSent {
        message: MessageEnvelope,
        is_from_current_user: bool,
    },

    /// Typing indicator relayed to the conversation partner.
    #[serde(rename = "typing_status", rename_all = "camelCase")]
    TypingStatus { sender_id: String, is_typing: bool },

    /// Read receipt relayed to the message author.
    #[serde(rename = "message-read", rename_all = "camelCase")]
    MessageRead { message_id: String, from: String },

    /// Ring notification delivered to the callee.
    #[serde(rename = "incoming-call", rename_all = "camelCase")]
    IncomingCall {
        from: String,
        call_id: String,
        is_video: bool,
    },

    #[serde(rename = "call-accepted", rename_all = "camelCase")]
    CallAccepted { call_id: String, from: String },

    #[serde(rename = "call-rejected", rename_all = "camelCase")]
    CallRejected {
        call_id: String,
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "call-offer", rename_all = "camelCase")]
    CallOffer {
        call_id: String,
        from: String,
        offer: Value,
    },

    #[serde(rename = "call-answer", rename_all = "camelCase")]
    CallAnswer {
        call_id: String,
        from: String,
        answer: Value,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        call_id: String,
        from: String,
        candidate: Value,
    },

    #[serde(rename = "call-ended", rename_all = "camelCase")]
    CallEnded {
        call_id: String,
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Error response, delivered only to the originating connection.
    #[serde(rename = "error")]
    Error { message: String },

    /// Keep-alive response.
    #[serde(rename = "pong")]
    Pong,
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// Kind of chat message. Anything the server doesn't recognize collapses
/// to `Other`; the server never interprets content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    #[serde(other)]
    Other,
}

/// Delivery status as tracked client-side. The server stamps `Sent` when
/// the store accepts the message; everything past that is the client's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

/// A persisted chat message as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_serialization() {
        let ev = ClientEvent::Register {
            user_id: "u-alice".to_string(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        assert!(json.contains("\"userId\":\"u-alice\""));

        let parsed: ClientEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientEvent::Register { user_id } => assert_eq!(user_id, "u-alice"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_send_message_serialization() {
        let ev = ClientEvent::SendMessage {
            receiver_id: "u-bob".to_string(),
            content: "hi".to_string(),
            message_type: MessageType::Text,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"send_message\""));
        assert!(json.contains("\"receiverId\":\"u-bob\""));
        assert!(json.contains("\"messageType\":\"text\""));
    }

    #[test]
    fn test_send_message_defaults_to_text() {
        let parsed: ClientEvent = serde_json::from_value(json!({
            "type": "send_message",
            "receiverId": "u-bob",
            "content": "hi",
        }))
        .unwrap();
        match parsed {
            ClientEvent::SendMessage { message_type, .. } => {
                assert_eq!(message_type, MessageType::Text)
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_unknown_message_type_collapses_to_other() {
        let parsed: ClientEvent = serde_json::from_value(json!({
            "type": "send_message",
            "receiverId": "u-bob",
            "content": "...",
            "messageType": "workout_share",
        }))
        .unwrap();
        match parsed {
            ClientEvent::SendMessage { message_type, .. } => {
                assert_eq!(message_type, MessageType::Other)
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_call_events_use_kebab_names() {
        let ev = ClientEvent::CallRequest {
            to: "u-bob".to_string(),
            call_id: "call-1".to_string(),
            is_video: true,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"call-request\""));
        assert!(json.contains("\"callId\":\"call-1\""));
        assert!(json.contains("\"isVideo\":true"));

        let ev = ClientEvent::IceCandidate {
            to: "u-bob".to_string(),
            call_id: "call-1".to_string(),
            candidate: json!({"candidate": "candidate:0 1 UDP ..."}),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"ice-candidate\""));
    }

    #[test]
    fn test_sdp_payload_relayed_as_opaque_json() {
        let offer = json!({"sdpType": "offer", "sdp": "v=0\r\no=- 46117..."});
        let ev = ClientEvent::CallOffer {
            to: "u-bob".to_string(),
            call_id: "call-1".to_string(),
            offer: offer.clone(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let parsed: ClientEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientEvent::CallOffer { offer: parsed_offer, .. } => {
                assert_eq!(parsed_offer, offer)
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_presence_omits_last_seen_when_online() {
        let ev = ServerEvent::Presence {
            user_id: "u-alice".to_string(),
            online: true,
            last_seen: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"presence\""));
        assert!(!json.contains("lastSeen"));

        let ev = ServerEvent::Presence {
            user_id: "u-alice".to_string(),
            online: false,
            last_seen: Some(Utc::now()),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"online\":false"));
        assert!(json.contains("lastSeen"));
    }

    #[test]
    fn test_message_envelope_field_names() {
        let envelope = MessageEnvelope {
            id: "m-1".to_string(),
            sender_id: "u-alice".to_string(),
            receiver_id: "u-bob".to_string(),
            content: "hi".to_string(),
            message_type: MessageType::Text,
            conversation_id: "u-alice:u-bob".to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        };
        let ev = ServerEvent::NewMessage {
            message: envelope,
            sender_name: "Alice".to_string(),
            is_from_current_user: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"new_message\""));
        assert!(json.contains("\"senderId\":\"u-alice\""));
        assert!(json.contains("\"conversationId\""));
        assert!(json.contains("\"status\":\"sent\""));
        assert!(json.contains("\"isFromCurrentUser\":false"));
    }

    #[test]
    fn test_all_client_event_variants_round_trip() {
        let events = vec![
            ClientEvent::Register { user_id: "u1".to_string() },
            ClientEvent::SendMessage {
                receiver_id: "u2".to_string(),
                content: "hello".to_string(),
                message_type: MessageType::Text,
            },
            ClientEvent::TypingStart { receiver_id: "u2".to_string() },
            ClientEvent::TypingStop { receiver_id: "u2".to_string() },
            ClientEvent::MessageRead {
                to: "u2".to_string(),
                message_id: "m1".to_string(),
            },
            ClientEvent::CallRequest {
                to: "u2".to_string(),
                call_id: "c1".to_string(),
                is_video: false,
            },
            ClientEvent::CallAccept { to: "u1".to_string(), call_id: "c1".to_string() },
            ClientEvent::CallReject { to: "u1".to_string(), call_id: "c1".to_string() },
            ClientEvent::CallOffer {
                to: "u2".to_string(),
                call_id: "c1".to_string(),
                offer: json!({"sdp": "..."}),
            },
            ClientEvent::CallAnswer {
                to: "u1".to_string(),
                call_id: "c1".to_string(),
                answer: json!({"sdp": "..."}),
            },
            ClientEvent::IceCandidate {
                to: "u2".to_string(),
                call_id: "c1".to_string(),
                candidate: json!({"candidate": "..."}),
            },
            ClientEvent::CallEnd { to: "u2".to_string(), call_id: "c1".to_string() },
            ClientEvent::Ping,
        ];

        for ev in events {
            let json = serde_json::to_string(&ev).unwrap();
            let parsed: ClientEvent = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2, "Round-trip failed for: {}", json);
        }
    }

    #[test]
    fn test_malformed_envelope_fails_to_parse() {
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
        assert!(serde_json::from_str::<ClientEvent>("{\"type\":\"launch_missiles\"}").is_err());
        // Missing required field
        assert!(serde_json::from_str::<ClientEvent>("{\"type\":\"register\"}").is_err());
    }
}
