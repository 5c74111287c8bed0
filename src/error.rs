//! Error types shared across the server.

use thiserror::Error;

/// Errors raised by the chat-store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The sender/receiver pair has no permitted relationship
    /// (e.g. not friends, or one side blocked the other).
    #[error("send not permitted: {0}")]
    NotPermitted(String),

    /// The backing store itself failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to the sender of a message.
///
/// Everything else on the delivery path (offline receiver, dead channel)
/// is best-effort and intentionally invisible to the sender.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid message: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the call signaling state machine.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("unknown call '{0}'")]
    UnknownCall(String),

    #[error("call '{0}' already exists")]
    DuplicateCall(String),

    /// The callee already has an active call.
    #[error("callee is busy")]
    Busy,

    #[error("'{user_id}' is not a participant in call '{call_id}'")]
    NotParticipant { call_id: String, user_id: String },

    /// A signal arrived in a phase where it has no meaning
    /// (e.g. an answer before an offer).
    #[error("'{event}' is not valid while call '{call_id}' is in phase {phase}")]
    OutOfOrder {
        call_id: String,
        event: &'static str,
        phase: &'static str,
    },

    /// A signal for a call that already ended. Dropped quietly: late ICE
    /// candidates after a hangup are normal, not a client bug.
    #[error("call '{0}' already ended")]
    Stale(String),
}
