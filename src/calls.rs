//! Call signaling state machine.
//!
//! Tracks every 1:1 call attempt server-side so out-of-order signals are
//! rejected, a busy callee is refused up front, and a dropped connection
//! ends its calls instead of leaving the counterpart ringing forever. The
//! server relays SDP/ICE verbatim and never touches media.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::CallError;

/// Where a call is in its lifecycle. The server's knowledge stops at
/// `Answered`; "connected" is a client-side media fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Ringing: `incoming-call` forwarded, waiting on accept/reject.
    Requested,
    /// Callee accepted; waiting for the caller's SDP offer.
    Accepted,
    /// Offer forwarded; waiting for the callee's SDP answer.
    Offered,
    /// Answer forwarded; ICE trickling until the clients connect.
    Answered,
    /// Terminal. Retained briefly so late ICE drops quietly, then swept.
    Ended,
}

impl CallPhase {
    pub fn name(self) -> &'static str {
        match self {
            CallPhase::Requested => "requested",
            CallPhase::Accepted => "accepted",
            CallPhase::Offered => "offered",
            CallPhase::Answered => "answered",
            CallPhase::Ended => "ended",
        }
    }
}

/// One call attempt, keyed by the caller-generated call id.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub is_video: bool,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// The other party, or None if the user isn't in this call.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if user_id == self.caller_id {
            Some(&self.callee_id)
        } else if user_id == self.callee_id {
            Some(&self.caller_id)
        } else {
            None
        }
    }

    fn is_active(&self) -> bool {
        self.phase != CallPhase::Ended
    }
}

pub struct CallMap {
    calls: DashMap<String, CallSession>,

    /// Serializes session admission. The busy check spans the whole map,
    /// so check-then-insert must be one step or two concurrent requests
    /// can both ring the same callee.
    admission: Mutex<()>,

    ring_timeout_secs: i64,
    ended_retention_secs: i64,
}

impl CallMap {
    pub fn new(ring_timeout_secs: i64, ended_retention_secs: i64) -> Self {
        Self {
            calls: DashMap::new(),
            admission: Mutex::new(()),
            ring_timeout_secs,
            ended_retention_secs,
        }
    }

    /// Create a session for a new call attempt.
    /// Refuses a reused call id and a callee who is already mid-call.
    pub fn begin(
        &self,
        call_id: &str,
        caller_id: &str,
        callee_id: &str,
        is_video: bool,
    ) -> Result<(), CallError> {
        let _admit = self
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.calls.contains_key(call_id) {
            return Err(CallError::DuplicateCall(call_id.to_string()));
        }
        if self.is_busy(callee_id) {
            return Err(CallError::Busy);
        }

        let session = CallSession {
            call_id: call_id.to_string(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            is_video,
            phase: CallPhase::Requested,
            created_at: Utc::now(),
            ended_at: None,
        };

        tracing::info!(
            call_id = call_id,
            caller = caller_id,
            callee = callee_id,
            is_video = is_video,
            "Call requested"
        );
        self.calls.insert(call_id.to_string(), session);
        Ok(())
    }

    /// Callee accepts a ringing call. Returns the caller id to notify.
    pub fn accept(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        self.advance(call_id, by, "call-accept", Role::Callee, CallPhase::Requested, CallPhase::Accepted)
    }

    /// Callee rejects a ringing call. Terminal. Returns the caller id.
    pub fn reject(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        self.advance(call_id, by, "call-reject", Role::Callee, CallPhase::Requested, CallPhase::Ended)
    }

    /// Caller sends the SDP offer after acceptance. Returns the callee id.
    pub fn offer(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        self.advance(call_id, by, "call-offer", Role::Caller, CallPhase::Accepted, CallPhase::Offered)
    }

    /// Callee sends the SDP answer. Returns the caller id.
    pub fn answer(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        self.advance(call_id, by, "call-answer", Role::Callee, CallPhase::Offered, CallPhase::Answered)
    }

    /// Validate an ICE candidate relay and return the counterpart to
    /// forward it to. Allowed any number of times once an offer exists.
    pub fn ice_target(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        let session = self
            .calls
            .get(call_id)
            .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;

        let peer = session
            .peer_of(by)
            .ok_or_else(|| CallError::NotParticipant {
                call_id: call_id.to_string(),
                user_id: by.to_string(),
            })?
            .to_string();

        match session.phase {
            CallPhase::Offered | CallPhase::Answered => Ok(peer),
            CallPhase::Ended => Err(CallError::Stale(call_id.to_string())),
            phase => Err(CallError::OutOfOrder {
                call_id: call_id.to_string(),
                event: "ice-candidate",
                phase: phase.name(),
            }),
        }
    }

    /// Hang up from any non-ended phase, by either party.
    /// Returns the counterpart to notify.
    pub fn end(&self, call_id: &str, by: &str) -> Result<String, CallError> {
        let mut session = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;

        let peer = session
            .peer_of(by)
            .ok_or_else(|| CallError::NotParticipant {
                call_id: call_id.to_string(),
                user_id: by.to_string(),
            })?
            .to_string();

        if session.phase == CallPhase::Ended {
            return Err(CallError::Stale(call_id.to_string()));
        }

        session.phase = CallPhase::Ended;
        session.ended_at = Some(Utc::now());
        tracing::info!(call_id = call_id, by = by, "Call ended");
        Ok(peer)
    }

    /// End every active call a user participates in (transport disconnect).
    /// Returns `(call_id, counterpart)` pairs so each peer can be told.
    pub fn end_all_for(&self, user_id: &str) -> Vec<(String, String)> {
        // Taken so admission never interleaves with a disconnect sweep
        let _admit = self
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = Utc::now();
        let mut affected = Vec::new();

        for mut entry in self.calls.iter_mut() {
            if !entry.is_active() {
                continue;
            }
            if let Some(peer) = entry.peer_of(user_id) {
                let peer = peer.to_string();
                entry.phase = CallPhase::Ended;
                entry.ended_at = Some(now);
                tracing::info!(
                    call_id = entry.call_id.as_str(),
                    user_id = user_id,
                    "Call ended by disconnect"
                );
                affected.push((entry.call_id.clone(), peer));
            }
        }

        affected
    }

    /// Whether the user has any non-ended call.
    pub fn is_busy(&self, user_id: &str) -> bool {
        self.calls
            .iter()
            .any(|entry| entry.is_active() && entry.peer_of(user_id).is_some())
    }

    pub fn active_count(&self) -> usize {
        self.calls.iter().filter(|entry| entry.is_active()).count()
    }

    /// End calls that are still ringing past the ring timeout.
    /// Returns the expired sessions so both parties can be notified.
    pub fn expire_ringing(&self) -> Vec<CallSession> {
        let now = Utc::now();
        let mut expired = Vec::new();

        for mut entry in self.calls.iter_mut() {
            if entry.phase != CallPhase::Requested {
                continue;
            }
            if now.timestamp() - entry.created_at.timestamp() > self.ring_timeout_secs {
                entry.phase = CallPhase::Ended;
                entry.ended_at = Some(now);
                tracing::info!(call_id = entry.call_id.as_str(), "Ringing call timed out");
                expired.push(entry.clone());
            }
        }

        expired
    }

    /// Drop ended sessions past the retention window. Returns the number
    /// swept. Retention exists so late ICE hits `Stale`, not `UnknownCall`.
    pub fn sweep_ended(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.calls.len();

        self.calls.retain(|_, session| match session.ended_at {
            Some(ended_at) => now - ended_at.timestamp() <= self.ended_retention_secs,
            None => true,
        });

        let swept = before - self.calls.len();
        if swept > 0 {
            tracing::debug!(count = swept, "Swept ended call sessions");
        }
        swept
    }

    /// Guarded transition: the session must exist, `by` must hold the
    /// required role, and the phase must match. Returns the counterpart.
    fn advance(
        &self,
        call_id: &str,
        by: &str,
        event: &'static str,
        role: Role,
        from: CallPhase,
        to: CallPhase,
    ) -> Result<String, CallError> {
        let mut session = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;

        let (expected, counterpart) = match role {
            Role::Caller => (&session.caller_id, &session.callee_id),
            Role::Callee => (&session.callee_id, &session.caller_id),
        };
        if by != expected {
            return Err(CallError::NotParticipant {
                call_id: call_id.to_string(),
                user_id: by.to_string(),
            });
        }
        let counterpart = counterpart.clone();

        if session.phase == CallPhase::Ended {
            return Err(CallError::Stale(call_id.to_string()));
        }
        if session.phase != from {
            return Err(CallError::OutOfOrder {
                call_id: call_id.to_string(),
                event,
                phase: session.phase.name(),
            });
        }

        session.phase = to;
        if to == CallPhase::Ended {
            session.ended_at = Some(Utc::now());
        }
        tracing::debug!(call_id = call_id, event = event, phase = to.name(), "Call advanced");

        Ok(counterpart)
    }
}

/// Which party is allowed to drive a given transition.
#[derive(Debug, Clone, Copy)]
enum Role {
    Caller,
    Callee,
}
