//! Presence registry.
//!
//! Single source of truth for "is user X reachable right now, and on which
//! connection". One live connection per user: last registration wins, no
//! multi-device fan-out. Entries outlive disconnects as a last-seen cache.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;

/// A connected client's sender channel. Sending fails only when the
/// connection's drain task is gone, which is this layer's transport fault.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
pub struct PresenceRegistry {
    /// User id → sender channel, present iff online.
    online: DashMap<String, ClientSender>,

    /// User id → when they last went offline. Never pruned; this is a
    /// lightweight cache, reset on process restart.
    last_seen: DashMap<String, DateTime<Utc>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a user id to a connection, superseding any prior binding.
    ///
    /// Announces `online` to every other registered connection and replays
    /// the current online set back to the newcomer, so a joining client
    /// sees who is already here without waiting for re-announcements.
    ///
    /// Returns false (and does nothing) for an empty user id.
    pub fn register(&self, user_id: &str, sender: ClientSender) -> bool {
        if user_id.trim().is_empty() {
            tracing::warn!("Ignoring registration with empty user id");
            return false;
        }

        let superseded = self
            .online
            .insert(user_id.to_string(), sender.clone())
            .is_some();
        tracing::info!(user_id = user_id, superseded = superseded, "User registered");

        // Replay the online set to the newcomer
        for entry in self.online.iter() {
            if entry.key() == user_id {
                continue;
            }
            let replay = ServerEvent::Presence {
                user_id: entry.key().clone(),
                online: true,
                last_seen: None,
            };
            if sender.send(replay).is_err() {
                tracing::warn!(user_id = user_id, "Presence replay target already closed");
                break;
            }
        }

        self.broadcast_except(
            user_id,
            ServerEvent::Presence {
                user_id: user_id.to_string(),
                online: true,
                last_seen: None,
            },
        );

        true
    }

    /// Resolve a user id to their live sender, if online. No side effects.
    pub fn resolve(&self, user_id: &str) -> Option<ClientSender> {
        self.online.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    /// Whether this sender is still the live binding for the user.
    /// False once a later registration has superseded it.
    pub fn is_current(&self, user_id: &str, sender: &ClientSender) -> bool {
        self.online
            .get(user_id)
            .map(|entry| entry.value().same_channel(sender))
            .unwrap_or(false)
    }

    /// Clear a user's binding on disconnect, stamp last-seen, and announce
    /// `offline` to everyone remaining.
    ///
    /// No-op (returns false) if the connection never completed registration
    /// or was already superseded by a newer one; a superseded connection
    /// closing must not knock the live one offline.
    pub fn unregister(&self, user_id: &str, sender: &ClientSender) -> bool {
        let removed = self
            .online
            .remove_if(user_id, |_, current| current.same_channel(sender))
            .is_some();
        if !removed {
            return false;
        }

        let now = Utc::now();
        self.last_seen.insert(user_id.to_string(), now);
        tracing::info!(user_id = user_id, "User unregistered");

        self.broadcast_except(
            user_id,
            ServerEvent::Presence {
                user_id: user_id.to_string(),
                online: false,
                last_seen: Some(now),
            },
        );

        true
    }

    /// Send an event to one online user. Returns true if the event was
    /// handed to their channel; false on a routing miss or a dead channel.
    pub fn send_to(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.online.get(user_id) {
            Some(sender) => {
                let ok = sender.send(event).is_ok();
                if !ok {
                    tracing::warn!(user_id = user_id, "Send to stale connection dropped");
                }
                ok
            }
            None => false,
        }
    }

    /// Best-effort fan-out: a dead recipient is logged and skipped, never
    /// aborting delivery to the others.
    pub fn broadcast_except(&self, except_user_id: &str, event: ServerEvent) {
        for entry in self.online.iter() {
            if entry.key() == except_user_id {
                continue;
            }
            if entry.value().send(event.clone()).is_err() {
                tracing::warn!(
                    user_id = entry.key().as_str(),
                    "Broadcast recipient unreachable, skipping"
                );
            }
        }
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.online.iter().map(|entry| entry.key().clone()).collect()
    }

    /// When the user last went offline, if known. None for users that are
    /// online or have never connected since process start.
    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|entry| *entry.value())
    }
}
