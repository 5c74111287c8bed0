//! Shared server state.

use std::sync::Arc;

use crate::calls::CallMap;
use crate::presence::PresenceRegistry;
use crate::storage::{ChatStore, UserDirectory};

/// Default seconds a call may ring before the server auto-ends it.
const DEFAULT_CALL_RING_TIMEOUT_SECS: i64 = 45;

/// Default seconds an ended call session is retained before sweeping.
const DEFAULT_ENDED_CALL_RETENTION_SECS: i64 = 60;

/// Default cleanup task interval.
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 15;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub call_ring_timeout_secs: i64,
    pub ended_call_retention_secs: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            call_ring_timeout_secs: DEFAULT_CALL_RING_TIMEOUT_SECS,
            ended_call_retention_secs: DEFAULT_ENDED_CALL_RETENTION_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

/// Everything the handlers need, constructed once at process start and
/// passed in, never reached through globals.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PresenceRegistry>,
    pub calls: Arc<CallMap>,
    pub store: Arc<dyn ChatStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ChatStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            registry: Arc::new(PresenceRegistry::new()),
            calls: Arc::new(CallMap::new(
                config.call_ring_timeout_secs,
                config.ended_call_retention_secs,
            )),
            store,
            directory,
            config,
        }
    }
}
