use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{ConversationState, Turn};
use crate::config::SessionConfig;
use crate::models::chat::SessionId;

/// Held for the whole of one exchange; released on drop.
pub type SessionGuard = OwnedMutexGuard<()>;

/// Per-session conversation memory.
///
/// Lookups of unknown ids behave like empty sessions. `append` commits a
/// user/assistant pair as one unit, so readers never observe half an exchange.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Turns of the session, oldest first. Creates the session if absent.
    fn get(&self, session_id: &str) -> Vec<Turn>;

    fn append(&self, session_id: &str, user_text: &str, assistant_text: &str);

    /// Discards all turns. Unknown ids are a no-op.
    fn reset(&self, session_id: &str);

    fn contains(&self, session_id: &str) -> bool;

    /// Serializes exchanges on the same session.
    async fn lock(&self, session_id: &str) -> SessionGuard;

    fn can_create_new_session(&self) -> bool {
        true
    }

    /// Marks the latest exchange of the session as answered by the fallback path.
    fn record_fallback(&self, _session_id: &str) {}
}

/// Thread-safe in-memory conversation cache
/// Uses DashMap for sharded concurrent access
#[derive(Clone)]
pub struct ConversationCache {
    /// Session storage: session_id -> ConversationState
    storage: Arc<DashMap<SessionId, ConversationState>>,

    /// Exchange locks, kept apart from the storage so a reset never frees a held lock
    locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,

    /// Idle time after which a session is discarded
    ttl: Duration,

    /// RAM limit for new sessions, 0 disables the check
    max_memory_percent: f64,

    /// System info for RAM monitoring
    system: Arc<parking_lot::Mutex<System>>,
}

impl ConversationCache {
    pub fn new(ttl: Duration, max_memory_percent: f64) -> Self {
        info!(
            "Initializing conversation cache with DashMap (ttl: {:?}, memory guard: {:.0}%)",
            ttl, max_memory_percent
        );
        Self {
            storage: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            ttl,
            max_memory_percent,
            system: Arc::new(parking_lot::Mutex::new(System::new())),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            Duration::from_secs(config.ttl_seconds),
            config.max_memory_percent,
        )
    }

    /// Snapshot of a session without creating or touching it.
    pub fn peek(&self, session_id: &str) -> Option<ConversationState> {
        let entry = self.storage.get(session_id)?;
        if entry.is_expired(self.ttl) {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Get number of active sessions
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Cleanup expired sessions and their idle locks.
    /// Returns number of sessions removed
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        let start_len = self.storage.len();
        self.storage
            .retain(|_, state: &mut ConversationState| !state.is_expired(ttl));
        let end_len = self.storage.len();

        // A lock still referenced elsewhere belongs to an in-flight exchange.
        let storage = &self.storage;
        self.locks
            .retain(|id, lock| storage.contains_key(id) || Arc::strong_count(lock) > 1);

        let count = start_len.saturating_sub(end_len);
        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    /// Runs `cleanup_expired` every `interval` until the runtime shuts down.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.cleanup_expired();
            }
        })
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        CacheStats {
            active_sessions: self.len(),
            total_turns: self.storage.iter().map(|e| e.turns.len()).sum(),
            memory_usage_mb: sys.used_memory() / 1024 / 1024,
            memory_total_mb: sys.total_memory() / 1024 / 1024,
            memory_usage_percent: usage_percent(sys.used_memory(), sys.total_memory()),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for ConversationCache {
    fn get(&self, session_id: &str) -> Vec<Turn> {
        let mut entry = self
            .storage
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session {}", session_id);
                ConversationState::new(session_id.to_string())
            });

        // Lazy expiry
        if entry.is_expired(self.ttl) {
            debug!("Session {} expired, starting empty", session_id);
            *entry = ConversationState::new(session_id.to_string());
        }

        entry.touch();
        entry.turns.clone()
    }

    fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) {
        let mut entry = self
            .storage
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationState::new(session_id.to_string()));

        entry.turns.push(Turn::user(user_text));
        entry.turns.push(Turn::assistant(assistant_text));
        entry.metadata.total_exchanges += 1;
        entry.touch();

        debug!(
            "Appended exchange to session {} ({} turns)",
            session_id,
            entry.turns.len()
        );
    }

    fn reset(&self, session_id: &str) {
        if self.storage.remove(session_id).is_some() {
            info!("Session {} reset", session_id);
        } else {
            debug!("Reset of unknown session {} ignored", session_id);
        }
    }

    fn contains(&self, session_id: &str) -> bool {
        self.storage
            .get(session_id)
            .map(|state| !state.is_expired(self.ttl))
            .unwrap_or(false)
    }

    async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }

    /// Check if we can create new session (RAM limit)
    fn can_create_new_session(&self) -> bool {
        if self.max_memory_percent <= 0.0 {
            return true;
        }

        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        let used_memory = sys.used_memory();
        let usage = usage_percent(used_memory, total_memory);

        if usage >= self.max_memory_percent {
            warn!(
                "Memory usage at {:.2}% (used: {} MB, total: {} MB), rejecting new session",
                usage,
                used_memory / 1024 / 1024,
                total_memory / 1024 / 1024
            );
            return false;
        }

        debug!("Memory usage: {:.2}%, can create new session", usage);
        true
    }

    fn record_fallback(&self, session_id: &str) {
        if let Some(mut entry) = self.storage.get_mut(session_id) {
            entry.metadata.fallback_exchanges += 1;
        }
    }
}

fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub active_sessions: usize,
    pub total_turns: usize,
    pub memory_usage_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f64,
}
