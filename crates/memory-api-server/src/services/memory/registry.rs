use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::models::message::truncate_to_millis;

/// Façade lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Ready,
            _ => LifecycleState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Initializing => 1,
            LifecycleState::Ready => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionActivity {
    pub first_seen: DateTime<Utc>,
    pub last_activity: Instant,
    pub messages_saved: u64,
    /// Latest timestamp handed out for this session
    pub last_timestamp: DateTime<Utc>,
    /// Bumped by every write or clear; cache refills compare it before and after reading
    pub generation: u64,
}

impl SessionActivity {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_activity: Instant::now(),
            messages_saved: 0,
            last_timestamp: now,
            generation: 0,
        }
    }
}

/// In-process bookkeeping shared by all façade calls.
///
/// Holds the once-per-process setup flags (indexes, cache connection, store
/// probe) and lightweight per-session activity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: AtomicU8,
    indexes_attempted: AtomicBool,
    indexes_created: AtomicBool,
    cache_attempted: AtomicBool,
    cache_connected: AtomicBool,
    store_verified: AtomicBool,
    sessions: DashMap<String, SessionActivity>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// True for the first caller only, until `reset`
    pub fn claim_index_attempt(&self) -> bool {
        !self.indexes_attempted.swap(true, Ordering::AcqRel)
    }

    pub fn claim_cache_attempt(&self) -> bool {
        !self.cache_attempted.swap(true, Ordering::AcqRel)
    }

    pub fn set_indexes_created(&self, created: bool) {
        self.indexes_created.store(created, Ordering::Release);
    }

    pub fn indexes_created(&self) -> bool {
        self.indexes_created.load(Ordering::Acquire)
    }

    pub fn set_cache_connected(&self, connected: bool) {
        self.cache_connected.store(connected, Ordering::Release);
    }

    pub fn cache_connected(&self) -> bool {
        self.cache_connected.load(Ordering::Acquire)
    }

    pub fn set_store_verified(&self, verified: bool) {
        self.store_verified.store(verified, Ordering::Release);
    }

    pub fn store_verified(&self) -> bool {
        self.store_verified.load(Ordering::Acquire)
    }

    /// Clear the once-flags so the next initialization runs every step again
    pub fn reset(&self) {
        self.indexes_attempted.store(false, Ordering::Release);
        self.indexes_created.store(false, Ordering::Release);
        self.cache_attempted.store(false, Ordering::Release);
        self.cache_connected.store(false, Ordering::Release);
        self.store_verified.store(false, Ordering::Release);
        self.set_state(LifecycleState::Uninitialized);
    }

    /// Timestamp for a new message: now, but never earlier than the last one
    /// issued for the same session in this process.
    pub fn next_timestamp(&self, session_id: &str) -> DateTime<Utc> {
        let now = truncate_to_millis(Utc::now());
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionActivity::new(now));

        let ts = now.max(entry.last_timestamp);
        entry.last_timestamp = ts;
        entry.last_activity = Instant::now();
        ts
    }

    pub fn record_save(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.messages_saved += 1;
            entry.generation += 1;
            entry.last_activity = Instant::now();
        }
    }

    pub fn generation(&self, session_id: &str) -> u64 {
        self.sessions.get(session_id).map_or(0, |e| e.generation)
    }

    /// Mark a session's cached view as stale (after a clear)
    pub fn invalidate(&self, session_id: &str) {
        let now = truncate_to_millis(Utc::now());
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionActivity::new(now));
        entry.generation += 1;
        entry.messages_saved = 0;
    }

    /// Mark every known session stale (after a store-wide delete)
    pub fn invalidate_all(&self) {
        for mut entry in self.sessions.iter_mut() {
            entry.generation += 1;
        }
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.last_activity = Instant::now();
        }
    }

    pub fn activity(&self, session_id: &str) -> Option<SessionActivity> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions idle for longer than `max_idle`. Returns number removed.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let start_len = self.sessions.len();
        self.sessions
            .retain(|_, activity| activity.last_activity.elapsed() <= max_idle);
        let count = start_len.saturating_sub(self.sessions.len());

        if count > 0 {
            info!("Pruned {} idle sessions from registry", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_roundtrip() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.state(), LifecycleState::Uninitialized);

        registry.set_state(LifecycleState::Initializing);
        assert_eq!(registry.state(), LifecycleState::Initializing);

        registry.set_state(LifecycleState::Ready);
        assert_eq!(registry.state(), LifecycleState::Ready);
    }

    #[test]
    fn test_claims_are_once_until_reset() {
        let registry = SessionRegistry::new();
        assert!(registry.claim_index_attempt());
        assert!(!registry.claim_index_attempt());
        assert!(registry.claim_cache_attempt());
        assert!(!registry.claim_cache_attempt());

        registry.set_indexes_created(true);
        registry.set_state(LifecycleState::Ready);
        registry.reset();

        assert!(!registry.indexes_created());
        assert_eq!(registry.state(), LifecycleState::Uninitialized);
        assert!(registry.claim_index_attempt());
        assert!(registry.claim_cache_attempt());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let registry = SessionRegistry::new();
        let mut last = registry.next_timestamp("s1");
        for _ in 0..50 {
            let ts = registry.next_timestamp("s1");
            assert!(ts >= last);
            last = ts;
        }
        assert_eq!(last.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_timestamp_clamped_to_previous() {
        let registry = SessionRegistry::new();
        registry.next_timestamp("s1");
        let future = Utc::now() + chrono::Duration::seconds(60);
        registry
            .sessions
            .get_mut("s1")
            .unwrap()
            .last_timestamp = truncate_to_millis(future);

        assert_eq!(registry.next_timestamp("s1"), truncate_to_millis(future));
    }

    #[test]
    fn test_record_save_bumps_generation() {
        let registry = SessionRegistry::new();
        registry.next_timestamp("s1");
        registry.record_save("s1");
        registry.record_save("s1");
        registry.record_save("unknown");

        assert_eq!(registry.activity("s1").unwrap().messages_saved, 2);
        assert_eq!(registry.generation("s1"), 2);
        assert_eq!(registry.generation("unknown"), 0);
        assert_eq!(registry.active_sessions(), 1);
    }

    #[test]
    fn test_invalidate_changes_generation() {
        let registry = SessionRegistry::new();
        let before = registry.generation("s1");
        registry.invalidate("s1");
        assert_ne!(registry.generation("s1"), before);

        registry.next_timestamp("s1");
        registry.record_save("s1");
        let saved = registry.generation("s1");
        registry.invalidate("s1");
        assert_eq!(registry.generation("s1"), saved + 1);
        assert_eq!(registry.activity("s1").unwrap().messages_saved, 0);
    }

    #[test]
    fn test_invalidate_all_bumps_every_session() {
        let registry = SessionRegistry::new();
        registry.next_timestamp("s1");
        registry.next_timestamp("s2");
        let (g1, g2) = (registry.generation("s1"), registry.generation("s2"));

        registry.invalidate_all();
        assert_eq!(registry.generation("s1"), g1 + 1);
        assert_eq!(registry.generation("s2"), g2 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_idle() {
        let registry = SessionRegistry::new();
        registry.next_timestamp("old");
        tokio::time::advance(Duration::from_secs(120)).await;
        registry.next_timestamp("fresh");

        assert_eq!(registry.cleanup_idle(Duration::from_secs(60)), 1);
        assert!(registry.activity("old").is_none());
        assert!(registry.activity("fresh").is_some());
    }
}
