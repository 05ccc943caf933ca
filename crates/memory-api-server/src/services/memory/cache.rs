use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::StoredMessage;
use crate::utils::CacheError;

/// Bounded per-session list of recent messages.
///
/// A session list only comes into existence through `replace` (a refill
/// from the durable store). `push` never creates one, so a list that exists
/// always holds a complete suffix of the session's history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecentCache: Send + Sync {
    /// Prepend to an existing list, trim and refresh TTL.
    /// Returns false when the session has no list yet.
    async fn push(&self, message: &StoredMessage) -> Result<bool, CacheError>;

    /// Newest `count` messages, oldest first. Empty when nothing is cached.
    async fn range(&self, session_id: &str, count: usize)
        -> Result<Vec<StoredMessage>, CacheError>;

    /// Atomically replace the list with `messages` (oldest first)
    async fn replace(&self, session_id: &str, messages: &[StoredMessage])
        -> Result<(), CacheError>;

    async fn evict(&self, session_id: &str) -> Result<(), CacheError>;

    /// Drop every session list under this cache's namespace.
    /// Returns how many lists were removed.
    async fn evict_all(&self) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CachedSession {
    /// Newest first
    messages: VecDeque<StoredMessage>,
    expires_at: Instant,
}

impl CachedSession {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// DashMap-backed cache for single-process deployments and tests
#[derive(Clone)]
pub struct InMemoryRecentCache {
    storage: Arc<DashMap<String, CachedSession>>,
    window: usize,
    ttl: Duration,
}

impl InMemoryRecentCache {
    pub fn new(window: usize, ttl: Duration) -> Self {
        info!("Initializing in-memory recent cache (window={}, ttl={:?})", window, ttl);
        Self {
            storage: Arc::new(DashMap::new()),
            window,
            ttl,
        }
    }

    /// Number of cached sessions, expired ones included until swept
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drop expired sessions. Returns number of sessions removed.
    pub fn cleanup_expired(&self) -> usize {
        let start_len = self.storage.len();
        self.storage.retain(|_, session| !session.is_expired());
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired cached sessions", count);
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            active_sessions: self.storage.len(),
            cached_messages: self.storage.iter().map(|e| e.messages.len()).sum(),
        }
    }
}

#[async_trait]
impl RecentCache for InMemoryRecentCache {
    async fn push(&self, message: &StoredMessage) -> Result<bool, CacheError> {
        let Some(mut entry) = self.storage.get_mut(&message.session_id) else {
            return Ok(false);
        };

        if entry.is_expired() {
            drop(entry); // release shard lock before removing
            self.storage.remove(&message.session_id);
            debug!("Session {} expired, removed from cache", message.session_id);
            return Ok(false);
        }

        entry.messages.push_front(message.clone());
        entry.messages.truncate(self.window);
        entry.expires_at = Instant::now() + self.ttl;
        Ok(true)
    }

    async fn range(
        &self,
        session_id: &str,
        count: usize,
    ) -> Result<Vec<StoredMessage>, CacheError> {
        let Some(entry) = self.storage.get(session_id) else {
            return Ok(Vec::new());
        };

        if entry.is_expired() {
            drop(entry);
            self.storage.remove(session_id);
            debug!("Session {} expired, removed from cache", session_id);
            return Ok(Vec::new());
        }

        let mut messages: Vec<StoredMessage> =
            entry.messages.iter().take(count).cloned().collect();
        messages.reverse();
        Ok(messages)
    }

    async fn replace(
        &self,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), CacheError> {
        if messages.is_empty() {
            self.storage.remove(session_id);
            return Ok(());
        }

        let newest_first: VecDeque<StoredMessage> =
            messages.iter().rev().take(self.window).cloned().collect();
        self.storage.insert(
            session_id.to_string(),
            CachedSession {
                messages: newest_first,
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!("Refilled cache for session {}", session_id);
        Ok(())
    }

    async fn evict(&self, session_id: &str) -> Result<(), CacheError> {
        self.storage.remove(session_id);
        Ok(())
    }

    async fn evict_all(&self) -> Result<u64, CacheError> {
        let removed = self.storage.len() as u64;
        self.storage.clear();
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub active_sessions: usize,
    pub cached_messages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Role};
    use chrono::{TimeZone, Utc};

    fn message(session: &str, content: &str, secs: i64) -> StoredMessage {
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        StoredMessage::new(session, Role::User, content, ts, Metadata::new())
    }

    fn contents(messages: &[StoredMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_push_requires_primed_list() {
        let cache = InMemoryRecentCache::new(5, Duration::from_secs(60));

        assert!(!cache.push(&message("s1", "hi", 0)).await.unwrap());
        assert!(cache.is_empty());

        cache.replace("s1", &[message("s1", "hi", 0)]).await.unwrap();
        assert!(cache.push(&message("s1", "hello", 1)).await.unwrap());

        let cached = cache.range("s1", 10).await.unwrap();
        assert_eq!(contents(&cached), vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn test_window_is_enforced() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(60));
        let seed: Vec<_> = (0..5).map(|i| message("s1", &format!("m{}", i), i)).collect();

        cache.replace("s1", &seed).await.unwrap();
        assert_eq!(contents(&cache.range("s1", 10).await.unwrap()), vec!["m2", "m3", "m4"]);

        cache.push(&message("s1", "m5", 5)).await.unwrap();
        assert_eq!(contents(&cache.range("s1", 10).await.unwrap()), vec!["m3", "m4", "m5"]);
        assert_eq!(contents(&cache.range("s1", 2).await.unwrap()), vec!["m4", "m5"]);
    }

    #[tokio::test]
    async fn test_replace_with_empty_removes_list() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(60));
        cache.replace("s1", &[message("s1", "a", 0)]).await.unwrap();
        cache.replace("s1", &[]).await.unwrap();

        assert!(cache.is_empty());
        assert!(!cache.push(&message("s1", "b", 1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(60));
        cache.replace("s1", &[message("s1", "a", 0)]).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.push(&message("s1", "b", 1)).await.unwrap());

        // push refreshed the TTL
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.range("s1", 10).await.unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.range("s1", 10).await.unwrap().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_and_stats() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(10));
        cache.replace("s1", &[message("s1", "a", 0)]).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache
            .replace("s2", &[message("s2", "b", 0), message("s2", "c", 1)])
            .await
            .unwrap();

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                active_sessions: 1,
                cached_messages: 2
            }
        );
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(60));
        cache.replace("s1", &[message("s1", "a", 0)]).await.unwrap();
        cache.evict("s1").await.unwrap();
        assert!(cache.range("s1", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_all() {
        let cache = InMemoryRecentCache::new(3, Duration::from_secs(60));
        cache.replace("s1", &[message("s1", "a", 0)]).await.unwrap();
        cache.replace("s2", &[message("s2", "b", 0)]).await.unwrap();

        assert_eq!(cache.evict_all().await.unwrap(), 2);
        assert!(cache.is_empty());
        assert!(!cache.push(&message("s1", "c", 1)).await.unwrap());
    }
}
