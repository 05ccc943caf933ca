use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::MessageStore;
use crate::models::{Role, SessionStats, StoredMessage};
use crate::utils::StoreError;

/// Process-local message store.
///
/// Keeps messages in insertion order, which doubles as the tie-break for
/// equal timestamps. Can be switched offline to exercise degraded paths.
/// With a retention set, messages older than it are hidden from reads and
/// purged on the next insert, like the durable store's TTL index.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<StoredMessage>>,
    offline: AtomicBool,
    retention: Option<Duration>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: std::time::Duration) -> Self {
        self.retention = Duration::from_std(retention).ok();
        self
    }

    /// Simulate an outage: every call fails with a connection error until reset
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory store is offline".into()));
        }
        Ok(())
    }

    /// Oldest timestamp still inside the retention period
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.retention.map(|retention| Utc::now() - retention)
    }

    fn session_messages(&self, session_id: &str) -> Vec<StoredMessage> {
        let cutoff = self.cutoff();
        let mut messages: Vec<StoredMessage> = self
            .messages
            .read()
            .iter()
            .filter(|m| m.session_id == session_id && is_live(m, cutoff))
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

fn is_live(message: &StoredMessage, cutoff: Option<DateTime<Utc>>) -> bool {
    cutoff.is_none_or(|cutoff| message.timestamp >= cutoff)
}

/// Number of query terms found in `content`, case-insensitive
fn relevance(content: &str, terms: &[String]) -> usize {
    let content = content.to_lowercase();
    terms.iter().filter(|t| content.contains(t.as_str())).count()
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn find_duplicate(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        self.check_online()?;
        let cutoff = self.cutoff();
        Ok(self
            .messages
            .read()
            .iter()
            .find(|m| {
                m.session_id == session_id
                    && m.role == role
                    && m.content == content
                    && is_live(m, cutoff)
            })
            .cloned())
    }

    async fn insert(&self, message: &StoredMessage) -> Result<(), StoreError> {
        self.check_online()?;
        let cutoff = self.cutoff();
        let mut messages = self.messages.write();
        if cutoff.is_some() {
            messages.retain(|m| is_live(m, cutoff));
        }
        if messages.iter().any(|m| m.message_id == message.message_id) {
            return Ok(());
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.check_online()?;
        let messages = self.session_messages(session_id);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.check_online()?;
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut scored: Vec<(usize, StoredMessage)> = self
            .session_messages(session_id)
            .into_iter()
            .map(|m| (relevance(&m.content, &terms), m))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    async fn delete_session(&self, session_id: &str) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut messages = self.messages.write();
        let before = messages.len();
        messages.retain(|m| m.session_id != session_id);
        Ok((before - messages.len()) as u64)
    }

    async fn session_stats(&self, session_id: &str) -> Result<SessionStats, StoreError> {
        self.check_online()?;
        let messages = self.session_messages(session_id);

        let mut stats = SessionStats::empty(session_id);
        stats.total = messages.len() as u64;
        stats.user_count = messages.iter().filter(|m| m.role == Role::User).count() as u64;
        stats.assistant_count = messages.iter().filter(|m| m.role == Role::Assistant).count() as u64;
        stats.first_timestamp = messages.first().map(|m| m.timestamp);
        stats.last_timestamp = messages.last().map(|m| m.timestamp);
        Ok(stats)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut messages = self.messages.write();
        let before = messages.len();
        messages.retain(|m| m.timestamp >= cutoff);
        Ok((before - messages.len()) as u64)
    }
}
