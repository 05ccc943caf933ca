//! Durable message store
//!
//! - `MessageStore`: the seam the memory façade talks to
//! - `MongoMessageStore`: production adapter (TTL, session and text indexes)
//! - `InMemoryMessageStore`: process-local adapter for development and tests

pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Role, SessionStats, StoredMessage};
use crate::utils::StoreError;

pub use memory::InMemoryMessageStore;
pub use models::MessageDocument;
pub use pool::MongoPool;
pub use repository::MongoMessageStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Cheap round trip used as the connectivity probe
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create retention, session and text indexes
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Existing message with exactly this (session, role, content), if any
    async fn find_duplicate(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError>;

    /// Persist one message. Re-inserting an already stored `message_id` is a no-op.
    async fn insert(&self, message: &StoredMessage) -> Result<(), StoreError>;

    /// Newest `limit` messages of a session, returned oldest first
    async fn recent(&self, session_id: &str, limit: usize)
        -> Result<Vec<StoredMessage>, StoreError>;

    /// Full-text search within a session, best match first
    async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Delete every message of a session, returning how many were removed
    async fn delete_session(&self, session_id: &str) -> Result<u64, StoreError>;

    async fn session_stats(&self, session_id: &str) -> Result<SessionStats, StoreError>;

    /// Delete messages (any session) older than `cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
