use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::cache::RecentCache;
use crate::config::CacheConfig;
use crate::models::StoredMessage;
use crate::utils::CacheError;

/// Keys requested per SCAN round trip
const SCAN_BATCH: usize = 500;

/// Redis list per session, newest message at the head.
///
/// The multiplexed connection is opened on first use and shared by every
/// caller afterwards.
pub struct RedisRecentCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    window: usize,
    ttl_seconds: u64,
}

impl RedisRecentCache {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: config.key_prefix.clone(),
            window: config.window_size,
            ttl_seconds: config.ttl_seconds,
        })
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }

    /// LTRIM stop index keeping `window` entries
    fn trim_stop(&self) -> isize {
        isize::try_from(self.window).unwrap_or(isize::MAX) - 1
    }

    async fn conn(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = self.client.get_connection_manager().await?;
                info!("Redis connection manager established");
                Ok::<_, CacheError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

fn encode(message: &StoredMessage) -> Result<String, CacheError> {
    Ok(serde_json::to_string(message)?)
}

#[async_trait]
impl RecentCache for RedisRecentCache {
    async fn push(&self, message: &StoredMessage) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let key = self.key(&message.session_id);

        let (length,): (i64,) = redis::pipe()
            .atomic()
            .cmd("LPUSHX")
            .arg(&key)
            .arg(encode(message)?)
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(self.trim_stop())
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(length > 0)
    }

    async fn range(
        &self,
        session_id: &str,
        count: usize,
    ) -> Result<Vec<StoredMessage>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key(session_id))
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<StoredMessage>(&entry) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping unreadable cache entry for {}: {}", session_id, e),
            }
        }
        messages.reverse();
        Ok(messages)
    }

    async fn replace(
        &self,
        session_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let key = self.key(session_id);

        let skip = messages.len().saturating_sub(self.window);
        let encoded = messages[skip..]
            .iter()
            .map(encode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&key).ignore();
        if !encoded.is_empty() {
            // LPUSH of oldest..newest leaves the newest at the head
            pipe.cmd("LPUSH")
                .arg(&key)
                .arg(encoded)
                .ignore()
                .cmd("LTRIM")
                .arg(&key)
                .arg(0)
                .arg(self.trim_stop())
                .ignore()
                .cmd("EXPIRE")
                .arg(&key)
                .arg(self.ttl_seconds)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!("Refilled Redis list {} with {} messages", key, messages.len() - skip);
        Ok(())
    }

    async fn evict(&self, session_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(self.key(session_id))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn evict_all(&self) -> Result<u64, CacheError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Evicted {} Redis lists matching {}", removed, pattern);
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(CacheError::Unavailable(format!("unexpected PING reply: {}", reply)));
        }
        Ok(())
    }
}
