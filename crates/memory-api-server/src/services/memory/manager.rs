use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::background::BackgroundTasks;
use super::cache::RecentCache;
use super::context_builder::{llm_prompt, ContextBuilder, NO_SUMMARY, SUMMARY_UNAVAILABLE};
use super::registry::{LifecycleState, SessionRegistry};
use super::summarizer::{ExtractiveSummarizer, Summarizer};
use super::types::{HealthReport, MemoryOptions, SaveOutcome};
use crate::database::MessageStore;
use crate::models::{Metadata, Role, SessionStats, StoredMessage};
use crate::utils::{CacheError, MemoryError};

/// Entry point for conversation memory.
///
/// Writes go to the durable store first and are mirrored into the fast
/// cache when the session's cache list is primed. Reads that fit the cache
/// window are served from the cache, everything else from the store
/// followed by a background refill. No backend failure escapes: each
/// operation degrades to an empty or zero result within the configured
/// ceiling. Only malformed input is reported as an error.
pub struct ConversationMemory {
    store: Arc<dyn MessageStore>,
    cache: Option<Arc<dyn RecentCache>>,
    context: ContextBuilder,
    summarizer: Arc<dyn Summarizer>,
    options: MemoryOptions,
    registry: Arc<SessionRegistry>,
    background: BackgroundTasks,
    init_lock: Mutex<()>,
}

fn validate_session(session_id: &str) -> Result<(), MemoryError> {
    if session_id.trim().is_empty() {
        return Err(MemoryError::InvalidInput("session_id is required".into()));
    }
    Ok(())
}

fn resolve_limit(limit: Option<usize>, default: usize) -> Result<usize, MemoryError> {
    match limit {
        Some(0) => Err(MemoryError::InvalidInput("limit must be greater than 0".into())),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

impl ConversationMemory {
    pub fn new(
        store: Arc<dyn MessageStore>,
        cache: Option<Arc<dyn RecentCache>>,
        options: MemoryOptions,
    ) -> Self {
        Self {
            store,
            cache,
            context: ContextBuilder::default(),
            summarizer: Arc::new(ExtractiveSummarizer::default()),
            options,
            registry: Arc::new(SessionRegistry::new()),
            background: BackgroundTasks::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        self.registry.state()
    }

    // ===== LIFECYCLE =====

    /// Create indexes, connect the cache and probe the store, each at most
    /// once per process. Always ends READY; failed steps are logged and the
    /// affected features run degraded.
    pub async fn initialize(&self) -> LifecycleState {
        if self.registry.state() == LifecycleState::Ready {
            return LifecycleState::Ready;
        }

        let _guard = self.init_lock.lock().await;
        if self.registry.state() == LifecycleState::Ready {
            return LifecycleState::Ready;
        }

        self.registry.set_state(LifecycleState::Initializing);
        info!("Initializing conversation memory");

        let (_, _, store_ok) =
            tokio::join!(self.init_indexes(), self.init_cache(), self.verify_store());

        self.registry.set_state(LifecycleState::Ready);
        info!(
            store_connected = store_ok,
            cache_connected = self.registry.cache_connected(),
            indexes_created = self.registry.indexes_created(),
            strategy = self.context.strategy_name(),
            "✅ Conversation memory ready"
        );
        LifecycleState::Ready
    }

    /// Forget every once-flag and run initialization again
    pub async fn reinitialize(&self) -> LifecycleState {
        {
            let _guard = self.init_lock.lock().await;
            self.registry.reset();
        }
        self.initialize().await
    }

    /// Cancel outstanding cache refills
    pub async fn shutdown(&self) {
        self.background.shutdown().await;
        info!("Conversation memory shut down");
    }

    /// Wait for outstanding cache refills to finish
    pub async fn wait_background(&self) {
        self.background.wait().await;
    }

    async fn ensure_initialized(&self) {
        if self.registry.state() != LifecycleState::Ready {
            self.initialize().await;
        }
    }

    async fn init_indexes(&self) {
        if !self.registry.claim_index_attempt() {
            return;
        }

        let timeout = self.options.timeouts.write;
        match tokio::time::timeout(timeout, self.store.ensure_indexes()).await {
            Ok(Ok(())) => self.registry.set_indexes_created(true),
            Ok(Err(e)) => warn!("Index creation failed, continuing without: {}", e),
            Err(_) => warn!("Index creation timed out after {:?}", timeout),
        }
    }

    async fn init_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !self.registry.claim_cache_attempt() {
            return;
        }

        let connected = self.probe_cache(cache.as_ref()).await;
        self.registry.set_cache_connected(connected);
        if connected {
            info!("Fast cache connected");
        } else {
            warn!("Fast cache unreachable, serving reads from the durable store only");
        }
    }

    async fn probe_store(&self) -> bool {
        match tokio::time::timeout(self.options.timeouts.probe, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Durable store probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Durable store probe timed out after {:?}", self.options.timeouts.probe);
                false
            }
        }
    }

    async fn probe_cache(&self, cache: &dyn RecentCache) -> bool {
        match tokio::time::timeout(self.options.timeouts.probe, cache.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Cache probe failed: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    /// Connectivity check reused for the process lifetime once it succeeds
    async fn verify_store(&self) -> bool {
        if self.registry.store_verified() {
            return true;
        }
        let ok = self.probe_store().await;
        if ok {
            self.registry.set_store_verified(true);
        }
        ok
    }

    // ===== HELPERS =====

    fn active_cache(&self) -> Option<&Arc<dyn RecentCache>> {
        self.cache
            .as_ref()
            .filter(|_| self.registry.cache_connected())
    }

    async fn within_ceiling<T, Fut>(&self, op: &'static str, fallback: T, work: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let ceiling = self.options.timeouts.ceiling;
        match tokio::time::timeout(ceiling, work).await {
            Ok(value) => value,
            Err(_) => {
                warn!("{} exceeded the {:?} ceiling, degrading", op, ceiling);
                fallback
            }
        }
    }

    async fn cache_call<T, Fut>(&self, op: &'static str, call: Fut) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let after = self.options.timeouts.cache;
        tokio::time::timeout(after, call)
            .await
            .unwrap_or(Err(CacheError::Timeout { op, after }))
    }

    // ===== WRITE PATH =====

    /// Persist one turn. Repeating an identical (session, role, content)
    /// reports success without writing.
    pub async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<SaveOutcome, MemoryError> {
        validate_session(session_id)?;

        let outcome = self
            .within_ceiling(
                "save_message",
                SaveOutcome::Unavailable,
                self.save_inner(session_id, role, content, metadata.unwrap_or_default()),
            )
            .await;
        Ok(outcome)
    }

    async fn save_inner(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> SaveOutcome {
        self.ensure_initialized().await;

        if !self.verify_store().await {
            warn!("Durable store unreachable, message for session {} not saved", session_id);
            return SaveOutcome::Unavailable;
        }

        let store = &self.store;
        let timeouts = self.options.timeouts;
        let retry = self.options.retry;

        match retry
            .run("find_duplicate", timeouts.lookup, move || {
                store.find_duplicate(session_id, role, content)
            })
            .await
        {
            Ok(Some(existing)) => {
                debug!("Duplicate {} message ignored for session {}", role, session_id);
                return SaveOutcome::Duplicate {
                    message_id: existing.message_id,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Duplicate check failed for session {}, inserting anyway: {}",
                session_id, e
            ),
        }

        let message = StoredMessage::new(
            session_id,
            role,
            content,
            self.registry.next_timestamp(session_id),
            metadata,
        );

        let to_insert = &message;
        if let Err(e) = retry
            .run("insert", timeouts.write, move || store.insert(to_insert))
            .await
        {
            error!("Failed to save message for session {}: {}", session_id, e);
            return SaveOutcome::Unavailable;
        }

        self.registry.record_save(session_id);
        self.mirror_to_cache(&message).await;

        debug!("Saved {} message {} for session {}", role, message.message_id, session_id);
        SaveOutcome::Inserted {
            message_id: message.message_id,
        }
    }

    async fn mirror_to_cache(&self, message: &StoredMessage) {
        let Some(cache) = self.active_cache() else {
            return;
        };

        match self.cache_call("push", cache.push(message)).await {
            Ok(true) => debug!("Mirrored message into cache for session {}", message.session_id),
            Ok(false) => debug!(
                "Cache not primed for session {}, skipping mirror",
                message.session_id
            ),
            Err(e) => warn!("Cache mirror failed for session {}: {}", message.session_id, e),
        }
    }

    // ===== READ PATH =====

    /// Newest `limit` messages (default: the context window), oldest first
    pub async fn get_conversation_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>, MemoryError> {
        validate_session(session_id)?;
        let limit = resolve_limit(limit, self.options.context_window)?;

        Ok(self
            .within_ceiling(
                "get_conversation_history",
                Vec::new(),
                self.history_inner(session_id, limit),
            )
            .await)
    }

    async fn history_inner(&self, session_id: &str, limit: usize) -> Vec<StoredMessage> {
        self.ensure_initialized().await;
        self.registry.touch(session_id);

        if limit <= self.options.cache_window {
            if let Some(cache) = self.active_cache() {
                match self.cache_call("range", cache.range(session_id, limit)).await {
                    Ok(messages) if !messages.is_empty() => {
                        debug!("Served {} messages for session {} from cache", messages.len(), session_id);
                        return messages;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Cache read failed for session {}: {}", session_id, e),
                }
            }
        }

        // captured before the read so a write racing the refill is noticed
        let generation = self.registry.generation(session_id);
        let store = &self.store;

        match self
            .options
            .retry
            .run("recent", self.options.timeouts.query, move || {
                store.recent(session_id, limit)
            })
            .await
        {
            Ok(messages) => {
                if !messages.is_empty() {
                    self.schedule_refill(session_id, &messages, limit, generation);
                }
                messages
            }
            Err(e) => {
                warn!("History lookup failed for session {}: {}", session_id, e);
                Vec::new()
            }
        }
    }

    /// Re-prime the session's cache list in the background.
    ///
    /// The list must end up a complete suffix of the session, so a read
    /// narrower than the cache window refetches a full window first. The
    /// refill is skipped if the session was written or cleared meanwhile, and
    /// the list is evicted again if that happened while it was being written.
    fn schedule_refill(
        &self,
        session_id: &str,
        fetched: &[StoredMessage],
        fetched_limit: usize,
        generation: u64,
    ) {
        let Some(cache) = self.active_cache().cloned() else {
            return;
        };

        let window = self.options.cache_window;
        let seed = (fetched_limit >= window)
            .then(|| fetched[fetched.len().saturating_sub(window)..].to_vec());
        let store = self.store.clone();
        let registry = self.registry.clone();
        let refill_timeout = self.options.timeouts.refill;
        let session_id = session_id.to_string();

        self.background.spawn(async move {
            let refill = async {
                let messages = match seed {
                    Some(messages) => messages,
                    None => match store.recent(&session_id, window).await {
                        Ok(messages) => messages,
                        Err(e) => {
                            debug!("Refill read failed for session {}: {}", session_id, e);
                            return;
                        }
                    },
                };

                if messages.is_empty() || registry.generation(&session_id) != generation {
                    debug!("Skipping stale cache refill for session {}", session_id);
                    return;
                }

                match cache.replace(&session_id, &messages).await {
                    Ok(()) => debug!(
                        "Cache refilled for session {} with {} messages",
                        session_id,
                        messages.len()
                    ),
                    Err(e) => warn!("Cache refill failed for session {}: {}", session_id, e),
                }
            };

            if tokio::time::timeout(refill_timeout, refill).await.is_err() {
                warn!("Cache refill for session {} timed out", session_id);
            }

            // A save that landed while `replace` ran found no list to push onto,
            // so the list just written may be missing it.
            if registry.generation(&session_id) != generation {
                debug!("Session {} changed during refill, evicting", session_id);
                match tokio::time::timeout(refill_timeout, cache.evict(&session_id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Eviction after stale refill failed for {}: {}", session_id, e),
                    Err(_) => warn!("Eviction after stale refill timed out for {}", session_id),
                }
            }
        });
    }

    /// Prompt-ready transcript of the session, bounded by `max_chars`
    pub async fn get_context_for_ai(
        &self,
        session_id: &str,
        max_chars: Option<usize>,
    ) -> Result<String, MemoryError> {
        let max_chars = max_chars.unwrap_or(self.options.max_context_chars);
        let history = self
            .get_conversation_history(session_id, Some(self.options.context_window))
            .await?;

        let ceiling = self.options.timeouts.ceiling;
        match tokio::time::timeout(ceiling, self.context.build(&history, max_chars)).await {
            Ok(context) => Ok(context),
            Err(_) => {
                warn!(
                    "{} context strategy exceeded {:?}, using buffer context",
                    self.context.strategy_name(),
                    ceiling
                );
                Ok(ContextBuilder::default().build(&history, max_chars).await)
            }
        }
    }

    /// Prior turns (default: the context window) plus `current_message`,
    /// ending in an open `Assistant:` line
    pub async fn build_prompt(
        &self,
        session_id: &str,
        current_message: &str,
        limit: Option<usize>,
    ) -> Result<String, MemoryError> {
        let history = self.get_conversation_history(session_id, limit).await?;
        debug!(
            "Built prompt with {} previous messages for session {}",
            history.len(),
            session_id
        );
        Ok(llm_prompt(&history, current_message))
    }

    /// Summary of the session's stored turns (up to the context window)
    pub async fn get_session_summary(&self, session_id: &str) -> Result<String, MemoryError> {
        let history = self
            .get_conversation_history(session_id, Some(self.options.context_window))
            .await?;
        if history.is_empty() {
            return Ok(NO_SUMMARY.to_string());
        }

        let ceiling = self.options.timeouts.ceiling;
        match tokio::time::timeout(ceiling, self.summarizer.summarize(&history)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => Ok(summary),
            Ok(Ok(_)) => Ok(NO_SUMMARY.to_string()),
            Ok(Err(e)) => {
                warn!("Summary failed for session {}: {}", session_id, e);
                Ok(SUMMARY_UNAVAILABLE.to_string())
            }
            Err(_) => {
                warn!("Summary for session {} exceeded {:?}", session_id, ceiling);
                Ok(SUMMARY_UNAVAILABLE.to_string())
            }
        }
    }

    /// Full-text search within one session, best match first
    pub async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>, MemoryError> {
        validate_session(session_id)?;
        let limit = resolve_limit(limit, self.options.search_limit)?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let work = async {
            self.ensure_initialized().await;
            let store = &self.store;
            match self
                .options
                .retry
                .run("search", self.options.timeouts.search, move || {
                    store.search(session_id, query, limit)
                })
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Search failed for session {}: {}", session_id, e);
                    Vec::new()
                }
            }
        };

        Ok(self.within_ceiling("search", Vec::new(), work).await)
    }

    // ===== MAINTENANCE =====

    /// Delete the session from both tiers. Returns the durable store's count.
    pub async fn clear_session(&self, session_id: &str) -> Result<u64, MemoryError> {
        validate_session(session_id)?;
        self.registry.invalidate(session_id);

        let delete_from_store = async {
            self.ensure_initialized().await;
            let store = &self.store;
            match self
                .options
                .retry
                .run("delete_session", self.options.timeouts.query, move || {
                    store.delete_session(session_id)
                })
                .await
            {
                Ok(deleted) => {
                    info!("Cleared {} messages for session {}", deleted, session_id);
                    deleted
                }
                Err(e) => {
                    error!("Failed to clear session {} from store: {}", session_id, e);
                    0
                }
            }
        };

        let evict_from_cache = async {
            if let Some(cache) = &self.cache {
                if let Err(e) = self.cache_call("evict", cache.evict(session_id)).await {
                    warn!("Cache eviction failed for session {}: {}", session_id, e);
                }
            }
        };

        let (deleted, ()) = tokio::join!(
            self.within_ceiling("clear_session", 0, delete_from_store),
            evict_from_cache
        );

        // a refill that started during the delete must not repopulate the cache
        self.registry.invalidate(session_id);
        Ok(deleted)
    }

    pub async fn get_stats(&self, session_id: &str) -> Result<SessionStats, MemoryError> {
        validate_session(session_id)?;

        let work = async {
            self.ensure_initialized().await;
            let store = &self.store;
            match self
                .options
                .retry
                .run("session_stats", self.options.timeouts.query, move || {
                    store.session_stats(session_id)
                })
                .await
            {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Stats unavailable for session {}: {}", session_id, e);
                    SessionStats::empty(session_id)
                }
            }
        };

        let mut stats = self
            .within_ceiling("get_stats", SessionStats::empty(session_id), work)
            .await;
        stats.cache_available = self.active_cache().is_some();
        Ok(stats)
    }

    /// Delete messages older than `days` across all sessions
    pub async fn cleanup_old_sessions(&self, days: u32) -> Result<u64, MemoryError> {
        if days == 0 {
            return Err(MemoryError::InvalidInput("days must be greater than 0".into()));
        }
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));

        let work = async {
            self.ensure_initialized().await;
            let store = &self.store;
            match self
                .options
                .retry
                .run("delete_older_than", self.options.timeouts.query, move || {
                    store.delete_older_than(cutoff)
                })
                .await
            {
                Ok(deleted) => {
                    info!("Removed {} messages older than {} days", deleted, days);
                    deleted
                }
                Err(e) => {
                    error!("Cleanup of messages older than {} days failed: {}", days, e);
                    0
                }
            }
        };

        let deleted = self.within_ceiling("cleanup_old_sessions", 0, work).await;
        if deleted > 0 {
            self.evict_all_cached().await;
        }
        Ok(deleted)
    }

    /// Cached lists may still hold messages the store no longer has
    async fn evict_all_cached(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        self.registry.invalidate_all();
        match self.cache_call("evict_all", cache.evict_all()).await {
            Ok(removed) => debug!("Evicted {} cached sessions after cleanup", removed),
            Err(e) => warn!("Cache eviction after cleanup failed: {}", e),
        }
        // refills that read before the delete must not re-prime afterwards
        self.registry.invalidate_all();
    }

    /// Drop registry entries for sessions idle past the configured window
    pub fn prune_idle_sessions(&self) -> usize {
        self.registry.cleanup_idle(self.options.session_idle)
    }

    /// Probe both backends and refresh the cached connectivity flags
    pub async fn health_check(&self) -> HealthReport {
        let cache_probe = async {
            match &self.cache {
                Some(cache) => Some(self.probe_cache(cache.as_ref()).await),
                None => None,
            }
        };
        let (store_connected, cache_probe) = tokio::join!(self.probe_store(), cache_probe);

        self.registry.set_store_verified(store_connected);
        if let Some(connected) = cache_probe {
            self.registry.set_cache_connected(connected);
        }
        let cache_connected = cache_probe.unwrap_or(false);
        let degraded = store_connected && !cache_connected;

        let status = if !store_connected {
            "unhealthy"
        } else if degraded {
            "degraded"
        } else {
            "healthy"
        };

        HealthReport {
            status,
            store_connected,
            cache_connected,
            degraded,
            indexes_created: self.registry.indexes_created(),
            state: self.registry.state(),
            context_strategy: self.context.strategy_name(),
            context_window: self.options.context_window,
            cache_window: self.options.cache_window,
            active_sessions: self.registry.active_sessions(),
            background_tasks: self.background.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryMessageStore, MockMessageStore};
    use crate::services::memory::cache::MockRecentCache;
    use crate::utils::StoreError;
    use std::time::Duration;

    fn options() -> MemoryOptions {
        let mut options = MemoryOptions::default();
        options.retry.base_delay = Duration::from_millis(1);
        options
    }

    fn existing(session: &str, content: &str) -> StoredMessage {
        StoredMessage::new(session, Role::User, content, Utc::now(), Metadata::new())
    }

    #[tokio::test]
    async fn test_save_unavailable_when_probe_fails() {
        let mut store = MockMessageStore::new();
        store.expect_ensure_indexes().returning(|| Ok(()));
        store
            .expect_ping()
            .returning(|| Err(StoreError::Connection("refused".into())));
        store.expect_find_duplicate().never();
        store.expect_insert().never();

        let memory = ConversationMemory::new(Arc::new(store), None, options());
        let outcome = memory
            .save_message("s1", Role::User, "hi", None)
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Unavailable);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_duplicate_skips_insert() {
        let prior = existing("s1", "hi");
        let prior_id = prior.message_id.clone();

        let mut store = MockMessageStore::new();
        store.expect_ensure_indexes().returning(|| Ok(()));
        store.expect_ping().returning(|| Ok(()));
        store
            .expect_find_duplicate()
            .withf(|session, role, content| session == "s1" && *role == Role::User && content == "hi")
            .times(1)
            .returning(move |_, _, _| Ok(Some(prior.clone())));
        store.expect_insert().never();

        let memory = ConversationMemory::new(Arc::new(store), None, options());
        let outcome = memory
            .save_message("s1", Role::User, "hi", None)
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Duplicate { message_id: prior_id });
    }

    #[tokio::test]
    async fn test_failed_duplicate_check_still_inserts() {
        let mut store = MockMessageStore::new();
        store.expect_ensure_indexes().returning(|| Ok(()));
        store.expect_ping().returning(|| Ok(()));
        store
            .expect_find_duplicate()
            .returning(|_, _, _| Err(StoreError::Query("no index".into())));
        store.expect_insert().times(1).returning(|_| Ok(()));

        let memory = ConversationMemory::new(Arc::new(store), None, options());
        let outcome = memory
            .save_message("s1", Role::Assistant, "hello", None)
            .await
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::Inserted { .. }));
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_fail_save() {
        let mut cache = MockRecentCache::new();
        cache.expect_ping().returning(|| Ok(()));
        cache
            .expect_push()
            .times(1)
            .returning(|_| Err(CacheError::Unavailable("connection reset".into())));

        let store = Arc::new(InMemoryMessageStore::new());
        let memory = ConversationMemory::new(store.clone(), Some(Arc::new(cache)), options());

        let outcome = memory
            .save_message("s1", Role::User, "hi", None)
            .await
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::Inserted { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cache_is_bypassed() {
        let mut cache = MockRecentCache::new();
        cache
            .expect_ping()
            .returning(|| Err(CacheError::Unavailable("refused".into())));
        cache.expect_push().never();
        cache.expect_range().never();
        cache.expect_replace().never();

        let store = Arc::new(InMemoryMessageStore::new());
        let memory = ConversationMemory::new(store, Some(Arc::new(cache)), options());

        memory.save_message("s1", Role::User, "hi", None).await.unwrap();
        let history = memory.get_conversation_history("s1", Some(10)).await.unwrap();
        memory.wait_background().await;

        assert_eq!(history.len(), 1);
        let stats = memory.get_stats("s1").await.unwrap();
        assert!(!stats.cache_available);
    }

    #[tokio::test]
    async fn test_large_limit_bypasses_cache_and_refills_window() {
        let mut cache = MockRecentCache::new();
        cache.expect_ping().returning(|| Ok(()));
        cache.expect_push().returning(|_| Ok(false));
        cache.expect_range().never();
        cache
            .expect_replace()
            .withf(|session, messages| session == "s1" && messages.len() == 3)
            .times(1)
            .returning(|_, _| Ok(()));

        let store = Arc::new(InMemoryMessageStore::new());
        let memory = ConversationMemory::new(store, Some(Arc::new(cache)), options());
        for content in ["a", "b", "c"] {
            memory.save_message("s1", Role::User, content, None).await.unwrap();
        }

        let history = memory.get_conversation_history("s1", Some(100)).await.unwrap();
        memory.wait_background().await;
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_index_creation_once_per_initialization() {
        let mut store = MockMessageStore::new();
        store
            .expect_ensure_indexes()
            .times(2)
            .returning(|| Err(StoreError::Query("IndexOptionsConflict".into())));
        store.expect_ping().returning(|| Ok(()));
        store.expect_recent().returning(|_, _| Ok(Vec::new()));

        let memory = ConversationMemory::new(Arc::new(store), None, options());
        assert_eq!(memory.state(), LifecycleState::Uninitialized);

        memory.initialize().await;
        memory.initialize().await;
        memory.get_conversation_history("s1", None).await.unwrap();
        assert_eq!(memory.state(), LifecycleState::Ready);
        assert!(!memory.registry().indexes_created());

        assert_eq!(memory.reinitialize().await, LifecycleState::Ready);
    }

    struct FailingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _messages: &[StoredMessage]) -> anyhow::Result<String> {
            anyhow::bail!("model endpoint unreachable")
        }
    }

    #[tokio::test]
    async fn test_session_summary_fallbacks() {
        let store = Arc::new(InMemoryMessageStore::new());
        let memory = ConversationMemory::new(store, None, options())
            .with_summarizer(Arc::new(FailingSummarizer));

        assert_eq!(memory.get_session_summary("s1").await.unwrap(), NO_SUMMARY);

        memory.save_message("s1", Role::User, "hi", None).await.unwrap();
        assert_eq!(
            memory.get_session_summary("s1").await.unwrap(),
            SUMMARY_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_build_prompt_uses_requested_depth() {
        let store = Arc::new(InMemoryMessageStore::new());
        let memory = ConversationMemory::new(store, None, options());
        for content in ["one", "two", "three"] {
            memory.save_message("s1", Role::User, content, None).await.unwrap();
        }

        let prompt = memory.build_prompt("s1", "four", Some(1)).await.unwrap();
        assert_eq!(prompt, "Previous conversation:\nUser: three\n\nUser: four\nAssistant:");
        assert!(memory.build_prompt("s1", "x", Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_input_rejected_before_backend() {
        let mut store = MockMessageStore::new();
        store.expect_ping().never();
        store.expect_ensure_indexes().never();

        let memory = ConversationMemory::new(Arc::new(store), None, options());

        assert!(memory.save_message("  ", Role::User, "hi", None).await.is_err());
        assert!(memory.get_conversation_history("", None).await.is_err());
        assert!(memory.get_conversation_history("s1", Some(0)).await.is_err());
        assert!(memory.get_context_for_ai("", None).await.is_err());
        assert!(memory.search("", "q", None).await.is_err());
        assert!(memory.clear_session("").await.is_err());
        assert!(memory.get_stats("").await.is_err());
        assert!(memory.cleanup_old_sessions(0).await.is_err());
        assert_eq!(memory.state(), LifecycleState::Uninitialized);
    }
}
