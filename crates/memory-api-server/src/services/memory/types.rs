use serde::Serialize;
use std::time::Duration;

use super::registry::LifecycleState;
use super::retry::RetryPolicy;
use crate::config::Settings;

/// Tunables the memory façade needs, decoupled from the full `Settings`
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Default history depth and the depth used for prompt context
    pub context_window: usize,
    /// Largest request the fast cache can answer
    pub cache_window: usize,
    pub max_context_chars: usize,
    pub search_limit: usize,
    pub session_idle: Duration,
    pub timeouts: OperationTimeouts,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct OperationTimeouts {
    pub probe: Duration,
    pub lookup: Duration,
    pub write: Duration,
    pub query: Duration,
    pub search: Duration,
    pub cache: Duration,
    pub refill: Duration,
    pub ceiling: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            lookup: Duration::from_secs(5),
            write: Duration::from_secs(8),
            query: Duration::from_secs(12),
            search: Duration::from_secs(10),
            cache: Duration::from_secs(2),
            refill: Duration::from_secs(2),
            ceiling: Duration::from_secs(15),
        }
    }
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            context_window: 100,
            cache_window: 30,
            max_context_chars: 12_000,
            search_limit: 20,
            session_idle: Duration::from_secs(3600),
            timeouts: OperationTimeouts::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&Settings> for MemoryOptions {
    fn from(settings: &Settings) -> Self {
        let t = &settings.timeouts;
        Self {
            context_window: settings.memory.context_window,
            cache_window: settings.cache.window_size,
            max_context_chars: settings.memory.max_context_chars,
            search_limit: settings.memory.search_limit,
            session_idle: Duration::from_secs(settings.memory.session_idle_seconds),
            timeouts: OperationTimeouts {
                probe: Duration::from_millis(t.probe_ms),
                lookup: Duration::from_millis(t.lookup_ms),
                write: Duration::from_millis(t.write_ms),
                query: Duration::from_millis(t.query_ms),
                search: Duration::from_millis(t.search_ms),
                cache: Duration::from_millis(t.cache_ms),
                refill: Duration::from_millis(t.refill_ms),
                ceiling: Duration::from_millis(t.ceiling_ms),
            },
            retry: RetryPolicy::from(t),
        }
    }
}

/// Result of `save_message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted { message_id: String },
    /// Same (session, role, content) already stored; nothing written
    Duplicate { message_id: String },
    /// Durable store unreachable or the write failed; nothing written
    Unavailable,
}

impl SaveOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, SaveOutcome::Unavailable)
    }

    pub fn status(&self) -> &'static str {
        match self {
            SaveOutcome::Inserted { .. } => "inserted",
            SaveOutcome::Duplicate { .. } => "duplicate",
            SaveOutcome::Unavailable => "unavailable",
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            SaveOutcome::Inserted { message_id } | SaveOutcome::Duplicate { message_id } => {
                Some(message_id)
            }
            SaveOutcome::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str, // healthy, degraded, unhealthy
    pub store_connected: bool,
    pub cache_connected: bool,
    /// Store reachable but cache not
    pub degraded: bool,
    pub indexes_created: bool,
    pub state: LifecycleState,
    pub context_strategy: &'static str,
    pub context_window: usize,
    pub cache_window: usize,
    pub active_sessions: usize,
    pub background_tasks: usize,
}
