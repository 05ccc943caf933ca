//! Hybrid conversation memory
//!
//! Provides persistent conversation history with:
//! - Durable store as the source of truth (see `crate::database`)
//! - Bounded per-session fast cache (Redis or in-process DashMap)
//! - Per-call timeouts, bounded retries and a ceiling per operation
//! - Prompt context assembly with pluggable buffer/summary strategies

mod background;
pub mod cache;
mod context_builder;
pub mod manager;
pub mod redis_cache;
pub mod registry;
pub mod retry;
pub mod summarizer;
pub mod types;

pub use background::BackgroundTasks;
pub use cache::{CacheStats, InMemoryRecentCache, RecentCache};
pub use context_builder::{
    llm_prompt, BufferStrategy, ContextBuilder, ContextStrategy, SummaryStrategy,
    CONTEXT_FOOTER, CONTEXT_HEADER, CONTEXT_OVERHEAD, NO_CONTEXT, NO_SUMMARY,
    SUMMARY_UNAVAILABLE,
};
pub use manager::ConversationMemory;
pub use redis_cache::RedisRecentCache;
pub use registry::{LifecycleState, SessionRegistry};
pub use retry::RetryPolicy;
pub use summarizer::{ExtractiveSummarizer, Summarizer};
pub use types::{HealthReport, MemoryOptions, OperationTimeouts, SaveOutcome};
