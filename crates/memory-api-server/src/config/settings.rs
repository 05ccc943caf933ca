use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongodb,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_mongo_url")]
    pub url: String,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_min_size")]
    pub pool_min_size: u32,
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,
    /// Messages expire from the store after this many days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Most recent messages kept per session
    #[serde(default = "default_cache_window")]
    pub window_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategyKind {
    Buffer,
    Summary,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    /// Messages considered when assembling prompt context
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_strategy")]
    pub strategy: ContextStrategyKind,
    /// Verbatim turns kept by the summary strategy
    #[serde(default = "default_summary_recent")]
    pub summary_recent_messages: usize,
    #[serde(default = "default_session_idle_seconds")]
    pub session_idle_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
    #[serde(default = "default_lookup_ms")]
    pub lookup_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "default_query_ms")]
    pub query_ms: u64,
    #[serde(default = "default_search_ms")]
    pub search_ms: u64,
    #[serde(default = "default_cache_ms")]
    pub cache_ms: u64,
    #[serde(default = "default_refill_ms")]
    pub refill_ms: u64,
    /// Upper bound for any single façade operation
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_mongo_url(),
            name: default_db_name(),
            collection: default_collection(),
            pool_max_size: default_pool_max_size(),
            pool_min_size: default_pool_min_size(),
            max_idle_ms: default_max_idle_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            window_size: default_cache_window(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_context_chars: default_max_context_chars(),
            search_limit: default_search_limit(),
            strategy: default_strategy(),
            summary_recent_messages: default_summary_recent(),
            session_idle_seconds: default_session_idle_seconds(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_ms: default_probe_ms(),
            lookup_ms: default_lookup_ms(),
            write_ms: default_write_ms(),
            query_ms: default_query_ms(),
            search_ms: default_search_ms(),
            cache_ms: default_cache_ms(),
            refill_ms: default_refill_ms(),
            ceiling_ms: default_ceiling_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

impl DatabaseConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

impl Settings {
    /// Load settings: defaults, then `config/settings.toml` (optional), then
    /// `APP__*` env vars, then the legacy `MONGO_URL`/`DB_NAME`/`REDIS_URL`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("MONGO_URL").ok())?
            .set_override_option("database.name", std::env::var("DB_NAME").ok())?
            .set_override_option("cache.url", std::env::var("REDIS_URL").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.context_window == 0 {
            bail!("memory.context_window must be greater than 0");
        }
        if self.memory.search_limit == 0 {
            bail!("memory.search_limit must be greater than 0");
        }
        if self.cache.window_size == 0 {
            bail!("cache.window_size must be greater than 0");
        }
        if self.cache.ttl_seconds == 0 {
            bail!("cache.ttl_seconds must be greater than 0");
        }
        if self.database.retention_days == 0 {
            bail!("database.retention_days must be greater than 0");
        }
        if self.database.pool_min_size > self.database.pool_max_size {
            bail!(
                "database.pool_min_size ({}) exceeds pool_max_size ({})",
                self.database.pool_min_size,
                self.database.pool_max_size
            );
        }
        if self.timeouts.max_retries > 5 {
            bail!("timeouts.max_retries must be 5 or less");
        }
        if self.timeouts.ceiling_ms == 0 {
            bail!("timeouts.ceiling_ms must be greater than 0");
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_store_backend() -> StoreBackend {
    StoreBackend::Mongodb
}
fn default_mongo_url() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_db_name() -> String {
    "conversation_memory".to_string()
}
fn default_collection() -> String {
    "enhanced_messages".to_string()
}
fn default_pool_max_size() -> u32 {
    25
}
fn default_pool_min_size() -> u32 {
    5
}
fn default_max_idle_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_server_selection_timeout_ms() -> u64 {
    10_000
}
fn default_retention_days() -> u32 {
    30
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "session_messages:".to_string()
}
fn default_cache_window() -> usize {
    30
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_context_window() -> usize {
    100
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_search_limit() -> usize {
    20
}
fn default_strategy() -> ContextStrategyKind {
    ContextStrategyKind::Buffer
}
fn default_summary_recent() -> usize {
    10
}
fn default_session_idle_seconds() -> u64 {
    3600
}
fn default_probe_ms() -> u64 {
    5_000
}
fn default_lookup_ms() -> u64 {
    5_000
}
fn default_write_ms() -> u64 {
    8_000
}
fn default_query_ms() -> u64 {
    12_000
}
fn default_search_ms() -> u64 {
    10_000
}
fn default_cache_ms() -> u64 {
    2_000
}
fn default_refill_ms() -> u64 {
    2_000
}
fn default_ceiling_ms() -> u64 {
    15_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info,memory_api_server=debug".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
