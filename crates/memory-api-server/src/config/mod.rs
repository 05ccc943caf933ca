pub mod settings;

pub use settings::{
    CacheConfig, ContextStrategyKind, DatabaseConfig, LoggingConfig, MemoryConfig, ServerConfig,
    Settings, StoreBackend, TimeoutConfig,
};
