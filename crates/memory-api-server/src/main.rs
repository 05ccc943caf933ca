use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use memory_api_server::{
    build_router,
    config::{Settings, StoreBackend},
    database::{InMemoryMessageStore, MessageStore, MongoMessageStore, MongoPool},
    services::memory::{
        ContextBuilder, ConversationMemory, MemoryOptions, RecentCache, RedisRecentCache,
    },
    utils::init_logger,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logger(&settings.logging)?;

    info!("🚀 Starting Memory API Server...");
    info!("✅ Configuration loaded");

    // Durable store
    let (store, mongo_pool): (Arc<dyn MessageStore>, Option<MongoPool>) =
        match settings.database.backend {
            StoreBackend::Mongodb => {
                let pool = MongoPool::new(&settings.database).await?;
                let store = MongoMessageStore::new(
                    pool.clone(),
                    &settings.database.collection,
                    settings.database.retention(),
                );
                info!(
                    "✅ MongoDB client configured ({}/{})",
                    settings.database.name, settings.database.collection
                );
                (Arc::new(store), Some(pool))
            }
            StoreBackend::Memory => {
                warn!("⚠️ Using in-memory message store, messages are lost on restart");
                (
                    Arc::new(
                        InMemoryMessageStore::new().with_retention(settings.database.retention()),
                    ),
                    None,
                )
            }
        };

    // Fast cache
    let cache: Option<Arc<dyn RecentCache>> = if settings.cache.enabled {
        match RedisRecentCache::new(&settings.cache) {
            Ok(cache) => {
                info!("✅ Redis cache configured");
                Some(Arc::new(cache))
            }
            Err(e) => {
                warn!("⚠️ Redis cache disabled: {}", e);
                None
            }
        }
    } else {
        info!("Redis cache disabled by configuration");
        None
    };

    // Memory façade
    let memory = Arc::new(
        ConversationMemory::new(store, cache, MemoryOptions::from(&settings))
            .with_context_builder(ContextBuilder::from_config(&settings.memory)),
    );
    memory.initialize().await;

    // Idle session pruning
    let pruner = {
        let memory = memory.clone();
        let period = Duration::from_secs(settings.memory.session_idle_seconds.max(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let pruned = memory.prune_idle_sessions();
                if pruned > 0 {
                    debug!("Pruned {} idle sessions", pruned);
                }
            }
        })
    };

    // Build router
    let app = build_router(AppState::new(memory.clone(), settings.clone()));

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Shutting down...");
    pruner.abort();
    memory.shutdown().await;
    if let Some(pool) = mongo_pool {
        pool.close().await;
    }
    info!("✅ Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
