use mongodb::{
    bson::doc,
    options::{Acknowledgment, ClientOptions, WriteConcern},
    Client, Database,
};
use std::time::Duration;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::utils::StoreError;

/// Shared MongoDB client plus the configured database handle.
///
/// The driver connects lazily, so building the pool never waits on the
/// server; reachability is checked through `ping`.
#[derive(Clone)]
pub struct MongoPool {
    client: Client,
    database: Database,
}

impl MongoPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.url).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.max_pool_size = Some(config.pool_max_size);
        options.min_pool_size = Some(config.pool_min_size);
        options.max_idle_time = Some(Duration::from_millis(config.max_idle_ms));
        options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));
        options.server_selection_timeout =
            Some(Duration::from_millis(config.server_selection_timeout_ms));
        options.retry_writes = Some(true);
        options.write_concern = Some(WriteConcern::builder().w(Acknowledgment::Majority).build());

        let client = Client::with_options(options)?;
        let database = client.database(&config.name);

        debug!(
            "MongoDB client configured: db={}, pool={}..{}",
            config.name, config.pool_min_size, config.pool_max_size
        );

        Ok(Self { client, database })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
