use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Collection, IndexModel,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{from_bson_datetime, to_bson_datetime, MessageDocument};
use super::pool::MongoPool;
use super::MessageStore;
use crate::models::{Role, SessionStats, StoredMessage};
use crate::utils::StoreError;

const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoMessageStore {
    pool: MongoPool,
    collection: Collection<MessageDocument>,
    retention: Duration,
}

impl MongoMessageStore {
    pub fn new(pool: MongoPool, collection_name: &str, retention: Duration) -> Self {
        let collection = pool.database().collection::<MessageDocument>(collection_name);
        Self {
            pool,
            collection,
            retention,
        }
    }

    pub fn pool(&self) -> &MongoPool {
        &self.pool
    }

    fn index_models(&self) -> Vec<IndexModel> {
        let named = |name: &str| IndexOptions::builder().name(name.to_string()).build();

        vec![
            IndexModel::builder()
                .keys(doc! { "timestamp": 1 })
                .options(
                    IndexOptions::builder()
                        .name("message_ttl_index".to_string())
                        .expire_after(self.retention)
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "session_id": 1, "timestamp": -1 })
                .options(named("session_timestamp_index"))
                .build(),
            IndexModel::builder()
                .keys(doc! { "session_id": 1, "role": 1, "timestamp": -1 })
                .options(named("session_role_timestamp_index"))
                .build(),
            IndexModel::builder()
                .keys(doc! { "content": "text" })
                .options(named("content_search_index"))
                .build(),
            IndexModel::builder()
                .keys(doc! { "message_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name("message_id_unique_index".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
        ]
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn count_field(doc: &Document, key: &str) -> u64 {
    match doc.get(key) {
        Some(Bson::Int32(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Int64(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Double(v)) if *v > 0.0 => *v as u64,
        _ => 0,
    }
}

fn time_field(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    doc.get_datetime(key).ok().and_then(|ts| from_bson_datetime(*ts))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.pool.ping().await
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let mut first_error = None;

        for model in self.index_models() {
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();

            match self.collection.create_index(model).await {
                Ok(_) => debug!("Index {} ready", name),
                Err(e) => {
                    warn!("Failed to create index {}: {}", name, e);
                    if first_error.is_none() {
                        first_error = Some(StoreError::from(e));
                    }
                }
            }
        }

        match first_error {
            None => {
                info!("MongoDB indexes ensured on {}", self.collection.name());
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    async fn find_duplicate(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let filter = doc! {
            "session_id": session_id,
            "role": role.as_str(),
            "content": content,
        };

        self.collection
            .find_one(filter)
            .await?
            .map(MessageDocument::into_message)
            .transpose()
    }

    async fn insert(&self, message: &StoredMessage) -> Result<(), StoreError> {
        match self.collection.insert_one(MessageDocument::from(message)).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                // A retried insert whose first attempt already landed
                debug!("Message {} already stored", message.message_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let cursor = self
            .collection
            .find(doc! { "session_id": session_id })
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(to_limit(limit))
            .await?;

        let mut documents: Vec<MessageDocument> = cursor.try_collect().await?;
        documents.reverse();

        documents
            .into_iter()
            .map(MessageDocument::into_message)
            .collect()
    }

    async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let cursor = self
            .collection
            .find(doc! {
                "session_id": session_id,
                "$text": { "$search": query },
            })
            .projection(doc! { "score": { "$meta": "textScore" } })
            .sort(doc! { "score": { "$meta": "textScore" } })
            .limit(to_limit(limit))
            .await?;

        let documents: Vec<MessageDocument> = cursor.try_collect().await?;
        documents
            .into_iter()
            .map(MessageDocument::into_message)
            .collect()
    }

    async fn delete_session(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = self
            .collection
            .delete_many(doc! { "session_id": session_id })
            .await?;
        Ok(result.deleted_count)
    }

    async fn session_stats(&self, session_id: &str) -> Result<SessionStats, StoreError> {
        let pipeline = vec![
            doc! { "$match": { "session_id": session_id } },
            doc! {
                "$group": {
                    "_id": null,
                    "total": { "$sum": 1 },
                    "user_count": {
                        "$sum": { "$cond": [{ "$eq": ["$role", "user"] }, 1, 0] }
                    },
                    "assistant_count": {
                        "$sum": { "$cond": [{ "$eq": ["$role", "assistant"] }, 1, 0] }
                    },
                    "first_timestamp": { "$min": "$timestamp" },
                    "last_timestamp": { "$max": "$timestamp" },
                }
            },
        ];

        let mut cursor = self.collection.aggregate(pipeline).await?;
        let Some(summary) = cursor.try_next().await? else {
            return Ok(SessionStats::empty(session_id));
        };

        Ok(SessionStats {
            session_id: session_id.to_string(),
            total: count_field(&summary, "total"),
            user_count: count_field(&summary, "user_count"),
            assistant_count: count_field(&summary, "assistant_count"),
            first_timestamp: time_field(&summary, "first_timestamp"),
            last_timestamp: time_field(&summary, "last_timestamp"),
            cache_available: false,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = self
            .collection
            .delete_many(doc! { "timestamp": { "$lt": to_bson_datetime(cutoff) } })
            .await?;
        Ok(result.deleted_count)
    }
}
