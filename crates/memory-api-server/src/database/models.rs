use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::models::{Metadata, Role, StoredMessage};
use crate::utils::StoreError;

/// Stored shape of a message in the `enhanced_messages` collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Older documents may predate the field; `_id` stands in for them
    #[serde(default)]
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: BsonDateTime,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<&StoredMessage> for MessageDocument {
    fn from(message: &StoredMessage) -> Self {
        Self {
            id: None,
            message_id: message.message_id.clone(),
            session_id: message.session_id.clone(),
            role: message.role,
            content: message.content.clone(),
            timestamp: to_bson_datetime(message.timestamp),
            metadata: message.metadata.clone(),
        }
    }
}

impl MessageDocument {
    pub fn into_message(self) -> Result<StoredMessage, StoreError> {
        let timestamp = from_bson_datetime(self.timestamp).ok_or_else(|| {
            StoreError::Serialization(format!(
                "timestamp out of range for message in session {}",
                self.session_id
            ))
        })?;

        let message_id = if self.message_id.is_empty() {
            self.id.map(|oid| oid.to_hex()).unwrap_or_default()
        } else {
            self.message_id
        };

        Ok(StoredMessage {
            message_id,
            session_id: self.session_id,
            role: self.role,
            content: self.content,
            timestamp,
            metadata: self.metadata,
        })
    }
}

pub fn to_bson_datetime(ts: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(ts.timestamp_millis())
}

pub fn from_bson_datetime(ts: BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> StoredMessage {
        let mut metadata = Metadata::new();
        metadata.insert("intent".into(), serde_json::json!("greeting"));
        metadata.insert("confidence".into(), serde_json::json!(0.92));
        StoredMessage::new(
            "session-a",
            Role::User,
            "hello there",
            Utc.with_ymd_and_hms(2024, 5, 2, 8, 15, 30).unwrap(),
            metadata,
        )
    }

    #[test]
    fn test_document_conversion_keeps_fields() {
        let message = sample();
        let document = MessageDocument::from(&message);

        assert!(document.id.is_none());
        assert_eq!(document.timestamp.timestamp_millis(), message.timestamp.timestamp_millis());

        let back = document.into_message().unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_bson_layout() {
        let document = MessageDocument::from(&sample());
        let bson = mongodb::bson::to_document(&document).unwrap();

        assert!(!bson.contains_key("_id"));
        assert_eq!(bson.get_str("role").unwrap(), "user");
        assert_eq!(bson.get_str("session_id").unwrap(), "session-a");
        assert!(bson.get_datetime("timestamp").is_ok());
        assert_eq!(
            bson.get_document("metadata").unwrap().get_str("intent").unwrap(),
            "greeting"
        );
    }

    #[test]
    fn test_legacy_document_without_message_id() {
        let oid = ObjectId::new();
        let document = MessageDocument {
            id: Some(oid),
            message_id: String::new(),
            session_id: "s".into(),
            role: Role::Assistant,
            content: "ok".into(),
            timestamp: BsonDateTime::from_millis(1_700_000_000_000),
            metadata: Metadata::new(),
        };

        let message = document.into_message().unwrap();
        assert_eq!(message.message_id, oid.to_hex());
    }
}
