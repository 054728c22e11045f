use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Content type of a message body. The body itself is opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    System,
    Media,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::System => "system",
            ContentType::Media => "media",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ContentType::Text),
            "system" => Some(ContentType::System),
            "media" => Some(ContentType::Media),
            _ => None,
        }
    }
}

/// A committed message row. `seq` is the authoritative per-conversation order.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_user_id: Uuid,
    pub sender_device_id: String,
    pub seq: i64,
    pub content_type: String,
    pub body: String,
    pub client_temp_id: Option<String>,
    pub media_asset_id: Option<Uuid>,
    pub edit_version: i32,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_for_all_at: Option<DateTime<Utc>>,
}

/// One user's reaction to a message; at most one per (message, user).
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_round_trip() {
        assert_eq!(ContentType::parse("text"), Some(ContentType::Text));
        assert_eq!(ContentType::parse("media"), Some(ContentType::Media));
        assert_eq!(ContentType::parse("gif"), None);
        assert_eq!(ContentType::System.as_str(), "system");
    }
}
