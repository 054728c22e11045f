use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Per-(user, device, conversation) delivery cursors. Both cursors only move
/// forward; writes are merged with GREATEST.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub user_id: Uuid,
    pub device_id: String,
    pub conversation_id: Uuid,
    pub last_delivered_seq: i64,
    pub last_read_seq: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
