use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::MessageRecord;
use crate::services::conversation_service::ConversationService;

pub struct SyncService;

impl SyncService {
    /// Resume one conversation for a reconnecting device.
    ///
    /// The client-reported cursor is merged into the stored one (forward
    /// only), and replay starts from the merged value, so a client claiming
    /// a lower cursor than the server has recorded does not get re-sent
    /// frames it already acked. Replay is bounded by `batch_limit`; the
    /// client follows up with DELIVERY_RECEIPT and reconnects for more.
    pub async fn sync_conversation(
        db: &Pool<Postgres>,
        user_id: Uuid,
        device_id: &str,
        conversation_id: Uuid,
        client_last_delivered_seq: i64,
        batch_limit: i64,
    ) -> AppResult<Vec<MessageRecord>> {
        if !ConversationService::is_member(db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        let claimed = client_last_delivered_seq.max(0);

        let (cursor,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_state (user_id, device_id, conversation_id,
                                    last_delivered_seq, last_sync_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, device_id, conversation_id) DO UPDATE SET
                last_delivered_seq = GREATEST(sync_state.last_delivered_seq, EXCLUDED.last_delivered_seq),
                last_sync_at = NOW(),
                updated_at = NOW()
            RETURNING last_delivered_seq
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(conversation_id)
        .bind(claimed)
        .fetch_one(db)
        .await?;

        let messages = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(cursor)
        .bind(batch_limit.max(1))
        .fetch_all(db)
        .await?;
        Ok(messages)
    }

    /// Delivery cursors for every conversation a device tracks.
    pub async fn device_cursors(
        db: &Pool<Postgres>,
        user_id: Uuid,
        device_id: &str,
    ) -> AppResult<Vec<crate::models::sync::SyncState>> {
        let rows = sqlx::query_as::<_, crate::models::sync::SyncState>(
            r#"
            SELECT * FROM sync_state
            WHERE user_id = $1 AND device_id = $2
            ORDER BY conversation_id
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
