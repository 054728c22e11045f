use sqlx::{Pool, Postgres};
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::{ContentType, MessageRecord, ReactionRecord};
use crate::services::conversation_service::ConversationService;
use crate::services::media_client::MediaReadiness;

#[derive(Debug, Clone)]
pub struct SendMessageInput {
    pub conversation_id: Uuid,
    pub sender_user_id: Uuid,
    pub sender_device_id: String,
    pub body: String,
    pub content_type: ContentType,
    pub client_temp_id: Option<String>,
    pub media_asset_id: Option<Uuid>,
    pub client_timestamp_ms: Option<i64>,
}

/// Result of a send. `created` is false when the client temp id matched an
/// already-committed message and the existing row was returned instead.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: MessageRecord,
    pub created: bool,
}

pub struct MessageService;

impl MessageService {
    /// Commit a message with a conversation-scoped contiguous sequence.
    ///
    /// The conversation row is locked for the duration of the transaction so
    /// concurrent senders serialize on seq allocation. A duplicate client
    /// temp id loses the unique-index race and resolves to the winner row.
    pub async fn send_message(
        db: &Pool<Postgres>,
        media: &dyn MediaReadiness,
        input: SendMessageInput,
        max_body_length: usize,
    ) -> AppResult<SendOutcome> {
        // Media sends carry an asset; text and system sends carry a body
        // and never an asset.
        match input.content_type {
            ContentType::Media => {
                if input.media_asset_id.is_none() {
                    return Err(AppError::validation(
                        "INVALID_MEDIA",
                        "media asset is required for media messages",
                    ));
                }
            }
            ContentType::Text | ContentType::System => {
                if input.media_asset_id.is_some() {
                    return Err(AppError::validation(
                        "INVALID_MEDIA",
                        "media asset only allowed for media messages",
                    ));
                }
                if input.body.is_empty() {
                    return Err(AppError::validation("INVALID_BODY", "message body required"));
                }
            }
        }
        if input.body.chars().count() > max_body_length {
            return Err(AppError::validation(
                "INVALID_BODY",
                format!("message body exceeds {max_body_length} characters"),
            ));
        }
        if !ConversationService::is_member(db, input.conversation_id, input.sender_user_id).await? {
            return Err(AppError::NotMember);
        }
        if let Some(asset_id) = input.media_asset_id {
            media.ensure_ready(asset_id, input.sender_user_id).await?;
        }

        // Short-circuit on an already-committed temp id before taking the
        // conversation lock.
        if let Some(existing) = Self::find_by_temp_id(db, &input).await? {
            return Ok(SendOutcome {
                message: existing,
                created: false,
            });
        }

        let mut tx = db.begin().await?;

        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(input.conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::NotFound);
        }

        let (next_seq,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = $1")
                .bind(input.conversation_id)
                .fetch_one(&mut *tx)
                .await?;

        let client_timestamp = input
            .client_timestamp_ms
            .and_then(chrono::DateTime::from_timestamp_millis);

        let inserted = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_user_id, sender_device_id, seq,
                 content_type, body, client_temp_id, media_asset_id, client_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.conversation_id)
        .bind(input.sender_user_id)
        .bind(&input.sender_device_id)
        .bind(next_seq)
        .bind(input.content_type.as_str())
        .bind(&input.body)
        .bind(&input.client_temp_id)
        .bind(input.media_asset_id)
        .bind(client_timestamp)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(message) => {
                sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
                    .bind(input.conversation_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(SendOutcome {
                    message,
                    created: true,
                })
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation() && input.client_temp_id.is_some() =>
            {
                // Lost the idempotency race; the committed winner is the answer.
                tx.rollback().await?;
                match Self::find_by_temp_id(db, &input).await? {
                    Some(winner) => Ok(SendOutcome {
                        message: winner,
                        created: false,
                    }),
                    None => Err(AppError::Conflict("duplicate send raced and vanished".into())),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_temp_id(
        db: &Pool<Postgres>,
        input: &SendMessageInput,
    ) -> AppResult<Option<MessageRecord>> {
        let Some(temp_id) = &input.client_temp_id else {
            return Ok(None);
        };
        let message = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
              AND sender_user_id = $2
              AND sender_device_id = $3
              AND client_temp_id = $4
            "#,
        )
        .bind(input.conversation_id)
        .bind(input.sender_user_id)
        .bind(&input.sender_device_id)
        .bind(temp_id)
        .fetch_optional(db)
        .await?;
        Ok(message)
    }

    pub async fn get_message(
        db: &Pool<Postgres>,
        message_id: Uuid,
    ) -> AppResult<Option<MessageRecord>> {
        let message = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(db)
            .await?;
        Ok(message)
    }

    /// History page before `before_seq` (or the tail), ascending by seq.
    pub async fn list_messages(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> AppResult<Vec<MessageRecord>> {
        if !ConversationService::is_member(db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        let limit = limit.clamp(1, 100);
        let mut rows = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND ($2::BIGINT IS NULL OR seq < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before_seq)
        .bind(limit)
        .fetch_all(db)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Advance the delivery cursor for one device. Cursors never regress:
    /// the stored value is merged with GREATEST, and per-message state is
    /// stamped only for the `(previous, new]` range.
    pub async fn mark_delivered(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        seq: i64,
    ) -> AppResult<i64> {
        if seq < 0 {
            return Err(AppError::validation("INVALID_DELIVERED", "seq must be >= 0"));
        }
        if !ConversationService::is_member(db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }

        let mut tx = db.begin().await?;
        let prev = Self::locked_cursor(&mut tx, conversation_id, user_id, device_id, false).await?;
        let (merged,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_state (user_id, device_id, conversation_id, last_delivered_seq, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, device_id, conversation_id) DO UPDATE SET
                last_delivered_seq = GREATEST(sync_state.last_delivered_seq, EXCLUDED.last_delivered_seq),
                updated_at = NOW()
            RETURNING last_delivered_seq
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(conversation_id)
        .bind(seq)
        .fetch_one(&mut *tx)
        .await?;

        if merged > prev {
            Self::stamp_range(&mut tx, conversation_id, device_id, prev, merged, false).await?;
        }
        Self::clear_retries(&mut tx, conversation_id, device_id, merged).await?;
        tx.commit().await?;
        Ok(merged)
    }

    /// Advance the read cursor. Reading implies delivery, so both cursors
    /// merge forward and the per-message range gets both stamps.
    pub async fn mark_read(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        seq: i64,
    ) -> AppResult<i64> {
        if seq < 0 {
            return Err(AppError::validation("INVALID_READ", "seq must be >= 0"));
        }
        if !ConversationService::is_member(db, conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }

        let mut tx = db.begin().await?;
        let prev = Self::locked_cursor(&mut tx, conversation_id, user_id, device_id, true).await?;
        let (merged,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_state (user_id, device_id, conversation_id,
                                    last_delivered_seq, last_read_seq, updated_at)
            VALUES ($1, $2, $3, $4, $4, NOW())
            ON CONFLICT (user_id, device_id, conversation_id) DO UPDATE SET
                last_delivered_seq = GREATEST(sync_state.last_delivered_seq, EXCLUDED.last_delivered_seq),
                last_read_seq = GREATEST(sync_state.last_read_seq, EXCLUDED.last_read_seq),
                updated_at = NOW()
            RETURNING last_read_seq
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(conversation_id)
        .bind(seq)
        .fetch_one(&mut *tx)
        .await?;

        if merged > prev {
            Self::stamp_range(&mut tx, conversation_id, device_id, prev, merged, true).await?;
        }
        Self::clear_retries(&mut tx, conversation_id, device_id, merged).await?;

        sqlx::query(
            r#"
            UPDATE conversation_members
            SET last_read_seq = GREATEST(COALESCE(last_read_seq, 0), $3)
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(merged)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(merged)
    }

    /// Read and lock the current cursor row so concurrent acks for the same
    /// device serialize. Returns 0 when no row exists yet.
    async fn locked_cursor(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        read: bool,
    ) -> AppResult<i64> {
        let column = if read { "last_read_seq" } else { "last_delivered_seq" };
        let sql = format!(
            r#"
            SELECT {column} FROM sync_state
            WHERE user_id = $1 AND device_id = $2 AND conversation_id = $3
            FOR UPDATE
            "#
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(device_id)
            .bind(conversation_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    async fn stamp_range(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        conversation_id: Uuid,
        device_id: &str,
        from_exclusive: i64,
        to_inclusive: i64,
        read: bool,
    ) -> AppResult<()> {
        // COALESCE keeps the first stamp; re-acks never rewrite timestamps.
        let read_at = if read { "NOW()" } else { "NULL" };
        let sql = format!(
            r#"
            INSERT INTO message_device_states (message_id, device_id, delivered_at, read_at)
            SELECT m.id, $1, NOW(), {read_at}
            FROM messages m
            WHERE m.conversation_id = $2 AND m.seq > $3 AND m.seq <= $4
            ON CONFLICT (message_id, device_id) DO UPDATE SET
                delivered_at = COALESCE(message_device_states.delivered_at, EXCLUDED.delivered_at),
                read_at = COALESCE(message_device_states.read_at, EXCLUDED.read_at)
            "#
        );
        sqlx::query(&sql)
            .bind(device_id)
            .bind(conversation_id)
            .bind(from_exclusive)
            .bind(to_inclusive)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn clear_retries(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        conversation_id: Uuid,
        device_id: &str,
        up_to_seq: i64,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM message_retries r
            USING messages m
            WHERE r.message_id = m.id
              AND r.device_id = $1
              AND m.conversation_id = $2
              AND m.seq <= $3
            "#,
        )
        .bind(device_id)
        .bind(conversation_id)
        .bind(up_to_seq)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Sender-only, text-only edit of a live message. The editor must still
    /// be a member of the conversation.
    pub async fn edit_message(
        db: &Pool<Postgres>,
        message_id: Uuid,
        editor_user_id: Uuid,
        body: &str,
        max_body_length: usize,
    ) -> AppResult<MessageRecord> {
        if body.is_empty() || body.chars().count() > max_body_length {
            return Err(AppError::validation("INVALID_BODY", "invalid message body"));
        }
        let message = Self::get_message(db, message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !ConversationService::is_member(db, message.conversation_id, editor_user_id).await? {
            return Err(AppError::NotMember);
        }
        let updated = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET body = $3, edit_version = edit_version + 1
            WHERE id = $1
              AND sender_user_id = $2
              AND content_type = 'text'
              AND deleted_for_all_at IS NULL
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(editor_user_id)
        .bind(body)
        .fetch_optional(db)
        .await?;
        updated.ok_or_else(|| {
            AppError::forbidden("EDIT_DENIED", "message cannot be edited by this user")
        })
    }

    /// Tombstone a message for everyone. The body is wiped; the row keeps
    /// its seq so cursors and replay ordering stay intact.
    pub async fn delete_message_for_all(
        db: &Pool<Postgres>,
        message_id: Uuid,
        actor_user_id: Uuid,
    ) -> AppResult<MessageRecord> {
        let message = Self::get_message(db, message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !ConversationService::is_member(db, message.conversation_id, actor_user_id).await? {
            return Err(AppError::NotMember);
        }
        let deleted = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET body = '', content_type = 'system', deleted_for_all_at = NOW()
            WHERE id = $1 AND sender_user_id = $2 AND deleted_for_all_at IS NULL
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(actor_user_id)
        .fetch_optional(db)
        .await?;
        deleted.ok_or_else(|| {
            AppError::forbidden("DELETE_DENIED", "message cannot be deleted by this user")
        })
    }

    /// Set or replace the user's single reaction on a message.
    pub async fn set_reaction(
        db: &Pool<Postgres>,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<ReactionRecord> {
        if emoji.is_empty() || emoji.chars().count() > 16 {
            return Err(AppError::validation("REACTION_FAILED", "invalid emoji"));
        }
        let message = Self::get_message(db, message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !ConversationService::is_member(db, message.conversation_id, user_id).await? {
            return Err(AppError::NotMember);
        }
        if message.deleted_for_all_at.is_some() {
            return Err(AppError::validation(
                "REACTION_FAILED",
                "cannot react to a deleted message",
            ));
        }
        let reaction = sqlx::query_as::<_, ReactionRecord>(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id)
                DO UPDATE SET emoji = EXCLUDED.emoji, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_one(db)
        .await?;
        Ok(reaction)
    }

    pub async fn remove_reaction(
        db: &Pool<Postgres>,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<MessageRecord> {
        let message = Self::get_message(db, message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::validation(
                "REACTION_MISSING",
                "no reaction to remove",
            ));
        }
        Ok(message)
    }

    pub async fn list_reactions(
        db: &Pool<Postgres>,
        message_id: Uuid,
    ) -> AppResult<Vec<ReactionRecord>> {
        let rows = sqlx::query_as::<_, ReactionRecord>(
            "SELECT * FROM message_reactions WHERE message_id = $1 ORDER BY reacted_at",
        )
        .bind(message_id)
        .fetch_all(db)
        .await
        .map_err(|e| {
            warn!(error = %e, %message_id, "reaction listing failed");
            e
        })?;
        Ok(rows)
    }
}
