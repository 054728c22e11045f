use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{ConversationRecord, Membership};

pub struct ConversationService;

impl ConversationService {
    /// Find or create the direct conversation between two users.
    pub async fn create_direct(
        db: &Pool<Postgres>,
        creator_id: Uuid,
        other_user_id: Uuid,
    ) -> AppResult<ConversationRecord> {
        if creator_id == other_user_id {
            return Err(AppError::validation(
                "INVALID_BODY",
                "cannot open a direct conversation with yourself",
            ));
        }

        if let Some(existing) = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.* FROM conversations c
            JOIN conversation_members m1 ON m1.conversation_id = c.id AND m1.user_id = $1
            JOIN conversation_members m2 ON m2.conversation_id = c.id AND m2.user_id = $2
            WHERE c.conversation_type = 'dm'
            LIMIT 1
            "#,
        )
        .bind(creator_id)
        .bind(other_user_id)
        .fetch_optional(db)
        .await?
        {
            return Ok(existing);
        }

        let mut tx = db.begin().await?;
        let conversation = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, conversation_type, created_by_user_id)
            VALUES ($1, 'dm', $2)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(creator_id)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in [creator_id, other_user_id] {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, user_id, role)
                VALUES ($1, $2, 'member')
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(conversation)
    }

    pub async fn create_group(
        db: &Pool<Postgres>,
        creator_id: Uuid,
        title: &str,
        member_ids: &[Uuid],
    ) -> AppResult<ConversationRecord> {
        let mut tx = db.begin().await?;
        let conversation = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, conversation_type, title, created_by_user_id)
            VALUES ($1, 'group', $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(creator_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_members (conversation_id, user_id, role)
            VALUES ($1, $2, 'admin')
            "#,
        )
        .bind(conversation.id)
        .bind(creator_id)
        .execute(&mut *tx)
        .await?;

        for user_id in member_ids.iter().filter(|id| **id != creator_id) {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, user_id, role)
                VALUES ($1, $2, 'member')
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(conversation)
    }

    /// Active membership only; users who left are not members.
    pub async fn is_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM conversation_members
            WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(row.is_some())
    }

    pub async fn get_membership(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM conversation_members
            WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(membership)
    }

    /// Conversations the user actively belongs to, used to seed topic
    /// subscriptions at connection open.
    pub async fn list_conversation_ids(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT conversation_id FROM conversation_members
            WHERE user_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn list_conversations(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> AppResult<Vec<ConversationRecord>> {
        let rows = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.* FROM conversations c
            JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.user_id = $1 AND m.left_at IS NULL
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn add_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        if !Self::is_member(db, conversation_id, actor_id).await? {
            return Err(AppError::NotMember);
        }
        sqlx::query(
            r#"
            INSERT INTO conversation_members (conversation_id, user_id, role)
            VALUES ($1, $2, 'member')
            ON CONFLICT (conversation_id, user_id)
                DO UPDATE SET left_at = NULL, joined_at = NOW()
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn leave(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_members SET left_at = NOW()
            WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotMember);
        }
        Ok(())
    }
}
