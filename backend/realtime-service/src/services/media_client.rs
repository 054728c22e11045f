use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Readiness check for media attachments. Behind a trait so the router and
/// tests can run without the media store.
#[async_trait]
pub trait MediaReadiness: Send + Sync {
    /// Errors with `INVALID_MEDIA` when the asset is missing, not owned by
    /// the sender, or not yet uploaded.
    async fn ensure_ready(&self, asset_id: Uuid, owner_user_id: Uuid) -> AppResult<()>;
}

pub struct DbMediaClient {
    db: Pool<Postgres>,
}

impl DbMediaClient {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MediaReadiness for DbMediaClient {
    async fn ensure_ready(&self, asset_id: Uuid, owner_user_id: Uuid) -> AppResult<()> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM media_assets
            WHERE id = $1 AND owner_user_id = $2
            "#,
        )
        .bind(asset_id)
        .bind(owner_user_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((status,)) if status == "ready" => Ok(()),
            Some(_) => Err(AppError::validation(
                "INVALID_MEDIA",
                "media asset is not ready",
            )),
            None => Err(AppError::validation(
                "INVALID_MEDIA",
                "media asset not found",
            )),
        }
    }
}

/// Accepts every asset; for tests and deployments without a media store.
pub struct NoopMediaClient;

#[async_trait]
impl MediaReadiness for NoopMediaClient {
    async fn ensure_ready(&self, _asset_id: Uuid, _owner_user_id: Uuid) -> AppResult<()> {
        Ok(())
    }
}
