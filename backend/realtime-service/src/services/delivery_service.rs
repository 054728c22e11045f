use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::websocket::PresenceTracker;

/// Redelivery bookkeeping for messages that outran a device.
///
/// A retry row is enqueued per (message, offline device) at send time and
/// deleted when a receipt covers the message's seq, or when the device is
/// seen online again. The sweeper walks due rows, reschedules them with
/// exponential backoff, and abandons a row after the attempt cap. Actual
/// redelivery happens when the device reconnects and syncs; the rows bound
/// how long we keep trying to nudge.
pub struct DeliveryService;

pub const MAX_ATTEMPTS: i32 = 6;
const BASE_DELAY_SECS: u64 = 30;
const MAX_DELAY_SECS: u64 = 600;
const SWEEP_INTERVAL_SECS: u64 = 15;
const SWEEP_BATCH: i64 = 200;

impl DeliveryService {
    /// Backoff before attempt `n` (0-based): 30s doubling, capped at 10min.
    pub fn next_delay(attempt: i32) -> Duration {
        let attempt = attempt.clamp(0, 30) as u32;
        let secs = BASE_DELAY_SECS.saturating_mul(1u64 << attempt.min(16));
        Duration::from_secs(secs.min(MAX_DELAY_SECS))
    }

    /// Enqueue retry rows for member devices whose delivery cursor is
    /// behind this message and that are not currently online. Devices the
    /// message's sender used are skipped.
    pub async fn enqueue_for_message(
        db: &Pool<Postgres>,
        presence: &PresenceTracker,
        message_id: Uuid,
        conversation_id: Uuid,
        seq: i64,
        sender_device_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let candidates: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT s.user_id, s.device_id
            FROM sync_state s
            JOIN conversation_members cm
              ON cm.conversation_id = s.conversation_id AND cm.user_id = s.user_id
            WHERE s.conversation_id = $1
              AND s.last_delivered_seq < $2
              AND s.device_id <> $3
              AND cm.left_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(seq)
        .bind(sender_device_id)
        .fetch_all(db)
        .await?;

        let mut enqueued = 0u64;
        for (user_id, device_id) in candidates {
            // An online device gets the live push; no retry row needed.
            if presence.is_device_online(user_id, &device_id).await {
                continue;
            }
            let result = sqlx::query(
                r#"
                INSERT INTO message_retries (message_id, user_id, device_id, attempt, next_attempt_at)
                VALUES ($1, $2, $3, 0, NOW() + make_interval(secs => $4))
                ON CONFLICT (message_id, device_id) DO NOTHING
                "#,
            )
            .bind(message_id)
            .bind(user_id)
            .bind(&device_id)
            .bind(BASE_DELAY_SECS as f64)
            .execute(db)
            .await?;
            enqueued += result.rows_affected();
        }
        Ok(enqueued)
    }

    /// Fire-and-forget enqueue off the send path.
    pub fn spawn_enqueue(
        db: Pool<Postgres>,
        presence: PresenceTracker,
        message_id: Uuid,
        conversation_id: Uuid,
        seq: i64,
        sender_device_id: String,
    ) {
        tokio::spawn(async move {
            let result = Self::enqueue_for_message(
                &db,
                &presence,
                message_id,
                conversation_id,
                seq,
                &sender_device_id,
            )
            .await;
            match result {
                Ok(enqueued) if enqueued > 0 => {
                    debug!(%message_id, enqueued, "delivery retries enqueued");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, %message_id, "delivery retry enqueue failed"),
            }
        });
    }

    /// Process one batch of due retries. Rows whose device has come back
    /// online are dropped; the rest are rescheduled. Returns rows touched.
    pub async fn sweep_once(
        db: &Pool<Postgres>,
        presence: &PresenceTracker,
    ) -> Result<u64, sqlx::Error> {
        let abandoned = sqlx::query(
            "DELETE FROM message_retries WHERE attempt >= $1",
        )
        .bind(MAX_ATTEMPTS)
        .execute(db)
        .await?
        .rows_affected();
        if abandoned > 0 {
            warn!(abandoned, "delivery retries abandoned after attempt cap");
        }

        let due: Vec<(Uuid, Uuid, String, i32)> = sqlx::query_as(
            r#"
            SELECT message_id, user_id, device_id, attempt FROM message_retries
            WHERE next_attempt_at <= NOW()
            ORDER BY next_attempt_at
            LIMIT $1
            "#,
        )
        .bind(SWEEP_BATCH)
        .fetch_all(db)
        .await?;

        let mut touched = 0u64;
        for (message_id, user_id, device_id, attempt) in due {
            if presence.is_device_online(user_id, &device_id).await {
                sqlx::query(
                    "DELETE FROM message_retries WHERE message_id = $1 AND device_id = $2",
                )
                .bind(message_id)
                .bind(&device_id)
                .execute(db)
                .await?;
                touched += 1;
                continue;
            }
            let delay = Self::next_delay(attempt + 1);
            sqlx::query(
                r#"
                UPDATE message_retries
                SET attempt = attempt + 1,
                    last_attempt_at = NOW(),
                    next_attempt_at = NOW() + make_interval(secs => $3)
                WHERE message_id = $1 AND device_id = $2
                "#,
            )
            .bind(message_id)
            .bind(&device_id)
            .bind(delay.as_secs() as f64)
            .execute(db)
            .await?;
            touched += 1;
        }
        Ok(touched)
    }

    pub fn spawn_sweeper(db: Pool<Postgres>, presence: PresenceTracker) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = Self::sweep_once(&db, &presence).await {
                    error!(error = %e, "delivery retry sweep failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        assert_eq!(DeliveryService::next_delay(0), Duration::from_secs(30));
        assert_eq!(DeliveryService::next_delay(1), Duration::from_secs(60));
        assert_eq!(DeliveryService::next_delay(2), Duration::from_secs(120));
        assert_eq!(DeliveryService::next_delay(4), Duration::from_secs(480));
        assert_eq!(DeliveryService::next_delay(5), Duration::from_secs(600));
        assert_eq!(DeliveryService::next_delay(20), Duration::from_secs(600));
    }

    #[test]
    fn negative_attempt_treated_as_first() {
        assert_eq!(DeliveryService::next_delay(-3), Duration::from_secs(30));
    }
}
