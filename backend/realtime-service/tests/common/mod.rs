use sqlx::{Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use realtime_service::config::Config;
use realtime_service::db::MIGRATOR;
use realtime_service::middleware::TokenVerifier;
use realtime_service::services::NoopMediaClient;
use realtime_service::state::AppState;
use realtime_service::websocket::{FanoutBridge, PresenceTracker, TopicHub};

/// Connect to the database named by DATABASE_URL, or skip the test.
pub async fn test_pool() -> Option<Pool<Postgres>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    MIGRATOR.run(&pool).await.expect("run migrations");
    Some(pool)
}

/// A group conversation with the given members already joined.
pub async fn seed_conversation(db: &Pool<Postgres>, members: &[Uuid]) -> Uuid {
    let conversation_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO conversations (id, conversation_type, title, created_by_user_id)
         VALUES ($1, 'group', 'test', $2)",
    )
    .bind(conversation_id)
    .bind(members[0])
    .execute(db)
    .await
    .expect("insert conversation");
    for user_id in members {
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role)
             VALUES ($1, $2, 'member')",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await
        .expect("insert member");
    }
    conversation_id
}

/// Local-only application state over the test database.
pub fn test_state(db: Pool<Postgres>) -> AppState {
    let hub = TopicHub::new();
    AppState {
        db,
        hub: hub.clone(),
        presence: PresenceTracker::new(Duration::from_secs(90)),
        fanout: Arc::new(FanoutBridge::local_only(hub)),
        media: Arc::new(NoopMediaClient),
        verifier: Arc::new(TokenVerifier::deny_all()),
        config: Arc::new(Config::test_defaults()),
    }
}

/// Drain frames from a connection's outbound channel until one matches the
/// wanted type, or panic after the timeout.
pub async fn recv_frame_of_type(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
    frame_type: &str,
) -> serde_json::Value {
    let deadline = Duration::from_secs(5);
    let frame = tokio::time::timeout(deadline, async {
        loop {
            let text = rx.recv().await.expect("channel closed before frame arrived");
            let value: serde_json::Value = serde_json::from_str(&text).expect("frame is json");
            if value["type"] == frame_type {
                return value;
            }
        }
    })
    .await;
    frame.unwrap_or_else(|_| panic!("no {frame_type} frame within {deadline:?}"))
}
