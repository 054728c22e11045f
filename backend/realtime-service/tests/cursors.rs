mod common;

use uuid::Uuid;

use realtime_service::models::message::ContentType;
use realtime_service::services::{MessageService, NoopMediaClient, SendMessageInput, SyncService};

async fn seed_messages(
    db: &sqlx::Pool<sqlx::Postgres>,
    conversation: Uuid,
    sender: Uuid,
    count: usize,
) {
    for i in 0..count {
        MessageService::send_message(
            db,
            &NoopMediaClient,
            SendMessageInput {
                conversation_id: conversation,
                sender_user_id: sender,
                sender_device_id: "sender-device".into(),
                body: format!("message {i}"),
                content_type: ContentType::Text,
                client_temp_id: None,
                media_asset_id: None,
                client_timestamp_ms: None,
            },
            8000,
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn delivery_cursor_never_regresses() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, reader]).await;
    seed_messages(&db, conversation, sender, 6).await;

    let merged = MessageService::mark_delivered(&db, conversation, reader, "dev-1", 5)
        .await
        .unwrap();
    assert_eq!(merged, 5);

    // A stale ack keeps the higher cursor.
    let merged = MessageService::mark_delivered(&db, conversation, reader, "dev-1", 3)
        .await
        .unwrap();
    assert_eq!(merged, 5);
}

#[tokio::test]
async fn read_implies_delivered() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, reader]).await;
    seed_messages(&db, conversation, sender, 4).await;

    MessageService::mark_read(&db, conversation, reader, "dev-1", 4)
        .await
        .unwrap();

    let (delivered, read): (i64, i64) = sqlx::query_as(
        "SELECT last_delivered_seq, last_read_seq FROM sync_state
         WHERE user_id = $1 AND device_id = 'dev-1' AND conversation_id = $2",
    )
    .bind(reader)
    .bind(conversation)
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(delivered, 4);
    assert_eq!(read, 4);
}

#[tokio::test]
async fn receipts_clear_retry_rows_in_range() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, reader]).await;
    seed_messages(&db, conversation, sender, 3).await;

    let message_ids: Vec<(Uuid,)> =
        sqlx::query_as("SELECT id FROM messages WHERE conversation_id = $1 ORDER BY seq")
            .bind(conversation)
            .fetch_all(&db)
            .await
            .unwrap();
    for (message_id,) in &message_ids {
        sqlx::query(
            "INSERT INTO message_retries (message_id, user_id, device_id, attempt, next_attempt_at)
             VALUES ($1, $2, 'dev-1', 0, NOW())",
        )
        .bind(message_id)
        .bind(reader)
        .execute(&db)
        .await
        .unwrap();
    }

    MessageService::mark_read(&db, conversation, reader, "dev-1", 2)
        .await
        .unwrap();

    let (remaining,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM message_retries r
         JOIN messages m ON m.id = r.message_id
         WHERE m.conversation_id = $1 AND r.device_id = 'dev-1'",
    )
    .bind(conversation)
    .fetch_one(&db)
    .await
    .unwrap();
    // Only the unacked third message keeps its retry row.
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn replay_resumes_from_merged_cursor_and_is_bounded() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, reader]).await;
    seed_messages(&db, conversation, sender, 10).await;

    // First sync from scratch, limited to 4 messages.
    let batch = SyncService::sync_conversation(&db, reader, "dev-1", conversation, 0, 4)
        .await
        .unwrap();
    assert_eq!(batch.len(), 4);
    assert_eq!(batch[0].seq, 1);
    assert_eq!(batch[3].seq, 4);

    MessageService::mark_delivered(&db, conversation, reader, "dev-1", 4)
        .await
        .unwrap();

    // A client claiming an older cursor resumes from the stored one.
    let batch = SyncService::sync_conversation(&db, reader, "dev-1", conversation, 1, 100)
        .await
        .unwrap();
    assert_eq!(batch.len(), 6);
    assert_eq!(batch[0].seq, 5);
    assert_eq!(batch[5].seq, 10);
}

#[tokio::test]
async fn cursors_are_scoped_per_device() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, reader]).await;
    seed_messages(&db, conversation, sender, 5).await;

    MessageService::mark_delivered(&db, conversation, reader, "phone", 5)
        .await
        .unwrap();

    let laptop = SyncService::sync_conversation(&db, reader, "laptop", conversation, 0, 100)
        .await
        .unwrap();
    assert_eq!(laptop.len(), 5);

    let phone = SyncService::sync_conversation(&db, reader, "phone", conversation, 0, 100)
        .await
        .unwrap();
    assert!(phone.is_empty());
}
