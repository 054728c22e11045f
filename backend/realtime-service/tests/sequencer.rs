mod common;

use uuid::Uuid;

use realtime_service::error::AppError;
use realtime_service::models::message::ContentType;
use realtime_service::services::{
    ConversationService, MessageService, NoopMediaClient, SendMessageInput,
};

fn send_input(conversation_id: Uuid, sender: Uuid, temp_id: Option<&str>) -> SendMessageInput {
    SendMessageInput {
        conversation_id,
        sender_user_id: sender,
        sender_device_id: "device-1".into(),
        body: "hello".into(),
        content_type: ContentType::Text,
        client_temp_id: temp_id.map(String::from),
        media_asset_id: None,
        client_timestamp_ms: None,
    }
}

#[tokio::test]
async fn retried_send_with_same_temp_id_returns_original_row() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, Uuid::new_v4()]).await;

    let first = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, Some("temp-1")),
        8000,
    )
    .await
    .unwrap();
    assert!(first.created);
    assert_eq!(first.message.seq, 1);

    let second = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, Some("temp-1")),
        8000,
    )
    .await
    .unwrap();
    assert!(!second.created);
    assert_eq!(second.message.id, first.message.id);
    assert_eq!(second.message.seq, 1);
}

#[tokio::test]
async fn concurrent_sends_get_contiguous_sequences() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let mut input = send_input(conversation, sender, None);
            input.client_temp_id = Some(format!("t-{i}"));
            MessageService::send_message(&db, &NoopMediaClient, input, 8000)
                .await
                .unwrap()
                .message
                .seq
        }));
    }
    let mut seqs: Vec<i64> = Vec::new();
    for handle in handles {
        seqs.push(handle.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=8).collect::<Vec<i64>>());
}

#[tokio::test]
async fn non_member_cannot_send() {
    let Some(db) = common::test_pool().await else { return };
    let conversation = common::seed_conversation(&db, &[Uuid::new_v4()]).await;

    let err = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, Uuid::new_v4(), None),
        8000,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotMember));
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let mut input = send_input(conversation, sender, None);
    input.body = "x".repeat(8001);
    let err = MessageService::send_message(&db, &NoopMediaClient, input, 8000)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_BODY");
}

#[tokio::test]
async fn media_send_requires_an_asset() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let mut input = send_input(conversation, sender, None);
    input.content_type = ContentType::Media;
    input.body = "caption only".into();
    let err = MessageService::send_message(&db, &NoopMediaClient, input, 8000)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_MEDIA");
}

#[tokio::test]
async fn text_send_with_an_asset_is_rejected() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let mut input = send_input(conversation, sender, None);
    input.media_asset_id = Some(Uuid::new_v4());
    let err = MessageService::send_message(&db, &NoopMediaClient, input, 8000)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_MEDIA");
}

#[tokio::test]
async fn media_send_with_ready_asset_commits() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let asset_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO media_assets (id, owner_user_id, conversation_id, status)
         VALUES ($1, $2, $3, 'ready')",
    )
    .bind(asset_id)
    .bind(sender)
    .bind(conversation)
    .execute(&db)
    .await
    .unwrap();

    let mut input = send_input(conversation, sender, None);
    input.content_type = ContentType::Media;
    input.body = String::new();
    input.media_asset_id = Some(asset_id);
    let sent = MessageService::send_message(&db, &NoopMediaClient, input, 8000)
        .await
        .unwrap();
    assert!(sent.created);
    assert_eq!(sent.message.content_type, "media");
    assert_eq!(sent.message.media_asset_id, Some(asset_id));
}

#[tokio::test]
async fn sender_who_left_cannot_edit_or_delete() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let other = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, other]).await;

    let sent = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, None),
        8000,
    )
    .await
    .unwrap();

    ConversationService::leave(&db, conversation, sender)
        .await
        .unwrap();

    let err = MessageService::edit_message(&db, sent.message.id, sender, "too late", 8000)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotMember));

    let err = MessageService::delete_message_for_all(&db, sent.message.id, sender)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotMember));
}

#[tokio::test]
async fn only_the_sender_can_edit_and_version_increments() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let other = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender, other]).await;

    let sent = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, None),
        8000,
    )
    .await
    .unwrap();

    let err = MessageService::edit_message(&db, sent.message.id, other, "hacked", 8000)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "EDIT_DENIED");

    let edited = MessageService::edit_message(&db, sent.message.id, sender, "fixed", 8000)
        .await
        .unwrap();
    assert_eq!(edited.body, "fixed");
    assert_eq!(edited.edit_version, 1);
}

#[tokio::test]
async fn delete_for_all_tombstones_but_keeps_seq() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let sent = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, None),
        8000,
    )
    .await
    .unwrap();
    let seq = sent.message.seq;

    let deleted = MessageService::delete_message_for_all(&db, sent.message.id, sender)
        .await
        .unwrap();
    assert!(deleted.deleted_for_all_at.is_some());
    assert_eq!(deleted.body, "");
    assert_eq!(deleted.content_type, "system");
    assert_eq!(deleted.seq, seq);

    // A tombstone cannot be edited or deleted again.
    let err = MessageService::edit_message(&db, sent.message.id, sender, "resurrect", 8000)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "EDIT_DENIED");
    let err = MessageService::delete_message_for_all(&db, sent.message.id, sender)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DELETE_DENIED");
}

#[tokio::test]
async fn reaction_upserts_to_one_per_user() {
    let Some(db) = common::test_pool().await else { return };
    let sender = Uuid::new_v4();
    let conversation = common::seed_conversation(&db, &[sender]).await;

    let sent = MessageService::send_message(
        &db,
        &NoopMediaClient,
        send_input(conversation, sender, None),
        8000,
    )
    .await
    .unwrap();

    MessageService::set_reaction(&db, sent.message.id, sender, "👍")
        .await
        .unwrap();
    let replaced = MessageService::set_reaction(&db, sent.message.id, sender, "🎉")
        .await
        .unwrap();
    assert_eq!(replaced.emoji, "🎉");

    let reactions = MessageService::list_reactions(&db, sent.message.id).await.unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "🎉");

    MessageService::remove_reaction(&db, sent.message.id, sender)
        .await
        .unwrap();
    let err = MessageService::remove_reaction(&db, sent.message.id, sender)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "REACTION_MISSING");
}
