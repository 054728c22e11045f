use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthedUser;
use crate::models::message::{ContentType, MessageRecord, ReactionRecord};
use crate::services::{DeliveryService, MessageService, SendMessageInput, SyncService};
use crate::state::AppState;
use crate::websocket::frames::{
    MessageDeleteBroadcast, MessageEditBroadcast, MessagePushPayload, ReactionUpdatePayload,
    ReceiptUpdatePayload, ServerFrame,
};
use crate::websocket::{conversation_topic, PublishScope};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub device_id: String,
    pub temp_id: Option<String>,
    pub media_asset_id: Option<Uuid>,
    pub client_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub before_seq: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub device_id: String,
    pub seq: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub device_id: String,
    #[serde(default)]
    pub last_delivered_seq: i64,
}

async fn broadcast(state: &AppState, conversation_id: Uuid, frame: &ServerFrame) {
    state
        .fanout
        .publish(
            PublishScope::Conversation,
            &conversation_topic(conversation_id),
            &frame.to_json(),
        )
        .await;
}

/// POST /conversations/:id/messages — same commit path as the realtime
/// MESSAGE_SEND frame, for clients on plain HTTP.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let content_type = match request.content_type.as_deref() {
        None => ContentType::Text,
        Some(raw) => ContentType::parse(raw)
            .ok_or_else(|| AppError::validation("INVALID_TYPE", format!("unknown content type '{raw}'")))?,
    };

    let outcome = MessageService::send_message(
        &state.db,
        state.media.as_ref(),
        SendMessageInput {
            conversation_id,
            sender_user_id: user_id,
            sender_device_id: request.device_id,
            body: request.body.unwrap_or_default(),
            content_type,
            client_temp_id: request.temp_id,
            media_asset_id: request.media_asset_id,
            client_timestamp_ms: request.client_timestamp,
        },
        state.config.max_message_body_length,
    )
    .await?;

    if outcome.created {
        let push = ServerFrame::MessagePush(MessagePushPayload::from(&outcome.message));
        broadcast(&state, conversation_id, &push).await;
        DeliveryService::spawn_enqueue(
            state.db.clone(),
            state.presence.clone(),
            outcome.message.id,
            conversation_id,
            outcome.message.seq,
            outcome.message.sender_device_id.clone(),
        );
    }

    Ok(Json(serde_json::json!({
        "message": outcome.message,
        "created": outcome.created,
    })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let messages = MessageService::list_messages(
        &state.db,
        conversation_id,
        user_id,
        query.before_seq,
        query.limit.unwrap_or(50),
    )
    .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<ReceiptRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let merged = MessageService::mark_read(
        &state.db,
        conversation_id,
        user_id,
        &request.device_id,
        request.seq,
    )
    .await?;
    let frame = ServerFrame::ReadUpdate(ReceiptUpdatePayload {
        conversation_id,
        user_id,
        device_id: request.device_id,
        seq: merged,
    });
    broadcast(&state, conversation_id, &frame).await;
    Ok(Json(serde_json::json!({ "lastReadSeq": merged })))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<ReceiptRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let merged = MessageService::mark_delivered(
        &state.db,
        conversation_id,
        user_id,
        &request.device_id,
        request.seq,
    )
    .await?;
    let frame = ServerFrame::DeliveryUpdate(ReceiptUpdatePayload {
        conversation_id,
        user_id,
        device_id: request.device_id,
        seq: merged,
    });
    broadcast(&state, conversation_id, &frame).await;
    Ok(Json(serde_json::json!({ "lastDeliveredSeq": merged })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(message_id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> AppResult<Json<MessageRecord>> {
    let message = MessageService::edit_message(
        &state.db,
        message_id,
        user_id,
        &request.body,
        state.config.max_message_body_length,
    )
    .await?;
    let frame = ServerFrame::MessageEdit(MessageEditBroadcast {
        message_id: message.id,
        conversation_id: message.conversation_id,
        body: message.body.clone(),
        edit_version: message.edit_version,
    });
    broadcast(&state, message.conversation_id, &frame).await;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageRecord>> {
    let message = MessageService::delete_message_for_all(&state.db, message_id, user_id).await?;
    if let Some(deleted_at) = message.deleted_for_all_at {
        let frame = ServerFrame::MessageDelete(MessageDeleteBroadcast {
            message_id: message.id,
            conversation_id: message.conversation_id,
            deleted_for_all_at: deleted_at,
        });
        broadcast(&state, message.conversation_id, &frame).await;
    }
    Ok(Json(message))
}

pub async fn set_reaction(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(message_id): Path<Uuid>,
    Json(request): Json<ReactionRequest>,
) -> AppResult<Json<ReactionRecord>> {
    let reaction =
        MessageService::set_reaction(&state.db, message_id, user_id, &request.emoji).await?;
    if let Some(message) = MessageService::get_message(&state.db, message_id).await? {
        let frame = ServerFrame::ReactionUpdate(ReactionUpdatePayload {
            message_id,
            conversation_id: message.conversation_id,
            user_id,
            emoji: Some(reaction.emoji.clone()),
            removed: false,
        });
        broadcast(&state, message.conversation_id, &frame).await;
    }
    Ok(Json(reaction))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let message = MessageService::remove_reaction(&state.db, message_id, user_id).await?;
    let frame = ServerFrame::ReactionUpdate(ReactionUpdatePayload {
        message_id,
        conversation_id: message.conversation_id,
        user_id,
        emoji: None,
        removed: true,
    });
    broadcast(&state, message.conversation_id, &frame).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn list_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Vec<ReactionRecord>>> {
    let reactions = MessageService::list_reactions(&state.db, message_id).await?;
    Ok(Json(reactions))
}

/// POST /conversations/:id/sync — cursor-resumed replay over HTTP.
pub async fn sync_conversation(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SyncRequest>,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let messages = SyncService::sync_conversation(
        &state.db,
        user_id,
        &request.device_id,
        conversation_id,
        request.last_delivered_seq,
        state.config.sync_batch_limit,
    )
    .await?;
    Ok(Json(messages))
}
