use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::AuthedUser;
use crate::models::conversation::ConversationRecord;
use crate::services::ConversationService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDirectRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub title: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

pub async fn create_direct(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(request): Json<CreateDirectRequest>,
) -> AppResult<Json<ConversationRecord>> {
    let conversation =
        ConversationService::create_direct(&state.db, user_id, request.user_id).await?;
    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(request): Json<CreateGroupRequest>,
) -> AppResult<Json<ConversationRecord>> {
    let conversation =
        ConversationService::create_group(&state.db, user_id, &request.title, &request.member_ids)
            .await?;
    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> AppResult<Json<Vec<ConversationRecord>>> {
    let conversations = ConversationService::list_conversations(&state.db, user_id).await?;
    Ok(Json(conversations))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<AddMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ConversationService::add_member(&state.db, conversation_id, user_id, request.user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ConversationService::leave(&state.db, conversation_id, user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
