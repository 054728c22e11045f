use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::models::message::ContentType;
use crate::services::{
    ConversationService, DeliveryService, MessageService, SendMessageInput, SyncService,
};
use crate::state::AppState;
use crate::websocket::frames::{
    ClientFrame, MessageAckPayload, MessageDeleteBroadcast, MessageEditBroadcast,
    MessagePushPayload, MessageSendPayload, ReactionUpdatePayload, ReceiptPayload,
    ReceiptUpdatePayload, ServerFrame, SyncInitPayload, TypingBroadcast,
};
use crate::websocket::hub::{conversation_topic, user_topic, ConnId, FEED_TOPIC};
use crate::websocket::PublishScope;

/// Per-connection identity, fixed at handshake.
#[derive(Clone)]
pub struct ConnectionContext {
    pub conn_id: ConnId,
    pub user_id: Uuid,
    pub device_id: String,
    pub tx: UnboundedSender<String>,
}

impl ConnectionContext {
    fn send(&self, frame: &ServerFrame) {
        // A closed peer is handled by the connection loop, not here.
        let _ = self.tx.send(frame.to_json());
    }

    fn send_error(&self, code: &str, message: impl Into<String>) {
        self.send(&ServerFrame::error(code, message.into()));
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouterOutcome {
    Continue,
    Close,
}

/// Dispatch one inbound text frame.
///
/// Malformed frames close the connection; unknown types are dropped;
/// semantic failures answer with an ERROR frame and keep the connection.
pub async fn handle_frame(
    state: &AppState,
    ctx: &ConnectionContext,
    text: &str,
) -> RouterOutcome {
    let frame = match ClientFrame::parse(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return RouterOutcome::Continue,
        Err(e) => {
            warn!(user_id = %ctx.user_id, error = %e, "malformed frame, closing");
            return RouterOutcome::Close;
        }
    };
    metrics::record_frame(frame.frame_type());

    match frame {
        ClientFrame::Ping => {
            ctx.send(&ServerFrame::Pong);
            RouterOutcome::Continue
        }
        ClientFrame::SyncInit(payload) => handle_sync_init(state, ctx, payload).await,
        ClientFrame::MessageSend(payload) => handle_message_send(state, ctx, payload).await,
        ClientFrame::ReadReceipt(payload) => handle_receipt(state, ctx, payload, true).await,
        ClientFrame::DeliveryReceipt(payload) => handle_receipt(state, ctx, payload, false).await,
        ClientFrame::MessageEdit(payload) => {
            let result =
                MessageService::edit_message(
                    &state.db,
                    payload.message_id,
                    ctx.user_id,
                    &payload.body,
                    state.config.max_message_body_length,
                )
                .await;
            match result {
                Ok(message) => {
                    let frame = ServerFrame::MessageEdit(MessageEditBroadcast {
                        message_id: message.id,
                        conversation_id: message.conversation_id,
                        body: message.body.clone(),
                        edit_version: message.edit_version,
                    });
                    publish_conversation(state, message.conversation_id, &frame).await;
                    RouterOutcome::Continue
                }
                Err(e) => reply_or_close(ctx, e),
            }
        }
        ClientFrame::MessageDelete(payload) => {
            let result =
                MessageService::delete_message_for_all(&state.db, payload.message_id, ctx.user_id)
                    .await;
            match result {
                Ok(message) => {
                    if let Some(deleted_at) = message.deleted_for_all_at {
                        let frame = ServerFrame::MessageDelete(MessageDeleteBroadcast {
                            message_id: message.id,
                            conversation_id: message.conversation_id,
                            deleted_for_all_at: deleted_at,
                        });
                        publish_conversation(state, message.conversation_id, &frame).await;
                    }
                    RouterOutcome::Continue
                }
                Err(e) => reply_or_close(ctx, e),
            }
        }
        ClientFrame::ReactionSet(payload) => {
            let result =
                MessageService::set_reaction(&state.db, payload.message_id, ctx.user_id, &payload.emoji)
                    .await;
            match result {
                Ok(reaction) => {
                    let conversation_id =
                        match MessageService::get_message(&state.db, reaction.message_id).await {
                            Ok(Some(m)) => m.conversation_id,
                            Ok(None) => return RouterOutcome::Continue,
                            Err(e) => {
                                error!(error = %e, "reaction lookup failed");
                                return RouterOutcome::Close;
                            }
                        };
                    let frame = ServerFrame::ReactionUpdate(ReactionUpdatePayload {
                        message_id: reaction.message_id,
                        conversation_id,
                        user_id: reaction.user_id,
                        emoji: Some(reaction.emoji),
                        removed: false,
                    });
                    publish_conversation(state, conversation_id, &frame).await;
                    RouterOutcome::Continue
                }
                Err(e) => reply_or_close(ctx, e),
            }
        }
        ClientFrame::ReactionRemove(payload) => {
            match MessageService::remove_reaction(&state.db, payload.message_id, ctx.user_id).await {
                Ok(message) => {
                    let frame = ServerFrame::ReactionUpdate(ReactionUpdatePayload {
                        message_id: message.id,
                        conversation_id: message.conversation_id,
                        user_id: ctx.user_id,
                        emoji: None,
                        removed: true,
                    });
                    publish_conversation(state, message.conversation_id, &frame).await;
                    RouterOutcome::Continue
                }
                Err(e) => reply_or_close(ctx, e),
            }
        }
        ClientFrame::TypingStart(payload) => {
            handle_typing(state, ctx, payload.conversation_id, true).await
        }
        ClientFrame::TypingStop(payload) => {
            handle_typing(state, ctx, payload.conversation_id, false).await
        }
        ClientFrame::ConversationSubscribe(payload) => {
            match ConversationService::is_member(&state.db, payload.conversation_id, ctx.user_id)
                .await
            {
                Ok(true) => {
                    state
                        .hub
                        .subscribe(ctx.conn_id, &conversation_topic(payload.conversation_id))
                        .await;
                    RouterOutcome::Continue
                }
                Ok(false) => {
                    ctx.send_error("NOT_MEMBER", "not a member of this conversation");
                    RouterOutcome::Continue
                }
                Err(e) => {
                    error!(error = %e, "membership check failed");
                    RouterOutcome::Close
                }
            }
        }
        ClientFrame::FeedSubscribe => {
            state.hub.subscribe(ctx.conn_id, FEED_TOPIC).await;
            RouterOutcome::Continue
        }
    }
}

/// Semantic errors go back as ERROR frames; database failures close.
fn reply_or_close(ctx: &ConnectionContext, err: AppError) -> RouterOutcome {
    match err {
        AppError::Database(e) => {
            error!(user_id = %ctx.user_id, error = %e, "frame handling failed");
            RouterOutcome::Close
        }
        other => {
            ctx.send_error(other.error_code(), other.to_string());
            RouterOutcome::Continue
        }
    }
}

async fn publish_conversation(state: &AppState, conversation_id: Uuid, frame: &ServerFrame) {
    state
        .fanout
        .publish(
            PublishScope::Conversation,
            &conversation_topic(conversation_id),
            &frame.to_json(),
        )
        .await;
}

async fn publish_user(state: &AppState, user_id: Uuid, frame: &ServerFrame) {
    state
        .fanout
        .publish(PublishScope::User, &user_topic(user_id), &frame.to_json())
        .await;
}

async fn handle_sync_init(
    state: &AppState,
    ctx: &ConnectionContext,
    payload: SyncInitPayload,
) -> RouterOutcome {
    for entry in payload.conversations {
        let replay = SyncService::sync_conversation(
            &state.db,
            ctx.user_id,
            &ctx.device_id,
            entry.conversation_id,
            entry.last_delivered_seq,
            state.config.sync_batch_limit,
        )
        .await;
        match replay {
            Ok(messages) => {
                for message in &messages {
                    ctx.send(&ServerFrame::MessagePush(MessagePushPayload::from(message)));
                }
            }
            Err(AppError::NotMember) => {
                ctx.send_error("NOT_MEMBER", "not a member of this conversation");
            }
            Err(AppError::Database(e)) => {
                error!(user_id = %ctx.user_id, error = %e, "sync replay failed");
                return RouterOutcome::Close;
            }
            Err(other) => {
                ctx.send_error(other.error_code(), other.to_string());
            }
        }
    }
    RouterOutcome::Continue
}

async fn handle_message_send(
    state: &AppState,
    ctx: &ConnectionContext,
    payload: MessageSendPayload,
) -> RouterOutcome {
    let content_type = match payload.content_type.as_deref() {
        None => ContentType::Text,
        Some(raw) => match ContentType::parse(raw) {
            Some(ct) => ct,
            None => {
                ctx.send_error("INVALID_TYPE", format!("unknown content type '{raw}'"));
                return RouterOutcome::Continue;
            }
        },
    };

    let input = SendMessageInput {
        conversation_id: payload.conversation_id,
        sender_user_id: ctx.user_id,
        sender_device_id: ctx.device_id.clone(),
        body: payload.body.unwrap_or_default(),
        content_type,
        client_temp_id: payload.temp_id,
        media_asset_id: payload.media_asset_id,
        client_timestamp_ms: payload.client_timestamp,
    };
    let temp_id = input.client_temp_id.clone();

    let outcome = MessageService::send_message(
        &state.db,
        state.media.as_ref(),
        input,
        state.config.max_message_body_length,
    )
    .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(AppError::Database(e)) => {
            // Send keeps the connection; the client can retry with the
            // same temp id.
            error!(user_id = %ctx.user_id, error = %e, "message send failed");
            ctx.send_error("SEND_FAILED", "message could not be committed");
            return RouterOutcome::Continue;
        }
        Err(other) => {
            ctx.send_error(other.error_code(), other.to_string());
            return RouterOutcome::Continue;
        }
    };

    let message = &outcome.message;
    if outcome.created {
        let push = ServerFrame::MessagePush(MessagePushPayload::from(message));
        publish_conversation(state, message.conversation_id, &push).await;
        DeliveryService::spawn_enqueue(
            state.db.clone(),
            state.presence.clone(),
            message.id,
            message.conversation_id,
            message.seq,
            message.sender_device_id.clone(),
        );
    }

    // The ack goes to the user topic so every device of the sender can
    // reconcile its optimistic entry, duplicates included.
    let ack = ServerFrame::MessageAck(MessageAckPayload {
        temp_id,
        conversation_id: message.conversation_id,
        message_id: message.id,
        seq: message.seq,
        created_at: message.created_at,
        created: outcome.created,
    });
    publish_user(state, ctx.user_id, &ack).await;
    RouterOutcome::Continue
}

async fn handle_receipt(
    state: &AppState,
    ctx: &ConnectionContext,
    payload: ReceiptPayload,
    read: bool,
) -> RouterOutcome {
    let result = if read {
        MessageService::mark_read(
            &state.db,
            payload.conversation_id,
            ctx.user_id,
            &ctx.device_id,
            payload.seq,
        )
        .await
    } else {
        MessageService::mark_delivered(
            &state.db,
            payload.conversation_id,
            ctx.user_id,
            &ctx.device_id,
            payload.seq,
        )
        .await
    };

    match result {
        Ok(merged) => {
            let update = ReceiptUpdatePayload {
                conversation_id: payload.conversation_id,
                user_id: ctx.user_id,
                device_id: ctx.device_id.clone(),
                seq: merged,
            };
            let frame = if read {
                ServerFrame::ReadUpdate(update)
            } else {
                ServerFrame::DeliveryUpdate(update)
            };
            publish_conversation(state, payload.conversation_id, &frame).await;
            RouterOutcome::Continue
        }
        Err(e) => reply_or_close(ctx, e),
    }
}

async fn handle_typing(
    state: &AppState,
    ctx: &ConnectionContext,
    conversation_id: Uuid,
    typing: bool,
) -> RouterOutcome {
    match ConversationService::is_member(&state.db, conversation_id, ctx.user_id).await {
        Ok(true) => {
            let frame = ServerFrame::Typing(TypingBroadcast {
                conversation_id,
                user_id: ctx.user_id,
                typing,
            });
            publish_conversation(state, conversation_id, &frame).await;
            RouterOutcome::Continue
        }
        Ok(false) => {
            ctx.send_error("NOT_MEMBER", "not a member of this conversation");
            RouterOutcome::Continue
        }
        Err(e) => {
            error!(error = %e, "membership check failed");
            RouterOutcome::Close
        }
    }
}
