use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::MessageRecord;

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInitEntry {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub last_delivered_seq: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInitPayload {
    #[serde(default)]
    pub conversations: Vec<SyncInitEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendPayload {
    pub conversation_id: Uuid,
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub client_timestamp: Option<i64>,
    pub temp_id: Option<String>,
    pub media_asset_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayload {
    pub conversation_id: Uuid,
    pub seq: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditPayload {
    pub message_id: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletePayload {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSetPayload {
    pub message_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRemovePayload {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSubscribePayload {
    pub conversation_id: Uuid,
}

/// Frames the server accepts from clients.
#[derive(Debug)]
pub enum ClientFrame {
    SyncInit(SyncInitPayload),
    MessageSend(MessageSendPayload),
    ReadReceipt(ReceiptPayload),
    DeliveryReceipt(ReceiptPayload),
    MessageEdit(MessageEditPayload),
    MessageDelete(MessageDeletePayload),
    ReactionSet(ReactionSetPayload),
    ReactionRemove(ReactionRemovePayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    ConversationSubscribe(ConversationSubscribePayload),
    FeedSubscribe,
    Ping,
}

impl ClientFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::SyncInit(_) => "SYNC_INIT",
            ClientFrame::MessageSend(_) => "MESSAGE_SEND",
            ClientFrame::ReadReceipt(_) => "READ_RECEIPT",
            ClientFrame::DeliveryReceipt(_) => "DELIVERY_RECEIPT",
            ClientFrame::MessageEdit(_) => "MESSAGE_EDIT",
            ClientFrame::MessageDelete(_) => "MESSAGE_DELETE",
            ClientFrame::ReactionSet(_) => "REACTION_SET",
            ClientFrame::ReactionRemove(_) => "REACTION_REMOVE",
            ClientFrame::TypingStart(_) => "TYPING_START",
            ClientFrame::TypingStop(_) => "TYPING_STOP",
            ClientFrame::ConversationSubscribe(_) => "CONVERSATION_SUBSCRIBE",
            ClientFrame::FeedSubscribe => "FEED_SUBSCRIBE",
            ClientFrame::Ping => "PING",
        }
    }

    /// Parse an inbound text frame. `Ok(None)` means the frame type is
    /// unrecognized and should be ignored; `Err` means the frame is
    /// malformed and the connection should close.
    pub fn parse(text: &str) -> AppResult<Option<ClientFrame>> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| AppError::Protocol(format!("invalid frame envelope: {e}")))?;

        fn payload<T: serde::de::DeserializeOwned>(raw: Option<Value>) -> AppResult<T> {
            let value = raw.unwrap_or(Value::Null);
            serde_json::from_value(value)
                .map_err(|e| AppError::Protocol(format!("invalid payload: {e}")))
        }

        let frame = match raw.frame_type.as_str() {
            "SYNC_INIT" => ClientFrame::SyncInit(payload(raw.payload)?),
            "MESSAGE_SEND" => ClientFrame::MessageSend(payload(raw.payload)?),
            "READ_RECEIPT" => ClientFrame::ReadReceipt(payload(raw.payload)?),
            "DELIVERY_RECEIPT" => ClientFrame::DeliveryReceipt(payload(raw.payload)?),
            "MESSAGE_EDIT" => ClientFrame::MessageEdit(payload(raw.payload)?),
            "MESSAGE_DELETE" => ClientFrame::MessageDelete(payload(raw.payload)?),
            "REACTION_SET" => ClientFrame::ReactionSet(payload(raw.payload)?),
            "REACTION_REMOVE" => ClientFrame::ReactionRemove(payload(raw.payload)?),
            "TYPING_START" => ClientFrame::TypingStart(payload(raw.payload)?),
            "TYPING_STOP" => ClientFrame::TypingStop(payload(raw.payload)?),
            "CONVERSATION_SUBSCRIBE" => ClientFrame::ConversationSubscribe(payload(raw.payload)?),
            "FEED_SUBSCRIBE" => ClientFrame::FeedSubscribe,
            "PING" => ClientFrame::Ping,
            // Forward compatibility: unknown frame types are dropped.
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePushPayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_user_id: Uuid,
    pub seq: i64,
    pub content_type: String,
    pub body: String,
    pub media_asset_id: Option<Uuid>,
    pub edit_version: i32,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_for_all_at: Option<DateTime<Utc>>,
}

impl From<&MessageRecord> for MessagePushPayload {
    fn from(m: &MessageRecord) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_user_id: m.sender_user_id,
            seq: m.seq,
            content_type: m.content_type.clone(),
            body: m.body.clone(),
            media_asset_id: m.media_asset_id,
            edit_version: m.edit_version,
            client_timestamp: m.client_timestamp,
            created_at: m.created_at,
            deleted_for_all_at: m.deleted_for_all_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAckPayload {
    pub temp_id: Option<String>,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptUpdatePayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditBroadcast {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub body: String,
    pub edit_version: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleteBroadcast {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub deleted_for_all_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdatePayload {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub emoji: Option<String>,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdatePayload {
    pub user_id: Uuid,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Frames the server emits. Serialized as `{"type", "payload", "ts"}` with
/// `ts` in epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    MessagePush(MessagePushPayload),
    MessageAck(MessageAckPayload),
    ReadUpdate(ReceiptUpdatePayload),
    DeliveryUpdate(ReceiptUpdatePayload),
    MessageEdit(MessageEditBroadcast),
    MessageDelete(MessageDeleteBroadcast),
    ReactionUpdate(ReactionUpdatePayload),
    Typing(TypingBroadcast),
    PresenceUpdate(PresenceUpdatePayload),
    Error(ErrorPayload),
    Pong,
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> String {
        let mut value = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return String::from("{}"),
        };
        if let Value::Object(map) = &mut value {
            map.insert("ts".into(), Value::from(Utc::now().timestamp_millis()));
        }
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_frame_type_is_ignored() {
        let parsed = ClientFrame::parse(r#"{"type":"FUTURE_THING","payload":{}}"#).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(ClientFrame::parse("not json").is_err());
        assert!(ClientFrame::parse(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn known_type_with_bad_payload_is_an_error() {
        let res = ClientFrame::parse(r#"{"type":"MESSAGE_SEND","payload":{"conversationId":42}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn message_send_parses_camel_case() {
        let conversation_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"MESSAGE_SEND","payload":{{"conversationId":"{conversation_id}","body":"hi","tempId":"t-1"}}}}"#
        );
        let frame = ClientFrame::parse(&text).unwrap().unwrap();
        match frame {
            ClientFrame::MessageSend(p) => {
                assert_eq!(p.conversation_id, conversation_id);
                assert_eq!(p.body.as_deref(), Some("hi"));
                assert_eq!(p.temp_id.as_deref(), Some("t-1"));
                assert!(p.content_type.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ping_needs_no_payload() {
        let frame = ClientFrame::parse(r#"{"type":"PING"}"#).unwrap().unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }

    #[test]
    fn server_frame_envelope_has_type_payload_and_ts() {
        let frame = ServerFrame::error("NOT_MEMBER", "not a member of this conversation");
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["payload"]["code"], "NOT_MEMBER");
        assert!(value["ts"].as_i64().unwrap() > 0);
    }

    #[test]
    fn pong_serializes_without_payload() {
        let value: Value = serde_json::from_str(&ServerFrame::Pong.to_json()).unwrap();
        assert_eq!(value["type"], "PONG");
    }
}
