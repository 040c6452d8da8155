//! JSON wire protocol.
//!
//! Inbound frames: `{"event": "<name>", "data": {...}, "ack": <id>}`.
//! Outbound events: `{"event": "<name>", "data": {...}}`.
//! Acks: `{"ack": <id>, "data": {"success": ..., ...}}`.

use axum::extract::ws::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::session::Session;
use crate::chat::messages::{self, MessageView};
use crate::chat::{conversations, deletion, receipts, typing};
use crate::db::models::{ConversationRecord, UserSummary};
use crate::error::{GatewayError, Result};
use crate::users::{contacts, profile};

/// Envelope of every inbound text frame.
#[derive(Debug, Deserialize)]
pub struct RawFrame {
    pub event: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub ack: Option<u64>,
}

impl RawFrame {
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GatewayError::Invalid(format!("Malformed frame: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub source_message_id: String,
    pub target_conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    #[default]
    Me,
    Everyone,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub scope: DeleteScope,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeleteRequest {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// One variant per inbound event name.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    GetContacts,
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    Subscribe(ConversationRef),
    Unsubscribe(ConversationRef),
    Typing(ConversationRef),
    StopTyping(ConversationRef),
    SendMessage(SendMessageRequest),
    Forward(ForwardRequest),
    MarkRead(MarkReadRequest),
    MarkConversationRead(ConversationRef),
    Delete(DeleteRequest),
    Undelete(UndeleteRequest),
    UpdateProfile(UpdateProfileRequest),
    Ping(Value),
}

fn payload<T: DeserializeOwned>(data: Option<Value>) -> Result<T> {
    let data = match data {
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(v) => v,
    };
    serde_json::from_value(data).map_err(|e| GatewayError::Invalid(format!("Invalid payload: {}", e)))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::Invalid(format!("Missing {}", field)));
    }
    Ok(())
}

impl ClientEvent {
    /// Map an event name and its payload to a typed request.
    pub fn parse(event: &str, data: Option<Value>) -> Result<Self> {
        let parsed = match event {
            "getContacts" => Self::GetContacts,
            "joinConversation" => Self::JoinConversation(payload(data)?),
            "leaveConversation" => Self::LeaveConversation(payload(data)?),
            "conversation:subscribe" => Self::Subscribe(payload(data)?),
            "conversation:unsubscribe" => Self::Unsubscribe(payload(data)?),
            "typing" => Self::Typing(payload(data)?),
            "stop_typing" => Self::StopTyping(payload(data)?),
            "sendMessage" => Self::SendMessage(payload(data)?),
            "message:forward" => Self::Forward(payload(data)?),
            "message:read" => Self::MarkRead(payload(data)?),
            "conversation:markRead" => Self::MarkConversationRead(payload(data)?),
            "message:delete" => Self::Delete(payload(data)?),
            "message:undelete" => Self::Undelete(payload(data)?),
            "updateProfile" => Self::UpdateProfile(payload(data)?),
            "test:ping" => Self::Ping(data.unwrap_or(Value::Null)),
            other => return Err(GatewayError::Invalid(format!("Unknown event: {}", other))),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::JoinConversation(r)
            | Self::LeaveConversation(r)
            | Self::Subscribe(r)
            | Self::Unsubscribe(r)
            | Self::Typing(r)
            | Self::StopTyping(r)
            | Self::MarkConversationRead(r) => require("conversationId", &r.conversation_id),
            Self::SendMessage(r) => require("conversationId", &r.conversation_id),
            Self::Forward(r) => {
                require("sourceMessageId", &r.source_message_id)?;
                require("targetConversationId", &r.target_conversation_id)
            }
            Self::MarkRead(r) => {
                require("conversationId", &r.conversation_id)?;
                require("messageId", &r.message_id)
            }
            Self::Delete(DeleteRequest { conversation_id, message_ids, .. })
            | Self::Undelete(UndeleteRequest { conversation_id, message_ids }) => {
                require("conversationId", conversation_id)?;
                if message_ids.is_empty() {
                    return Err(GatewayError::Invalid("Missing messageIds".to_string()));
                }
                Ok(())
            }
            Self::GetContacts | Self::UpdateProfile(_) | Self::Ping(_) => Ok(()),
        }
    }
}

/// Events pushed from the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "user:registered")]
    Registered { user_id: String, name: String },
    #[serde(rename = "user:online")]
    UserOnline { user_id: String, name: String },
    #[serde(rename = "user:offline")]
    UserOffline { user_id: String, name: String, reason: String },
    #[serde(rename = "conversation:joined")]
    ConversationJoined {
        conversation: ConversationRecord,
        messages: Vec<MessageView>,
    },
    #[serde(rename = "message:new")]
    MessageNew(MessageView),
    #[serde(rename = "message:read")]
    MessageRead {
        conversation_id: String,
        message_id: String,
        user_id: String,
    },
    #[serde(rename = "conversation:read")]
    ConversationRead { conversation_id: String, user_id: String },
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        conversation_id: String,
        message_ids: Vec<String>,
        scope: DeleteScope,
        user_id: String,
    },
    #[serde(rename = "message:undeleted")]
    MessageUndeleted {
        conversation_id: String,
        message_ids: Vec<String>,
        user_id: String,
    },
    #[serde(rename = "typing")]
    Typing {
        conversation_id: String,
        user_id: String,
        name: String,
    },
    #[serde(rename = "stop_typing")]
    StopTyping { conversation_id: String, user_id: String },
    #[serde(rename = "invited:conversation")]
    InvitedConversation(ConversationRecord),
    #[serde(rename = "conversation:members:added")]
    MembersAdded {
        conversation_id: String,
        members: Vec<UserSummary>,
    },
}

impl ServerEvent {
    /// Encode as a text frame. Serialization of these types cannot fail in
    /// practice; a failure is logged and yields None.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

/// Build the ack frame for a handler result.
/// Success bodies are objects and gain `success: true`.
pub fn ack_message(ack: u64, result: &Result<Value>) -> Message {
    let data = match result {
        Ok(Value::Object(map)) => {
            let mut map = map.clone();
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(Value::Null) => json!({ "success": true }),
        Ok(other) => json!({ "success": true, "data": other }),
        Err(e) => e.to_json(),
    };
    Message::Text(json!({ "ack": ack, "data": data }).to_string().into())
}

/// Handle an incoming text frame: decode, dispatch, and ack when asked.
/// Handler errors are reported to the caller only.
pub async fn handle_text_message(session: &mut Session, text: &str) {
    let frame = match RawFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id(),
                session_id = %session.id,
                error = %e,
                "Failed to decode frame"
            );
            return;
        }
    };

    let ack = frame.ack;
    let result = match ClientEvent::parse(&frame.event, frame.data) {
        Ok(event) => dispatch(session, event).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        tracing::warn!(
            user_id = %session.user_id(),
            session_id = %session.id,
            event = %frame.event,
            reason = e.reason(),
            error = %e,
            "Handler failed"
        );
    }

    if let Some(ack) = ack {
        session.reply(ack, &result);
    }
}

/// Dispatch a typed event to its handler. Only Active sessions may run handlers.
pub async fn dispatch(session: &mut Session, event: ClientEvent) -> Result<Value> {
    if !session.is_active() {
        return Err(GatewayError::Unauthorized);
    }

    match event {
        ClientEvent::GetContacts => contacts::get_contacts(session).await,
        ClientEvent::JoinConversation(req) => conversations::join_conversation(session, req).await,
        ClientEvent::LeaveConversation(req) => conversations::leave_conversation(session, req).await,
        ClientEvent::Subscribe(req) => conversations::subscribe(session, req).await,
        ClientEvent::Unsubscribe(req) => conversations::unsubscribe(session, req).await,
        ClientEvent::Typing(req) => typing::typing(session, req),
        ClientEvent::StopTyping(req) => typing::stop_typing(session, req),
        ClientEvent::SendMessage(req) => messages::send_message(session, req).await,
        ClientEvent::Forward(req) => messages::forward_message(session, req).await,
        ClientEvent::MarkRead(req) => receipts::mark_message_read(session, req).await,
        ClientEvent::MarkConversationRead(req) => receipts::mark_conversation_read(session, req).await,
        ClientEvent::Delete(req) => deletion::delete_messages(session, req).await,
        ClientEvent::Undelete(req) => deletion::undelete_messages(session, req).await,
        ClientEvent::UpdateProfile(req) => profile::update_profile(session, req).await,
        ClientEvent::Ping(echo) => Ok(json!({ "ok": true, "echo": echo, "from": session.user_id() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ClientEvent> {
        let frame = RawFrame::decode(text)?;
        ClientEvent::parse(&frame.event, frame.data)
    }

    #[test]
    fn test_parse_send_message() {
        let event = parse(
            r#"{"event":"sendMessage","data":{"conversationId":"c1","content":"hello","clientId":"tmp-1"},"ack":3}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.conversation_id, "c1");
                assert_eq!(req.content.as_deref(), Some("hello"));
                assert_eq!(req.client_id.as_deref(), Some("tmp-1"));
                assert!(req.attachment.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_empty_send_is_accepted() {
        assert!(parse(r#"{"event":"sendMessage","data":{"conversationId":"c1"}}"#).is_ok());
    }

    #[test]
    fn test_unknown_event_is_invalid() {
        let err = parse(r#"{"event":"message:explode","data":{}}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let err = parse(r#"{"event":"message:read","data":{"conversationId":"c1"}}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));

        let err = parse(r#"{"event":"joinConversation"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));

        let err = parse(r#"{"event":"typing","data":{"conversationId":""}}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
    }

    #[test]
    fn test_delete_scope_defaults_to_me() {
        match parse(r#"{"event":"message:delete","data":{"conversationId":"c1","messageIds":["m1"]}}"#).unwrap() {
            ClientEvent::Delete(req) => assert_eq!(req.scope, DeleteScope::Me),
            other => panic!("unexpected event {:?}", other),
        }
        let err = parse(r#"{"event":"message:delete","data":{"conversationId":"c1","messageIds":[]}}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
        let err = parse(
            r#"{"event":"message:delete","data":{"conversationId":"c1","messageIds":["m1"],"scope":"nobody"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
    }

    #[test]
    fn test_malformed_frame_is_invalid() {
        assert!(matches!(RawFrame::decode("not json"), Err(GatewayError::Invalid(_))));
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::MessageRead {
            conversation_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u2".into(),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "message:read", "data": {"conversationId": "c1", "messageId": "m1", "userId": "u2"}})
        );
    }

    #[test]
    fn test_ack_frames() {
        let ok = ack_message(7, &Ok(json!({ "updated": 2 })));
        let Message::Text(text) = ok else { panic!("expected text") };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value, json!({"ack": 7, "data": {"success": true, "updated": 2}}));

        let err = ack_message(8, &Err(GatewayError::Forbidden("Not allowed".into())));
        let Message::Text(text) = err else { panic!("expected text") };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["ack"], 8);
        assert_eq!(value["data"]["success"], false);
        assert_eq!(value["data"]["reason"], "forbidden");
        assert_eq!(value["data"]["msg"], "Not allowed");
    }
}
