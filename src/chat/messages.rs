//! Send and forward, plus the enriched message view clients receive.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{broadcast, require_participant};
use crate::db::models::{MessageRecord, NewMessage};
use crate::db::{conversations as conversation_store, messages as message_store, users as user_store};
use crate::error::{GatewayError, Result};
use crate::ws::protocol::{ForwardRequest, SendMessageRequest, ServerEvent};
use crate::ws::session::Session;

/// Maximum characters of quoted text in a reply preview.
const REPLY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub sender_name: Option<String>,
}

/// A message as delivered to clients: the record plus sender details.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: MessageRecord,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub reply_preview: Option<ReplyPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded_from_user_name: Option<String>,
}

fn truncate(text: &str) -> String {
    text.chars().take(REPLY_PREVIEW_CHARS).collect()
}

/// Attach sender names, avatars and reply previews using one batch user lookup.
pub fn enrich(conn: &Connection, records: Vec<MessageRecord>) -> Result<Vec<MessageView>> {
    let mut replies: HashMap<String, MessageRecord> = HashMap::new();
    for record in &records {
        if let Some(reply_to) = &record.reply_to {
            if replies.contains_key(reply_to) {
                continue;
            }
            if let Some(quoted) = message_store::find_message(conn, reply_to)? {
                replies.insert(reply_to.clone(), quoted);
            }
        }
    }

    let mut user_ids: Vec<String> = Vec::new();
    for record in &records {
        user_ids.push(record.sender_id.clone());
        if let Some(original) = &record.forwarded_from_user {
            user_ids.push(original.clone());
        }
    }
    user_ids.extend(replies.values().map(|r| r.sender_id.clone()));
    user_ids.sort();
    user_ids.dedup();
    let users = user_store::summaries_by_ids(conn, &user_ids)?;

    let views = records
        .into_iter()
        .map(|message| {
            let sender = users.get(&message.sender_id);
            let reply_preview = message
                .reply_to
                .as_ref()
                .and_then(|id| replies.get(id))
                .filter(|quoted| quoted.conversation_id == message.conversation_id)
                .map(|quoted| ReplyPreview {
                    id: quoted.id.clone(),
                    content: quoted.content.as_deref().map(truncate),
                    attachment: quoted.attachment.clone(),
                    sender_name: users.get(&quoted.sender_id).map(|u| u.name.clone()),
                });
            let forwarded_from_user_name = message
                .forwarded_from_user
                .as_ref()
                .and_then(|id| users.get(id))
                .map(|u| u.name.clone());
            MessageView {
                sender_name: sender.map(|u| u.name.clone()),
                sender_avatar: sender.map(|u| u.avatar.clone()),
                client_id: None,
                reply_preview,
                forwarded_from_user_name,
                message,
            }
        })
        .collect();
    Ok(views)
}

fn single_view(conn: &Connection, record: MessageRecord) -> Result<MessageView> {
    enrich(conn, vec![record])?
        .pop()
        .ok_or_else(|| GatewayError::Transient("Failed to build message view".to_string()))
}

/// Fan out a freshly created message and hand it to the offline dispatcher.
fn publish(session: &Session, view: &MessageView, participants: Vec<String>) {
    let app = &session.app;
    broadcast::to_conversation(app, &view.message.conversation_id, &ServerEvent::MessageNew(view.clone()));
    app.notifier.dispatch(
        view.message.clone(),
        view.sender_name.clone().unwrap_or_default(),
        participants,
    );
}

/// sendMessage: persist, broadcast `message:new`, trigger offline pushes.
/// Empty messages are accepted.
pub async fn send_message(session: &Session, req: SendMessageRequest) -> Result<Value> {
    let sender = session.user_id().to_string();
    let (view, participants) = session
        .app
        .store(move |conn| {
            require_participant(conn, &req.conversation_id, &sender)?;
            let reply_to = req.reply_to.filter(|id| !id.is_empty());
            if let Some(reply_to) = &reply_to {
                let quoted = message_store::find_message(conn, reply_to)?;
                if quoted.map_or(true, |q| q.conversation_id != req.conversation_id) {
                    return Err(GatewayError::Invalid(
                        "Reply target is not in this conversation".to_string(),
                    ));
                }
            }
            let record = message_store::insert_message(
                conn,
                NewMessage {
                    conversation_id: req.conversation_id.clone(),
                    sender_id: sender,
                    content: req.content,
                    attachment: req.attachment,
                    reply_to,
                    ..Default::default()
                },
            )?;
            let participants = conversation_store::participant_ids(conn, &req.conversation_id)?;
            let mut view = single_view(conn, record)?;
            view.client_id = req.client_id;
            Ok((view, participants))
        })
        .await?;

    tracing::debug!(
        user_id = %session.user_id(),
        conversation_id = %view.message.conversation_id,
        message_id = %view.message.id,
        "Message sent"
    );
    publish(session, &view, participants);
    Ok(json!({ "data": view }))
}

/// message:forward: copy content and attachment of a visible message into
/// another conversation, recording where it came from.
pub async fn forward_message(session: &Session, req: ForwardRequest) -> Result<Value> {
    let sender = session.user_id().to_string();
    let (view, participants) = session
        .app
        .store(move |conn| {
            let source = message_store::find_message(conn, &req.source_message_id)?
                .filter(|m| !m.is_deleted)
                .ok_or_else(|| GatewayError::NotFound("Source message not found".to_string()))?;
            require_participant(conn, &source.conversation_id, &sender)?;
            require_participant(conn, &req.target_conversation_id, &sender)?;

            let record = message_store::insert_message(
                conn,
                NewMessage {
                    conversation_id: req.target_conversation_id.clone(),
                    sender_id: sender,
                    content: source.content,
                    attachment: source.attachment,
                    reply_to: None,
                    forwarded_from_user: Some(source.sender_id),
                    forwarded_from_chat: Some(source.conversation_id),
                },
            )?;
            let participants = conversation_store::participant_ids(conn, &req.target_conversation_id)?;
            Ok((single_view(conn, record)?, participants))
        })
        .await?;

    publish(session, &view, participants);
    Ok(json!({ "data": view }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::conversations::create_conversation;
    use crate::db::models::ConversationKind;
    use crate::db::open_in_memory;
    use crate::db::users::insert_user;

    #[test]
    fn test_enrich_adds_sender_and_reply_preview() {
        let mut conn = open_in_memory().unwrap();
        let alice = insert_user(&conn, "Alice", "a@example.com", "a.png").unwrap().id;
        let bob = insert_user(&conn, "Bob", "b@example.com", "").unwrap().id;
        let conv = create_conversation(
            &mut conn,
            ConversationKind::Direct,
            None,
            "",
            Some(&alice),
            &[alice.clone(), bob.clone()],
        )
        .unwrap()
        .id;

        let long = "x".repeat(150);
        let quoted = message_store::insert_message(
            &conn,
            NewMessage {
                conversation_id: conv.clone(),
                sender_id: alice.clone(),
                content: Some(long),
                ..Default::default()
            },
        )
        .unwrap();
        let reply = message_store::insert_message(
            &conn,
            NewMessage {
                conversation_id: conv,
                sender_id: bob,
                content: Some("sure".into()),
                reply_to: Some(quoted.id.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        let views = enrich(&conn, vec![quoted, reply]).unwrap();
        assert_eq!(views[0].sender_name.as_deref(), Some("Alice"));
        assert_eq!(views[0].sender_avatar.as_deref(), Some("a.png"));
        assert!(views[0].reply_preview.is_none());

        let preview = views[1].reply_preview.as_ref().unwrap();
        assert_eq!(preview.sender_name.as_deref(), Some("Alice"));
        assert_eq!(preview.content.as_ref().unwrap().chars().count(), 100);
        assert_eq!(views[1].sender_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_view_serializes_flat() {
        let mut conn = open_in_memory().unwrap();
        let alice = insert_user(&conn, "Alice", "a@example.com", "").unwrap().id;
        let conv = create_conversation(
            &mut conn,
            ConversationKind::Group,
            Some("Team"),
            "",
            Some(&alice),
            &[alice.clone()],
        )
        .unwrap()
        .id;
        let record = message_store::insert_message(
            &conn,
            NewMessage {
                conversation_id: conv.clone(),
                sender_id: alice,
                content: Some("hi".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut view = single_view(&conn, record).unwrap();
        view.client_id = Some("tmp-1".into());

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["conversationId"], conv.as_str());
        assert_eq!(value["content"], "hi");
        assert_eq!(value["senderName"], "Alice");
        assert_eq!(value["clientId"], "tmp-1");
        assert!(value["readBy"].as_array().unwrap().is_empty());
        assert!(value.get("forwardedFromUserName").is_none());
    }

    #[test]
    fn test_enrich_skips_reply_from_other_conversation() {
        let mut conn = open_in_memory().unwrap();
        let alice = insert_user(&conn, "Alice", "a@example.com", "").unwrap().id;
        let bob = insert_user(&conn, "Bob", "b@example.com", "").unwrap().id;
        let private = create_conversation(
            &mut conn,
            ConversationKind::Direct,
            None,
            "",
            Some(&alice),
            &[alice.clone(), bob.clone()],
        )
        .unwrap()
        .id;
        let team = create_conversation(
            &mut conn,
            ConversationKind::Group,
            Some("Team"),
            "",
            Some(&alice),
            &[alice.clone(), bob.clone()],
        )
        .unwrap()
        .id;

        let secret = message_store::insert_message(
            &conn,
            NewMessage {
                conversation_id: private,
                sender_id: alice,
                content: Some("secret".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let reply = message_store::insert_message(
            &conn,
            NewMessage {
                conversation_id: team,
                sender_id: bob,
                content: Some("re".into()),
                reply_to: Some(secret.id),
                ..Default::default()
            },
        )
        .unwrap();

        let view = single_view(&conn, reply).unwrap();
        assert!(view.reply_preview.is_none());
    }
}
