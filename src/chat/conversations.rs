//! Conversation room membership for a session: join (with history), leave,
//! subscribe and unsubscribe.

use serde_json::{json, Value};

use super::messages::enrich;
use crate::db::{conversations as conversation_store, messages as message_store};
use crate::error::{GatewayError, Result};
use crate::ws::broadcast::conversation_room;
use crate::ws::protocol::{ConversationRef, ServerEvent};
use crate::ws::session::Session;

/// joinConversation: subscribe to the room and return the recent history,
/// oldest first. The same payload is also emitted as `conversation:joined`.
pub async fn join_conversation(session: &mut Session, req: ConversationRef) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let limit = session.app.settings.history_limit;
    let conversation_id = req.conversation_id.clone();

    let (conversation, messages) = session
        .app
        .store(move |conn| {
            let conversation = conversation_store::get_conversation(conn, &conversation_id)?;
            if !conversation.is_participant(&user_id) {
                return Err(GatewayError::Forbidden(
                    "Not a participant of this conversation".to_string(),
                ));
            }
            let records = message_store::recent_messages(conn, &conversation_id, limit)?;
            Ok((conversation, enrich(conn, records)?))
        })
        .await?;

    session.join_room(&conversation_room(&req.conversation_id));
    session.send(&ServerEvent::ConversationJoined {
        conversation: conversation.clone(),
        messages: messages.clone(),
    });

    tracing::debug!(
        user_id = %session.user_id(),
        conversation_id = %req.conversation_id,
        messages = messages.len(),
        "Joined conversation"
    );
    Ok(json!({ "conversation": conversation, "messages": messages }))
}

pub async fn leave_conversation(session: &mut Session, req: ConversationRef) -> Result<Value> {
    session.leave_room(&conversation_room(&req.conversation_id));
    Ok(Value::Null)
}

/// conversation:subscribe: join the room without fetching history.
pub async fn subscribe(session: &mut Session, req: ConversationRef) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let conversation_id = req.conversation_id.clone();
    session
        .app
        .store(move |conn| super::require_participant(conn, &conversation_id, &user_id))
        .await?;

    session.join_room(&conversation_room(&req.conversation_id));
    Ok(Value::Null)
}

pub async fn unsubscribe(session: &mut Session, req: ConversationRef) -> Result<Value> {
    session.leave_room(&conversation_room(&req.conversation_id));
    Ok(Value::Null)
}
