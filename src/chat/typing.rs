//! Ephemeral typing indicators. Nothing is persisted.

use serde_json::Value;

use super::broadcast;
use crate::error::{GatewayError, Result};
use crate::ws::broadcast::conversation_room;
use crate::ws::protocol::{ConversationRef, ServerEvent};
use crate::ws::session::Session;

fn ensure_subscribed(session: &Session, conversation_id: &str) -> Result<()> {
    if !session.joined_rooms().contains(&conversation_room(conversation_id)) {
        return Err(GatewayError::Forbidden("Join the conversation first".to_string()));
    }
    Ok(())
}

pub fn typing(session: &Session, req: ConversationRef) -> Result<Value> {
    ensure_subscribed(session, &req.conversation_id)?;
    broadcast::to_conversation_except(
        &session.app,
        &req.conversation_id,
        &ServerEvent::Typing {
            conversation_id: req.conversation_id.clone(),
            user_id: session.user_id().to_string(),
            name: session.identity.name.clone(),
        },
        session.id,
    );
    Ok(Value::Null)
}

pub fn stop_typing(session: &Session, req: ConversationRef) -> Result<Value> {
    ensure_subscribed(session, &req.conversation_id)?;
    broadcast::to_conversation_except(
        &session.app,
        &req.conversation_id,
        &ServerEvent::StopTyping {
            conversation_id: req.conversation_id.clone(),
            user_id: session.user_id().to_string(),
        },
        session.id,
    );
    Ok(Value::Null)
}
