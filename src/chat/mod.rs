//! Messaging core: the handlers behind the session-scoped WebSocket events.
//!
//! Every handler runs against an Active session, performs its store work in a
//! single `AppState::store` call and only broadcasts once that call succeeded.

pub mod broadcast;
pub mod conversations;
pub mod deletion;
pub mod messages;
pub mod presence;
pub mod receipts;
pub mod typing;

use rusqlite::Connection;

use crate::db::conversations as conversation_store;
use crate::error::{GatewayError, Result};

/// `NotFound` if the conversation is absent, `Forbidden` if `user_id` is not in it.
pub(crate) fn require_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<()> {
    if !conversation_store::exists(conn, conversation_id)? {
        return Err(GatewayError::NotFound("Conversation not found".to_string()));
    }
    let participants = conversation_store::participant_ids(conn, conversation_id)?;
    if !participants.iter().any(|p| p == user_id) {
        return Err(GatewayError::Forbidden("Not a participant of this conversation".to_string()));
    }
    Ok(())
}
