//! Read receipts.

use serde_json::{json, Value};

use super::{broadcast, require_participant};
use crate::db::messages as message_store;
use crate::error::Result;
use crate::ws::protocol::{ConversationRef, MarkReadRequest, ServerEvent};
use crate::ws::session::Session;

/// message:read: add the caller to the message's read-by set. The sender is
/// never added; repeated calls are no-ops and do not re-broadcast.
pub async fn mark_message_read(session: &Session, req: MarkReadRequest) -> Result<Value> {
    let reader = session.user_id().to_string();
    let (conversation_id, message_id) = (req.conversation_id.clone(), req.message_id.clone());

    let changed = session
        .app
        .store(move |conn| {
            require_participant(conn, &conversation_id, &reader)?;
            message_store::mark_read(conn, &conversation_id, &message_id, &reader)
        })
        .await?;

    if changed {
        broadcast::to_conversation(
            &session.app,
            &req.conversation_id,
            &ServerEvent::MessageRead {
                conversation_id: req.conversation_id.clone(),
                message_id: req.message_id.clone(),
                user_id: session.user_id().to_string(),
            },
        );
    }
    Ok(json!({ "updated": usize::from(changed) }))
}

/// conversation:markRead: mark everything the caller has not sent as read.
pub async fn mark_conversation_read(session: &Session, req: ConversationRef) -> Result<Value> {
    let reader = session.user_id().to_string();
    let conversation_id = req.conversation_id.clone();

    let updated = session
        .app
        .store(move |conn| {
            require_participant(conn, &conversation_id, &reader)?;
            message_store::mark_conversation_read(conn, &conversation_id, &reader)
        })
        .await?;

    broadcast::to_conversation(
        &session.app,
        &req.conversation_id,
        &ServerEvent::ConversationRead {
            conversation_id: req.conversation_id.clone(),
            user_id: session.user_id().to_string(),
        },
    );
    Ok(json!({ "updated": updated }))
}
