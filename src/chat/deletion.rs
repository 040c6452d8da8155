//! Delete-for-me, delete-for-everyone and undelete.

use serde_json::{json, Value};

use super::{broadcast, require_participant};
use crate::db::{messages as message_store, now_millis};
use crate::error::{GatewayError, Result};
use crate::ws::protocol::{DeleteRequest, DeleteScope, ServerEvent, UndeleteRequest};
use crate::ws::session::Session;

pub async fn delete_messages(session: &Session, req: DeleteRequest) -> Result<Value> {
    match req.scope {
        DeleteScope::Me => delete_for_me(session, req).await,
        DeleteScope::Everyone => delete_for_everyone(session, req).await,
    }
}

/// Hide messages for the caller only. Other participants still see them;
/// clients filter on their own id in `deletedFor`.
async fn delete_for_me(session: &Session, req: DeleteRequest) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let conversation_id = req.conversation_id.clone();
    let ids = req.message_ids.clone();

    let updated = session
        .app
        .store(move |conn| {
            require_participant(conn, &conversation_id, &user_id)?;
            message_store::delete_for_me(conn, &conversation_id, &ids, &user_id)
        })
        .await?;

    broadcast::to_conversation(
        &session.app,
        &req.conversation_id,
        &ServerEvent::MessageDeleted {
            conversation_id: req.conversation_id.clone(),
            message_ids: req.message_ids,
            scope: DeleteScope::Me,
            user_id: session.user_id().to_string(),
        },
    );
    Ok(json!({ "updated": updated }))
}

/// Clear the caller's own recent messages for everyone. Messages that are not
/// the caller's or are past the grace window are skipped; the call fails only
/// if nothing was eligible.
async fn delete_for_everyone(session: &Session, req: DeleteRequest) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let conversation_id = req.conversation_id.clone();
    let ids = req.message_ids.clone();
    let grace_ms = session.app.settings.delete_grace.as_millis() as i64;

    let deleted = session
        .app
        .store(move |conn| {
            require_participant(conn, &conversation_id, &user_id)?;
            message_store::delete_for_everyone(conn, &conversation_id, &ids, &user_id, now_millis(), grace_ms)
        })
        .await?;

    if deleted.is_empty() {
        return Err(GatewayError::Forbidden(
            "Not allowed or time limit exceeded".to_string(),
        ));
    }

    broadcast::to_conversation(
        &session.app,
        &req.conversation_id,
        &ServerEvent::MessageDeleted {
            conversation_id: req.conversation_id.clone(),
            message_ids: deleted.clone(),
            scope: DeleteScope::Everyone,
            user_id: session.user_id().to_string(),
        },
    );
    Ok(json!({ "updated": deleted.len(), "messageIds": deleted }))
}

/// message:undelete: reverse delete-for-me. Deleted-for-everyone messages are untouched.
pub async fn undelete_messages(session: &Session, req: UndeleteRequest) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let conversation_id = req.conversation_id.clone();
    let ids = req.message_ids.clone();

    let updated = session
        .app
        .store(move |conn| {
            require_participant(conn, &conversation_id, &user_id)?;
            message_store::undelete(conn, &conversation_id, &ids, &user_id)
        })
        .await?;

    broadcast::to_conversation(
        &session.app,
        &req.conversation_id,
        &ServerEvent::MessageUndeleted {
            conversation_id: req.conversation_id.clone(),
            message_ids: req.message_ids,
            user_id: session.user_id().to_string(),
        },
    );
    Ok(json!({ "updated": updated }))
}
