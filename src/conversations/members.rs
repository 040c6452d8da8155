//! Group membership changes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthIdentity;
use crate::chat::broadcast;
use crate::db::models::{ConversationKind, ConversationRecord, UserSummary};
use crate::db::{conversations as conversation_store, users as user_store};
use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub members: Vec<String>,
}

/// POST /api/conversations/{id}/members: creator or admins only.
/// New members are invited through their personal room; current subscribers
/// of the conversation receive `conversation:members:added`.
pub async fn add_members(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(conversation_id): Path<String>,
    Json(body): Json<AddMembersRequest>,
) -> Result<Json<ConversationRecord>> {
    let members: Vec<String> = body
        .members
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    if members.is_empty() {
        return Err(GatewayError::Invalid("Missing members".to_string()));
    }

    let caller = identity.id.clone();
    let id = conversation_id.clone();
    let (conversation, added): (ConversationRecord, Vec<UserSummary>) = state
        .store(move |conn| {
            let conversation = conversation_store::get_conversation(conn, &id)?;
            if conversation.kind != ConversationKind::Group {
                return Err(GatewayError::Invalid("Members can only be added to groups".to_string()));
            }
            if !conversation.can_manage(&caller) {
                return Err(GatewayError::Forbidden(
                    "Only the creator or an admin can add members".to_string(),
                ));
            }
            let added = conversation_store::add_members(conn, &id, &members)?;
            let summaries = user_store::summaries_by_ids(conn, &added)?;
            let added = added
                .iter()
                .filter_map(|uid| summaries.get(uid).cloned())
                .collect();
            Ok((conversation_store::get_conversation(conn, &id)?, added))
        })
        .await?;

    if !added.is_empty() {
        for member in &added {
            broadcast::to_user(&state, &member.id, &ServerEvent::InvitedConversation(conversation.clone()));
        }
        broadcast::to_conversation(
            &state,
            &conversation_id,
            &ServerEvent::MembersAdded {
                conversation_id: conversation_id.clone(),
                members: added.clone(),
            },
        );
        tracing::info!(
            user_id = %identity.id,
            conversation_id = %conversation_id,
            added = added.len(),
            "Members added"
        );
    }
    Ok(Json(conversation))
}
