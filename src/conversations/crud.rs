//! REST endpoints for creating, listing and editing conversations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::{AuthIdentity, MaybeIdentity};
use crate::chat::broadcast;
use crate::db::conversations as conversation_store;
use crate::db::models::{ConversationKind, ConversationRecord};
use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Name given to groups created without one.
const DEFAULT_GROUP_NAME: &str = "New Group";

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// POST /api/conversations
/// Direct: exactly two distinct users including the caller; an existing
/// direct conversation between them is returned instead of a new one.
/// Group: the caller is always a participant and becomes admin.
pub async fn create_conversation(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationRecord>)> {
    let identity = identity.require()?;
    let caller = identity.id.clone();

    let mut participants: Vec<String> = body
        .participants
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if !participants.contains(&caller) {
        participants.push(caller.clone());
    }
    participants.sort();
    participants.dedup();

    match body.kind {
        ConversationKind::Direct => {
            if participants.len() != 2 {
                return Err(GatewayError::Invalid(
                    "Direct conversations need exactly two participants".to_string(),
                ));
            }
            let (created, conversation) = state
                .store(move |conn| {
                    let (a, b) = (&participants[0], &participants[1]);
                    for user_id in [a, b] {
                        crate::db::users::get_user(conn, user_id)?;
                    }
                    if let Some(existing) = conversation_store::find_direct(conn, a, b)? {
                        return Ok((false, existing));
                    }
                    let avatar = body.avatar.unwrap_or_default();
                    let created = conversation_store::create_conversation(
                        conn,
                        ConversationKind::Direct,
                        None,
                        &avatar,
                        Some(&caller),
                        &participants,
                    )?;
                    Ok((true, created))
                })
                .await?;

            let status = if created { StatusCode::CREATED } else { StatusCode::OK };
            Ok((status, Json(conversation)))
        }
        ConversationKind::Group => {
            let name = body
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());
            let avatar = body.avatar.unwrap_or_default();

            let conversation = state
                .store(move |conn| {
                    for user_id in &participants {
                        crate::db::users::get_user(conn, user_id)?;
                    }
                    conversation_store::create_conversation(
                        conn,
                        ConversationKind::Group,
                        Some(&name),
                        &avatar,
                        Some(&caller),
                        &participants,
                    )
                })
                .await?;

            for participant in conversation.participant_ids() {
                if participant != identity.id {
                    broadcast::to_user(
                        &state,
                        &participant,
                        &ServerEvent::InvitedConversation(conversation.clone()),
                    );
                }
            }
            tracing::info!(
                user_id = %identity.id,
                conversation_id = %conversation.id,
                participants = conversation.participants.len(),
                "Group created"
            );
            Ok((StatusCode::CREATED, Json(conversation)))
        }
    }
}

/// GET /api/conversations: the caller's conversations, most recently active
/// first. Direct conversations are named after the other participant.
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<Vec<ConversationRecord>>> {
    let user_id = identity.id.clone();
    let mut conversations = state
        .store(move |conn| conversation_store::list_for_user(conn, &user_id))
        .await?;

    for conversation in conversations.iter_mut() {
        if conversation.kind == ConversationKind::Direct {
            if let Some(other) = conversation.participants.iter().find(|p| p.id != identity.id) {
                conversation.name = Some(other.name.clone());
                if conversation.avatar.is_empty() {
                    conversation.avatar = other.avatar.clone();
                }
            }
        }
    }
    Ok(Json(conversations))
}

/// PUT /api/conversations/{id}: group name/avatar; creator or admins only.
pub async fn update_conversation(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(conversation_id): Path<String>,
    Json(body): Json<UpdateConversationRequest>,
) -> Result<Json<ConversationRecord>> {
    let caller = identity.id.clone();
    let updated = state
        .store(move |conn| {
            let conversation = conversation_store::get_conversation(conn, &conversation_id)?;
            if conversation.kind != ConversationKind::Group {
                return Err(GatewayError::Invalid("Only groups can be renamed".to_string()));
            }
            if !conversation.can_manage(&caller) {
                return Err(GatewayError::Forbidden(
                    "Only the creator or an admin can edit this group".to_string(),
                ));
            }
            let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
            conversation_store::update_details(conn, &conversation_id, name, body.avatar.as_deref())
        })
        .await?;
    Ok(Json(updated))
}
