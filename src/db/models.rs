//! Record types for the durable stores.
//! These correspond to the SQLite schema defined in migrations.rs and are
//! serialized directly onto the wire (camelCase, matching the client protocol).

use serde::{Deserialize, Serialize};

/// User record. Credentials live with the external auth collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Public projection of a user, used for contacts and participant lists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Member,
    Moderator,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "moderator" => Self::Moderator,
            _ => Self::Member,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar: String,
    pub created_by: Option<String>,
    pub last_message: Option<String>,
    pub participants: Vec<Participant>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationRecord {
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }

    /// Creator or admin: may edit group details and add members.
    pub fn can_manage(&self, user_id: &str) -> bool {
        self.created_by.as_deref() == Some(user_id)
            || self
                .participants
                .iter()
                .any(|p| p.id == user_id && p.role == ParticipantRole::Admin)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub reply_to: Option<String>,
    pub forwarded_from_user: Option<String>,
    #[serde(rename = "forwardedFromChatId")]
    pub forwarded_from_chat: Option<String>,
    pub read_by: Vec<String>,
    pub deleted_for: Vec<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied when creating a message (send or forward).
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub reply_to: Option<String>,
    pub forwarded_from_user: Option<String>,
    pub forwarded_from_chat: Option<String>,
}
