//! Conversation store: records, participants and roles.

use rusqlite::{params, Connection, OptionalExtension};

use super::models::{ConversationKind, ConversationRecord, Participant, ParticipantRole};
use super::{new_id, now_millis};
use crate::error::{GatewayError, Result};

fn not_found() -> GatewayError {
    GatewayError::NotFound("Conversation not found".to_string())
}

/// Create a conversation with the given participants.
/// For groups the creator is recorded as admin.
pub fn create_conversation(
    conn: &mut Connection,
    kind: ConversationKind,
    name: Option<&str>,
    avatar: &str,
    created_by: Option<&str>,
    participants: &[String],
) -> Result<ConversationRecord> {
    let id = new_id();
    let now = now_millis();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO conversations (id, kind, name, avatar, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, kind.as_str(), name, avatar, created_by, now],
    )?;
    for user_id in participants {
        let role = if kind == ConversationKind::Group && created_by == Some(user_id.as_str()) {
            ParticipantRole::Admin
        } else {
            ParticipantRole::Member
        };
        tx.execute(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, role.as_str(), now],
        )?;
    }
    tx.commit()?;

    get_conversation(conn, &id)
}

pub fn get_conversation(conn: &Connection, conversation_id: &str) -> Result<ConversationRecord> {
    let row = conn
        .query_row(
            "SELECT id, kind, name, avatar, created_by, last_message_id, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(not_found)?;

    let (id, kind, name, avatar, created_by, last_message, created_at, updated_at) = row;
    let kind = ConversationKind::parse(&kind)
        .ok_or_else(|| GatewayError::Transient(format!("Corrupt conversation kind: {}", kind)))?;

    Ok(ConversationRecord {
        participants: participants(conn, &id)?,
        id,
        kind,
        name,
        avatar,
        created_by,
        last_message,
        created_at,
        updated_at,
    })
}

fn participants(conn: &Connection, conversation_id: &str) -> Result<Vec<Participant>> {
    let mut stmt = conn.prepare_cached(
        "SELECT u.id, u.name, u.avatar, p.role
         FROM conversation_participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.conversation_id = ?1
         ORDER BY p.joined_at, u.id",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok(Participant {
                id: row.get(0)?,
                name: row.get(1)?,
                avatar: row.get(2)?,
                role: ParticipantRole::parse(&row.get::<_, String>(3)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Participant ids only; used on the hot path of offline dispatch.
pub fn participant_ids(conn: &Connection, conversation_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
    )?;
    let ids = stmt
        .query_map(params![conversation_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn exists(conn: &Connection, conversation_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            params![conversation_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Find the direct conversation between exactly these two users, if any.
pub fn find_direct(conn: &Connection, a: &str, b: &str) -> Result<Option<ConversationRecord>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT c.id FROM conversations c
             WHERE c.kind = 'direct'
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = c.id AND p.user_id = ?1)
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = c.id AND p.user_id = ?2)
               AND (SELECT COUNT(*) FROM conversation_participants p
                    WHERE p.conversation_id = c.id) = 2
             ORDER BY c.created_at
             LIMIT 1",
            params![a, b],
            |row| row.get(0),
        )
        .optional()?;

    id.map(|id| get_conversation(conn, &id)).transpose()
}

/// Conversations the user participates in, most recently active first.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<ConversationRecord>> {
    let ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT c.id FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.updated_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        rows
    };
    ids.iter().map(|id| get_conversation(conn, id)).collect()
}

/// Point the conversation at its newest message and bump its activity time.
pub fn touch_last_message(conn: &Connection, conversation_id: &str, message_id: &str, at: i64) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![conversation_id, message_id, at],
    )?;
    Ok(())
}

pub fn update_details(
    conn: &Connection,
    conversation_id: &str,
    name: Option<&str>,
    avatar: Option<&str>,
) -> Result<ConversationRecord> {
    let changed = conn.execute(
        "UPDATE conversations
         SET name = COALESCE(?2, name), avatar = COALESCE(?3, avatar), updated_at = ?4
         WHERE id = ?1",
        params![conversation_id, name, avatar, now_millis()],
    )?;
    if changed == 0 {
        return Err(not_found());
    }
    get_conversation(conn, conversation_id)
}

/// Add members; returns the ids that were not already participants.
/// Unknown user ids fail the whole call with `NotFound`.
pub fn add_members(conn: &mut Connection, conversation_id: &str, user_ids: &[String]) -> Result<Vec<String>> {
    let now = now_millis();
    let tx = conn.transaction()?;
    let mut added = Vec::new();
    for user_id in user_ids {
        let known = tx
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![user_id], |_| Ok(()))
            .optional()?;
        if known.is_none() {
            return Err(GatewayError::NotFound(format!("User {} not found", user_id)));
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'member', ?3)",
            params![conversation_id, user_id, now],
        )?;
        if inserted > 0 {
            added.push(user_id.clone());
        }
    }
    tx.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        params![conversation_id, now],
    )?;
    tx.commit()?;
    Ok(added)
}
