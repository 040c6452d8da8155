//! Message store.
//!
//! Every mutation pushes its eligibility condition into the SQL statement
//! itself (sender exclusion for read receipts, owner and grace window for
//! delete-for-everyone, not-deleted for undelete) so concurrent calls from
//! several devices of one user cannot race a read-then-write.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{MessageRecord, NewMessage};
use super::{conversations, new_id, now_millis};
use crate::error::{GatewayError, Result};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, attachment, reply_to,
    forwarded_from_user, forwarded_from_chat, is_deleted, deleted_at, created_at, updated_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        attachment: row.get(4)?,
        reply_to: row.get(5)?,
        forwarded_from_user: row.get(6)?,
        forwarded_from_chat: row.get(7)?,
        is_deleted: row.get::<_, i64>(8)? != 0,
        deleted_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        read_by: Vec::new(),
        deleted_for: Vec::new(),
    })
}

fn load_sets(conn: &Connection, message: &mut MessageRecord) -> Result<()> {
    let mut reads = conn.prepare_cached(
        "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at, user_id",
    )?;
    message.read_by = reads
        .query_map(params![message.id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut deletions = conn.prepare_cached(
        "SELECT user_id FROM message_deletions WHERE message_id = ?1 ORDER BY deleted_at, user_id",
    )?;
    message.deleted_for = deletions
        .query_map(params![message.id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(())
}

/// Create a message stamped with the current time.
pub fn insert_message(conn: &Connection, new: NewMessage) -> Result<MessageRecord> {
    insert_message_at(conn, new, now_millis())
}

/// Create a message with an explicit creation time and point the conversation at it.
pub fn insert_message_at(conn: &Connection, new: NewMessage, created_at: i64) -> Result<MessageRecord> {
    if !conversations::exists(conn, &new.conversation_id)? {
        return Err(GatewayError::NotFound("Conversation not found".to_string()));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, attachment, reply_to,
                               forwarded_from_user, forwarded_from_chat, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            new.conversation_id,
            new.sender_id,
            new.content,
            new.attachment,
            new.reply_to,
            new.forwarded_from_user,
            new.forwarded_from_chat,
            created_at,
        ],
    )?;
    conversations::touch_last_message(conn, &new.conversation_id, &id, created_at)?;

    Ok(MessageRecord {
        id,
        conversation_id: new.conversation_id,
        sender_id: new.sender_id,
        content: new.content,
        attachment: new.attachment,
        reply_to: new.reply_to,
        forwarded_from_user: new.forwarded_from_user,
        forwarded_from_chat: new.forwarded_from_chat,
        read_by: Vec::new(),
        deleted_for: Vec::new(),
        is_deleted: false,
        deleted_at: None,
        created_at,
        updated_at: created_at,
    })
}

pub fn find_message(conn: &Connection, message_id: &str) -> Result<Option<MessageRecord>> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![message_id],
            message_from_row,
        )
        .optional()?;
    match found {
        Some(mut message) => {
            load_sets(conn, &mut message)?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

pub fn get_message(conn: &Connection, message_id: &str) -> Result<MessageRecord> {
    find_message(conn, message_id)?
        .ok_or_else(|| GatewayError::NotFound("Message not found".to_string()))
}

/// The newest `limit` messages of a conversation, returned oldest first.
pub fn recent_messages(conn: &Connection, conversation_id: &str, limit: u32) -> Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {cols} FROM (
             SELECT rowid AS seq, {cols} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT ?2
         )
         ORDER BY created_at ASC, seq ASC",
        cols = MESSAGE_COLUMNS
    ))?;
    let mut messages = stmt
        .query_map(params![conversation_id, limit], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for message in &mut messages {
        load_sets(conn, message)?;
    }
    Ok(messages)
}

/// Add `reader` to the message's read-by set. Senders never enter their own
/// read-by set. Returns whether the set changed.
pub fn mark_read(conn: &Connection, conversation_id: &str, message_id: &str, reader: &str) -> Result<bool> {
    let known = conn
        .query_row(
            "SELECT 1 FROM messages WHERE id = ?1 AND conversation_id = ?2",
            params![message_id, conversation_id],
            |_| Ok(()),
        )
        .optional()?;
    if known.is_none() {
        return Err(GatewayError::NotFound("Message not found".to_string()));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
         SELECT id, ?3, ?4 FROM messages
         WHERE id = ?1 AND conversation_id = ?2 AND sender_id != ?3",
        params![message_id, conversation_id, reader, now_millis()],
    )?;
    Ok(inserted > 0)
}

/// Mark every message in the conversation not sent by `reader` as read.
/// Returns the number of messages whose read-by set changed.
pub fn mark_conversation_read(conn: &Connection, conversation_id: &str, reader: &str) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
         SELECT id, ?2, ?3 FROM messages
         WHERE conversation_id = ?1 AND sender_id != ?2",
        params![conversation_id, reader, now_millis()],
    )?;
    Ok(inserted)
}

/// Hide messages for `user` only. Applies regardless of sender.
pub fn delete_for_me(
    conn: &mut Connection,
    conversation_id: &str,
    message_ids: &[String],
    user: &str,
) -> Result<usize> {
    let now = now_millis();
    let tx = conn.transaction()?;
    let mut updated = 0;
    for message_id in message_ids {
        updated += tx.execute(
            "INSERT OR IGNORE INTO message_deletions (message_id, user_id, deleted_at)
             SELECT id, ?3, ?4 FROM messages WHERE id = ?1 AND conversation_id = ?2",
            params![message_id, conversation_id, user, now],
        )?;
    }
    tx.commit()?;
    Ok(updated)
}

/// Delete the caller's own messages for all participants, limited to messages
/// created within `grace_ms` of `now`. Ineligible ids are skipped.
/// Returns the ids that were actually deleted.
pub fn delete_for_everyone(
    conn: &mut Connection,
    conversation_id: &str,
    message_ids: &[String],
    user: &str,
    now: i64,
    grace_ms: i64,
) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let mut deleted = Vec::new();
    for message_id in message_ids {
        let changed = tx.execute(
            "UPDATE messages
             SET is_deleted = 1, deleted_at = ?4, content = NULL, attachment = NULL, updated_at = ?4
             WHERE id = ?1 AND conversation_id = ?2 AND sender_id = ?3
               AND is_deleted = 0 AND created_at >= ?4 - ?5",
            params![message_id, conversation_id, user, now, grace_ms],
        )?;
        if changed > 0 {
            deleted.push(message_id.clone());
        }
    }
    tx.commit()?;
    Ok(deleted)
}

/// Reverse delete-for-me. Messages deleted for everyone stay deleted.
pub fn undelete(
    conn: &mut Connection,
    conversation_id: &str,
    message_ids: &[String],
    user: &str,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut updated = 0;
    for message_id in message_ids {
        updated += tx.execute(
            "DELETE FROM message_deletions
             WHERE message_id = ?1 AND user_id = ?3
               AND EXISTS (SELECT 1 FROM messages
                           WHERE id = ?1 AND conversation_id = ?2 AND is_deleted = 0)",
            params![message_id, conversation_id, user],
        )?;
    }
    tx.commit()?;
    Ok(updated)
}
