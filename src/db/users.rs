//! User store: profile reads/updates and push device tokens.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::models::{UserRecord, UserSummary};
use super::{new_id, now_millis};
use crate::error::{GatewayError, Result};

const USER_COLUMNS: &str = "id, name, email, avatar, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Insert a user record. Emails are stored trimmed and lowercased.
pub fn insert_user(conn: &Connection, name: &str, email: &str, avatar: &str) -> Result<UserRecord> {
    let id = new_id();
    let now = now_millis();
    let email = email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, name, email, avatar, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, name, email, avatar, now],
    )?;

    Ok(UserRecord {
        id,
        name: name.to_string(),
        email,
        avatar: avatar.to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<UserRecord> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| GatewayError::NotFound("User not found".to_string()))
}

/// List users, optionally excluding one id and filtering by name/email substring.
pub fn list_users(
    conn: &Connection,
    exclude: Option<&str>,
    search: Option<&str>,
) -> Result<Vec<UserRecord>> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users
         WHERE (?1 IS NULL OR id != ?1)
           AND (?2 IS NULL OR lower(name) LIKE ?2 OR email LIKE ?2)
         ORDER BY name COLLATE NOCASE",
        USER_COLUMNS
    ))?;

    let users = stmt
        .query_map(params![exclude, pattern], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

/// Batch identity lookup used to enrich message lists.
pub fn summaries_by_ids(conn: &Connection, ids: &[String]) -> Result<HashMap<String, UserSummary>> {
    let mut stmt = conn.prepare_cached("SELECT id, name, avatar FROM users WHERE id = ?1")?;
    let mut out = HashMap::with_capacity(ids.len());
    for id in ids {
        if out.contains_key(id) {
            continue;
        }
        let summary = stmt
            .query_row(params![id], |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    avatar: row.get(2)?,
                })
            })
            .optional()?;
        if let Some(summary) = summary {
            out.insert(id.clone(), summary);
        }
    }
    Ok(out)
}

/// Update the provided profile fields and return the new record.
pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    name: Option<&str>,
    avatar: Option<&str>,
) -> Result<UserRecord> {
    let changed = conn.execute(
        "UPDATE users
         SET name = COALESCE(?2, name), avatar = COALESCE(?3, avatar), updated_at = ?4
         WHERE id = ?1",
        params![user_id, name, avatar, now_millis()],
    )?;
    if changed == 0 {
        return Err(GatewayError::NotFound("User not found".to_string()));
    }
    get_user(conn, user_id)
}

/// Register a device token. Returns false if it was already registered.
pub fn add_push_token(conn: &Connection, user_id: &str, token: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO user_push_tokens (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, now_millis()],
    )?;
    Ok(inserted > 0)
}

pub fn remove_push_token(conn: &Connection, user_id: &str, token: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM user_push_tokens WHERE user_id = ?1 AND token = ?2",
        params![user_id, token],
    )?;
    Ok(removed > 0)
}

pub fn push_tokens(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT token FROM user_push_tokens WHERE user_id = ?1 AND token != '' ORDER BY created_at",
    )?;
    let tokens = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tokens)
}

/// Lightweight liveness probe for the keep-alive endpoint.
pub fn ping(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}
