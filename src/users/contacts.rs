//! Contact directory: getContacts over WebSocket, user listing over REST.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::middleware::MaybeIdentity;
use crate::db::models::UserRecord;
use crate::db::users as user_store;
use crate::error::Result;
use crate::state::AppState;
use crate::ws::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
}

impl From<UserRecord> for Contact {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            avatar: user.avatar,
        }
    }
}

async fn load_contacts(state: &AppState, exclude: Option<String>, search: Option<String>) -> Result<Vec<Contact>> {
    state
        .store(move |conn| {
            let users = user_store::list_users(conn, exclude.as_deref(), search.as_deref())?;
            Ok(users.into_iter().map(Contact::from).collect())
        })
        .await
}

/// getContacts: every user except the caller.
pub async fn get_contacts(session: &Session) -> Result<Value> {
    let contacts = load_contacts(&session.app, Some(session.user_id().to_string()), None).await?;
    Ok(json!({ "data": contacts }))
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub search: Option<String>,
}

/// GET /api/users?search=: anonymous callers see everyone; a known caller is excluded.
pub async fn list_users(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Vec<Contact>>> {
    let exclude = identity.map(|i| i.id);
    Ok(Json(load_contacts(&state, exclude, query.search).await?))
}

/// GET /api/users/{id}
pub async fn get_user(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<Contact>> {
    let user = state
        .store(move |conn| user_store::get_user(conn, &user_id))
        .await?;
    Ok(Json(Contact::from(user)))
}
