//! POST /api/auth/verify: hard-verify a bearer token and return its user.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::middleware::AuthIdentity;
use crate::db::users as user_store;
use crate::error::Result;
use crate::state::AppState;

pub async fn verify_token(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<Value>> {
    let user = state
        .store(move |conn| user_store::get_user(conn, &identity.id))
        .await?;
    Ok(Json(json!({ "success": true, "user": user })))
}
