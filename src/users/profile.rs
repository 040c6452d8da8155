//! Profile updates and push device token registration.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::jwt;
use crate::auth::middleware::AuthIdentity;
use crate::db::users as user_store;
use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::ws::protocol::UpdateProfileRequest;
use crate::ws::session::Session;

/// updateProfile: apply the provided fields and return the new record with a
/// freshly issued token carrying the updated identity.
pub async fn update_profile(session: &mut Session, req: UpdateProfileRequest) -> Result<Value> {
    let user_id = session.user_id().to_string();
    let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let avatar = req.avatar;

    let user = session
        .app
        .store(move |conn| user_store::update_profile(conn, &user_id, name.as_deref(), avatar.as_deref()))
        .await?;

    let token = jwt::issue_token(&session.app.jwt_secret, &user, session.app.settings.token_ttl_days)
        .map_err(|e| GatewayError::Transient(format!("Token issue failed: {}", e)))?;

    session.identity = jwt::Identity::from(&user);
    tracing::info!(user_id = %user.id, "Profile updated");
    Ok(json!({ "user": user, "token": token }))
}

#[derive(Debug, Deserialize)]
pub struct PushTokenRequest {
    pub token: String,
}

/// POST /api/users/push-token
pub async fn register_push_token(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(body): Json<PushTokenRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let token = body.token.trim().to_string();
    if token.is_empty() {
        return Err(GatewayError::Invalid("Missing token".to_string()));
    }

    let added = state
        .store(move |conn| {
            user_store::get_user(conn, &identity.id)?;
            user_store::add_push_token(conn, &identity.id, &token)
        })
        .await?;

    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "success": true, "added": added }))))
}

/// DELETE /api/users/push-token
pub async fn remove_push_token(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(body): Json<PushTokenRequest>,
) -> Result<Json<Value>> {
    let token = body.token;
    let removed = state
        .store(move |conn| user_store::remove_push_token(conn, &identity.id, &token))
        .await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}
