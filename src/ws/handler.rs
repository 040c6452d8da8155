use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::{jwt, AuthError, Identity};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing or invalid
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// Token from `?token=` or, failing that, the Authorization header.
fn presented_token(params: &WsAuthQuery, headers: &HeaderMap) -> Option<String> {
    params
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

fn authenticate(state: &AppState, params: &WsAuthQuery, headers: &HeaderMap) -> Result<Identity, AuthError> {
    let raw = presented_token(params, headers).ok_or(AuthError::Missing)?;
    jwt::verify(&state.jwt_secret, &raw)
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. On auth failure, upgrades then immediately
/// closes with the matching close code. On success, runs the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match authenticate(&state, &params, &headers) {
        Ok(identity) => {
            tracing::info!(user_id = %identity.id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, identity))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Invalid { expired: true } => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                AuthError::Invalid { expired: false } => (CLOSE_TOKEN_INVALID, "Token invalid"),
                AuthError::Missing => (CLOSE_TOKEN_INVALID, "No token provided"),
            };

            tracing::warn!(close_code = close_code, reason = reason, "WebSocket auth failed");

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

async fn handle_authenticated(socket: WebSocket, state: AppState, identity: Identity) {
    actor::run_connection(socket, state, identity).await;
}
