use axum::{
    extract::State,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::auth::verify;
use crate::conversations::{crud as conversation_crud, members as conversation_members};
use crate::db::{now_millis, users as user_store};
use crate::error::Result;
use crate::state::AppState;
use crate::users::{contacts, profile};
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the identity extractors can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /api/keep-alive: touches the store so an external pinger keeps both warm.
async fn keep_alive(State(state): State<AppState>) -> Result<Json<Value>> {
    state.store(|conn| user_store::ping(conn)).await?;
    Ok(Json(json!({
        "ok": true,
        "timestamp": now_millis(),
        "online": state.presence.online_users().len(),
    })))
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on the token verification endpoint
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/auth/verify", post(verify::verify_token))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let user_routes = Router::new()
        .route("/api/users", get(contacts::list_users))
        .route(
            "/api/users/push-token",
            post(profile::register_push_token).delete(profile::remove_push_token),
        )
        .route("/api/users/{id}", get(contacts::get_user));

    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            post(conversation_crud::create_conversation).get(conversation_crud::list_conversations),
        )
        .route("/api/conversations/{id}", put(conversation_crud::update_conversation))
        .route(
            "/api/conversations/{id}/members",
            post(conversation_members::add_members),
        );

    Router::new()
        .route("/health", get(health))
        .route("/api/keep-alive", get(keep_alive))
        .route("/ws", get(ws_handler::ws_upgrade))
        .merge(auth_routes)
        .merge(user_routes)
        .merge(conversation_routes)
        .layer(middleware::from_fn_with_state(state.clone(), inject_jwt_secret))
        .with_state(state)
}
