pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod rooms;
pub mod session;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Identifies one live connection. A user with two devices has two sessions.
pub type SessionId = uuid::Uuid;

/// Connection registry: every active session, keyed by session id.
/// Used for process-wide broadcasts such as presence changes.
pub type ConnectionRegistry = Arc<DashMap<SessionId, ConnectionSender>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
