use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::chat::presence::PresenceRegistry;
use crate::db::{self, DbPool};
use crate::error::Result;
use crate::notify::dedupe::DedupeCache;
use crate::notify::push::PushProvider;
use crate::notify::OfflineNotifier;
use crate::ws::rooms::RoomRegistry;
use crate::ws::ConnectionRegistry;

/// Tunables the handlers read at runtime.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Lifetime of tokens issued by updateProfile.
    pub token_ttl_days: i64,
    /// Upper bound on a single store call.
    pub store_timeout: Duration,
    /// Number of messages returned when joining a conversation.
    pub history_limit: u32,
    /// Window after creation in which a sender may delete for everyone.
    pub delete_grace: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            token_ttl_days: 30,
            store_timeout: Duration::from_secs(5),
            history_limit: 200,
            delete_grace: Duration::from_secs(2 * 60),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live connection count per user
    pub presence: PresenceRegistry,
    /// Room key -> subscribed sessions
    pub rooms: RoomRegistry,
    /// Every active WebSocket session
    pub connections: ConnectionRegistry,
    /// Offline push dispatch
    pub notifier: OfflineNotifier,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    /// Wire the registries and the notifier together around one presence registry.
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        settings: GatewaySettings,
        provider: Arc<dyn PushProvider>,
        dedupe: DedupeCache,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let notifier = OfflineNotifier::new(
            db.clone(),
            presence.clone(),
            dedupe,
            provider,
            settings.store_timeout,
        );
        Self {
            db,
            jwt_secret,
            presence,
            rooms: RoomRegistry::new(),
            connections: crate::ws::new_connection_registry(),
            notifier,
            settings: Arc::new(settings),
        }
    }

    /// Run a store operation on the blocking pool under the configured timeout.
    pub async fn store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        db::run(&self.db, self.settings.store_timeout, f).await
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let conn = db::open_in_memory().expect("in-memory db");
    AppState::new(
        Arc::new(std::sync::Mutex::new(conn)),
        b"test-secret-test-secret-test-sec".to_vec(),
        GatewaySettings::default(),
        Arc::new(crate::notify::push::LogPushProvider),
        DedupeCache::new(Duration::from_secs(60)),
    )
}
