pub mod conversations;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so the connection is wrapped in Arc<Mutex> and used
/// from tokio::task::spawn_blocking (see `run`).
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> std::result::Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("parley.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a migrated in-memory database. Used by tests and throwaway instances.
pub fn open_in_memory() -> std::result::Result<Connection, Box<dyn std::error::Error>> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(conn)
}

/// Run a store operation on the blocking pool while holding the connection lock.
///
/// The whole closure executes under the lock, so every call is atomic with
/// respect to other store calls. A call that does not finish within `timeout`
/// surfaces as `Transient`; the blocking task itself still runs to completion.
pub async fn run<T, F>(db: &DbPool, timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| GatewayError::Transient("DB lock poisoned".to_string()))?;
        f(&mut conn)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(GatewayError::Transient(format!("Task join: {}", e))),
        Err(_) => Err(GatewayError::Transient("Store call timed out".to_string())),
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a new time-ordered record id.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
