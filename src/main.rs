use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use parley_server::auth;
use parley_server::config::{generate_config_template, Config};
use parley_server::db;
use parley_server::notify::dedupe::{self, DedupeCache};
use parley_server::notify::push::{FcmPushProvider, LogPushProvider, PushProvider};
use parley_server::routes;
use parley_server::state::{AppState, GatewaySettings};

fn push_provider(config: &Config) -> Result<Arc<dyn PushProvider>, Box<dyn std::error::Error>> {
    let push = &config.push;
    if !push.enabled {
        tracing::info!("Push delivery disabled, offline notifications will only be logged");
        return Ok(Arc::new(LogPushProvider));
    }
    let provider = FcmPushProvider::new(
        push.endpoint.clone(),
        push.fcm_server_key.clone(),
        Duration::from_secs(push.timeout_secs),
    )?;
    tracing::info!(endpoint = %push.endpoint, "FCM push delivery enabled");
    Ok(Arc::new(provider))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("parley_server=info"))?;
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Parley server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let provider = push_provider(&config)?;
    let dedupe_ttl = Duration::from_secs(config.push.dedupe_ttl_secs);
    let dedupe_cache = DedupeCache::new(dedupe_ttl);
    dedupe::spawn_sweeper(dedupe_cache.clone(), dedupe_ttl.clamp(Duration::from_secs(1), Duration::from_secs(3600)));

    let settings = GatewaySettings {
        token_ttl_days: config.token_ttl_days,
        store_timeout: Duration::from_secs(config.store_timeout_secs),
        ..GatewaySettings::default()
    };
    let app_state = AppState::new(db, jwt_secret, settings, provider, dedupe_cache);

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
