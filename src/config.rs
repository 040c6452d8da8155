use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Parley messaging gateway
///
/// Only flags that were actually passed (or set through their env var) are
/// serialized, so unset flags never shadow the TOML file.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "parley-server", version, about = "Parley real-time messaging gateway")]
pub struct Cli {
    /// Port to listen on (default: 3000)
    #[arg(long, env = "PARLEY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long, env = "PARLEY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "PARLEY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Lifetime of issued tokens in days (default: 30)
    #[arg(long, env = "PARLEY_TOKEN_TTL_DAYS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ttl_days: Option<i64>,

    /// Upper bound on a single store call before it is reported as transient (default: 5)
    #[arg(long, env = "PARLEY_STORE_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout_secs: Option<u64>,
}

/// Resolved configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,
    pub token_ttl_days: i64,
    pub store_timeout_secs: u64,

    /// Push notification configuration ([push] section in TOML)
    #[serde(default)]
    pub push: PushConfig,
}

/// Configuration for offline push delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether pushes are sent to the provider (default: false, pushes are only logged)
    #[serde(default)]
    pub enabled: bool,

    /// FCM legacy server key
    #[serde(default)]
    pub fcm_server_key: String,

    /// FCM send endpoint
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,

    /// How long a (recipient, message) pair is remembered as notified (default: 86400 = 24 hours)
    #[serde(default = "default_dedupe_ttl")]
    pub dedupe_ttl_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fcm_server_key: String::new(),
            endpoint: default_push_endpoint(),
            timeout_secs: default_push_timeout(),
            dedupe_ttl_secs: default_dedupe_ttl(),
        }
    }
}

fn default_push_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

fn default_push_timeout() -> u64 {
    10
}

fn default_dedupe_ttl() -> u64 {
    86400
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./parley.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            token_ttl_days: 30,
            store_timeout_secs: 5,
            push: PushConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let file = Toml::file(&cli.config);
        Self::from_layers(cli, file)
    }

    fn from_layers(cli: Cli, file: Data<Toml>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("PARLEY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Messaging Gateway Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Lifetime of issued tokens in days (default: 30)
# token_ttl_days = 30

# Seconds before a store call is reported as transient (default: 5)
# store_timeout_secs = 5

# ---- Push Notifications ----
# Environment overrides use a double underscore: PARLEY_PUSH__ENABLED=true
# [push]

# Send pushes to the provider; when false pushes are only logged
# enabled = false

# FCM legacy server key
# fcm_server_key = ""

# FCM send endpoint
# endpoint = "https://fcm.googleapis.com/fcm/send"

# Per-request timeout in seconds
# timeout_secs = 10

# How long a recipient/message pair is remembered as already notified
# dedupe_ttl_secs = 86400  # 24 hours
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.token_ttl_days, 30);
        assert!(!config.push.enabled);
        assert_eq!(config.push.timeout_secs, 10);
    }

    #[test]
    fn test_push_section_overrides() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string("port = 4100\n[push]\nenabled = true\nfcm_server_key = \"k\"\n"))
            .extract()
            .unwrap();
        assert_eq!(config.port, 4100);
        assert!(config.push.enabled);
        assert_eq!(config.push.fcm_server_key, "k");
        assert_eq!(config.push.dedupe_ttl_secs, 86400);
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let cli = Cli::try_parse_from(["parley-server"]).unwrap();
        let toml = Toml::string("port = 4100\ndata_dir = \"/srv/parley\"\n[push]\nenabled = true\nfcm_server_key = \"k\"\n");
        let config = Config::from_layers(cli, toml).unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.data_dir, "/srv/parley");
        assert!(config.push.enabled);
        assert_eq!(config.push.fcm_server_key, "k");
        assert_eq!(config.token_ttl_days, 30);
        assert!(!config.generate_config);
    }

    #[test]
    fn test_passed_flags_override_file() {
        let cli = Cli::try_parse_from(["parley-server", "--port", "5000", "--json-logs"]).unwrap();
        let toml = Toml::string("port = 4100\njson_logs = false\n[push]\nenabled = true\n");
        let config = Config::from_layers(cli, toml).unwrap();
        assert_eq!(config.port, 5000);
        assert!(config.json_logs);
        assert!(config.push.enabled);
    }
}
