//! Startup configuration.
//!
//! Tunables come from an optional TOML file (`VaultSettings`); secrets come
//! from the environment (`Secrets`). Both are read once in `main` and passed
//! explicitly to the components that need them — nothing in the core reads
//! ambient state.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete tunable configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultSettings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Credential database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "vault.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Token renewal policy
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// Lookahead window for selecting records to renew (days).
    /// Wide on purpose: a missed sweep cycle must never let a token lapse.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// How often the background sweep enqueues a renewal batch (minutes).
    /// 0 disables the sweep; batches can still be triggered via the admin API.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
}

fn default_window_days() -> i64 {
    7
}

fn default_sweep_interval() -> u64 {
    1440
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            sweep_interval_minutes: default_sweep_interval(),
        }
    }
}

/// Chat-platform endpoint configuration.
///
/// Defaults target Discord; overridable so tests can point every client at a
/// mock server.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL for REST calls (profile fetch, guild member add)
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// OAuth authorization endpoint (user-facing redirect target)
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// OAuth token endpoint (code and refresh grants)
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Per-call timeout for all outbound platform requests (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api".to_string()
}

fn default_authorize_url() -> String {
    "https://discord.com/api/oauth2/authorize".to_string()
}

fn default_token_url() -> String {
    "https://discord.com/api/oauth2/token".to_string()
}

fn default_timeout_seconds() -> u64 {
    5
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            renewal: RenewalConfig::default(),
            platform: PlatformConfig::default(),
        }
    }
}

/// Load settings from a TOML file
pub fn load_settings(path: &str) -> Result<VaultSettings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file '{}'", path))?;
    let settings: VaultSettings =
        toml::from_str(&contents).context("Failed to parse settings TOML")?;
    Ok(settings)
}

/// Secrets read from the environment at startup.
///
/// All values are opaque to the core; they are threaded into the exchange
/// client, the membership client, and the admin gate.
#[derive(Clone)]
pub struct Secrets {
    /// OAuth application client ID
    pub client_id: String,
    /// OAuth application client secret
    pub client_secret: String,
    /// Redirect URI registered with the OAuth application
    pub redirect_uri: String,
    /// Service (bot) credential used for membership replay
    pub bot_token: String,
    /// Bearer token required by the admin endpoints. None = admin API disabled.
    pub admin_token: Option<String>,
    /// Base64-encoded 32-byte master key for token encryption at rest
    pub encryption_key: String,
}

impl Secrets {
    /// Reads all secrets from `GUILDVAULT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: std::env::var("GUILDVAULT_CLIENT_ID")
                .context("GUILDVAULT_CLIENT_ID is required")?,
            client_secret: std::env::var("GUILDVAULT_CLIENT_SECRET")
                .context("GUILDVAULT_CLIENT_SECRET is required")?,
            redirect_uri: std::env::var("GUILDVAULT_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:8000/callback".to_string()),
            bot_token: std::env::var("GUILDVAULT_BOT_TOKEN")
                .context("GUILDVAULT_BOT_TOKEN is required (membership replay)")?,
            admin_token: std::env::var("GUILDVAULT_ADMIN_TOKEN").ok(),
            encryption_key: std::env::var("GUILDVAULT_ENCRYPTION_KEY")
                .context("GUILDVAULT_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?,
        })
    }
}
