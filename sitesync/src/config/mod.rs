//! Configuration system for the `sitesync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/sitesync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientOptions, DEFAULT_SOCKET_TIMEOUT, ReconnectConfig};
use crate::identity::{Identity, UserId};
use crate::rest::DEFAULT_REQUEST_TIMEOUT;
use crate::store::StoreLimits;

/// Default CRM server, serving both the REST API and the realtime channel.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5001";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    reconnect: ReconnectFileConfig,
    store: StoreFileConfig,
    identity: IdentityFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    socket_url: Option<String>,
    request_timeout_secs: Option<u64>,
    socket_timeout_secs: Option<u64>,
}

/// `[reconnect]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter: Option<f64>,
    max_attempts: Option<u32>,
}

/// `[store]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    badge_capacity: Option<usize>,
    notification_capacity: Option<usize>,
}

/// `[identity]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    user_id: Option<String>,
    user_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the REST API.
    pub api_url: String,
    /// Base URL of the realtime server.
    pub socket_url: String,
    pub request_timeout: Duration,
    pub socket_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub limits: StoreLimits,
    /// Identity to use instead of the stored session, when both id and
    /// name are configured.
    pub identity: Option<Identity>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_SERVER_URL.to_string(),
            socket_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            limits: StoreLimits::default(),
            identity: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// a file cannot be parsed, or a value is out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jitter = file.reconnect.jitter.unwrap_or(defaults.reconnect.jitter);
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid {
                key: "reconnect.jitter",
                reason: format!("{jitter} is outside [0, 1]"),
            });
        }
        let reconnect = ReconnectConfig {
            initial_delay: file
                .reconnect
                .initial_delay_ms
                .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
            max_delay: file
                .reconnect
                .max_delay_ms
                .map_or(defaults.reconnect.max_delay, Duration::from_millis),
            jitter,
            max_attempts: file
                .reconnect
                .max_attempts
                .unwrap_or(defaults.reconnect.max_attempts),
        };

        let user_id = cli
            .user_id
            .clone()
            .or_else(|| file.identity.user_id.clone());
        let user_name = cli
            .user_name
            .clone()
            .or_else(|| file.identity.user_name.clone());
        let identity = match (user_id, user_name) {
            (Some(id), Some(name)) => Some(Identity::new(parse_user_id(&id), name)),
            _ => None,
        };

        Ok(Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            socket_url: cli
                .socket_url
                .clone()
                .or_else(|| file.server.socket_url.clone())
                .unwrap_or(defaults.socket_url),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            socket_timeout: file
                .server
                .socket_timeout_secs
                .map_or(defaults.socket_timeout, Duration::from_secs),
            reconnect,
            limits: StoreLimits {
                badges: file
                    .store
                    .badge_capacity
                    .unwrap_or(defaults.limits.badges),
                notifications: file
                    .store
                    .notification_capacity
                    .unwrap_or(defaults.limits.notifications),
            },
            identity,
        })
    }

    /// Options for a [`crate::client::SyncClient`].
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            server_url: self.socket_url.clone(),
            socket_timeout: self.socket_timeout,
            reconnect: self.reconnect,
            limits: self.limits,
        }
    }
}

/// Numeric ids stay numbers on the wire; anything else is sent as text.
fn parse_user_id(raw: &str) -> UserId {
    raw.trim()
        .parse::<i64>()
        .map_or_else(|_| UserId::from(raw.trim()), UserId::from)
}

/// Global CLI arguments, shared by every subcommand.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CliArgs {
    /// Base URL of the REST API.
    #[arg(long, global = true, env = "SITESYNC_API_URL")]
    pub api_url: Option<String>,

    /// Base URL of the realtime server.
    #[arg(long, global = true, env = "SITESYNC_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// User id to connect as, bypassing the stored session.
    #[arg(long, global = true, env = "SITESYNC_USER_ID")]
    pub user_id: Option<String>,

    /// Display name to connect as, bypassing the stored session.
    #[arg(long, global = true, env = "SITESYNC_USER_NAME")]
    pub user_name: Option<String>,

    /// Path to config file (default: `~/.config/sitesync/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "SITESYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/sitesync.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log to stderr instead of a file.
    #[arg(long, global = true)]
    pub log_stderr: bool,
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("sitesync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
