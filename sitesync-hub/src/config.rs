//! Configuration for the hub binary.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/sitesync-hub/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::hub::HubConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerFileConfig,
    store: StoreFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    ping_interval_ms: Option<u64>,
    ping_timeout_ms: Option<u64>,
    websocket: Option<bool>,
}

/// `[store]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    history_replay: Option<usize>,
    room_capacity: Option<usize>,
    notification_capacity: Option<usize>,
}

#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "SiteSync development realtime hub")]
pub struct HubCliArgs {
    /// Address to bind the hub to.
    #[arg(short, long, env = "SITESYNC_HUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/sitesync-hub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interval between heartbeats, in milliseconds.
    #[arg(long)]
    pub ping_interval_ms: Option<u64>,

    /// How long to wait for a heartbeat reply, in milliseconds.
    #[arg(long)]
    pub ping_timeout_ms: Option<u64>,

    /// Serve long-polling only.
    #[arg(long)]
    pub polling_only: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SITESYNC_HUB_LOG")]
    pub log_level: String,
}

/// Fully resolved hub settings.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub bind_addr: String,
    pub hub: HubConfig,
    pub log_level: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            hub: HubConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl HubSettings {
    /// Merge CLI args, env vars and the config file.
    ///
    /// A missing default config file is treated as empty; a missing
    /// `--config` file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &HubCliArgs, file: &HubConfigFile) -> Self {
        let defaults = Self::default();
        let hub = defaults.hub;
        let millis = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map_or(default, Duration::from_millis)
        };

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            hub: HubConfig {
                ping_interval: millis(
                    cli.ping_interval_ms,
                    file.server.ping_interval_ms,
                    hub.ping_interval,
                ),
                ping_timeout: millis(
                    cli.ping_timeout_ms,
                    file.server.ping_timeout_ms,
                    hub.ping_timeout,
                ),
                websocket: !cli.polling_only && file.server.websocket.unwrap_or(hub.websocket),
                history_replay: file.store.history_replay.unwrap_or(hub.history_replay),
                room_capacity: file.store.room_capacity.unwrap_or(hub.room_capacity),
                notification_capacity: file
                    .store
                    .notification_capacity
                    .unwrap_or(hub.notification_capacity),
            },
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<HubConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(HubConfigFile::default());
        };
        config_dir.join("sitesync-hub").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
