//! `sitesync`: command-line front end for the realtime sync core.
//!
//! ```bash
//! # Sign in once; the session is stored for later runs
//! sitesync login --email ana@example.com --password secret
//!
//! # Follow two site rooms plus badges, notifications and presence
//! sitesync watch --room 12 --room 14
//!
//! # Post a message, or record a badge scan
//! sitesync say --room 12 "béton livré"
//! sitesync badge --matricule M-0042 --kind sortie
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;

use sitesync::badging::{self, BadgeError, BadgeRequest, DEFAULT_SITE};
use sitesync::client::{ActionError, SyncClient};
use sitesync::config::{CliArgs, ConfigError, SyncConfig};
use sitesync::credentials::{self, CredentialError, FileCredentialStore};
use sitesync::identity::Identity;
use sitesync::rest::{ApiClient, ApiError, BadgeKind};
use sitesync::snapshot;
use sitesync::store::Change;
use sitesync_proto::presence::GeoPoint;

#[derive(Parser, Debug)]
#[command(version, about = "Realtime chat, badge and notification sync for the SiteSync CRM")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long, env = "SITESYNC_EMAIL")]
        email: String,
        #[arg(long, env = "SITESYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Print live chat, badge, notification and presence updates until
    /// interrupted.
    Watch {
        /// Site room to join; repeatable.
        #[arg(long = "room")]
        rooms: Vec<String>,
    },
    /// Post one chat message to a room.
    Say {
        #[arg(long)]
        room: String,
        text: String,
    },
    /// Record a badge scan and announce it in real time.
    Badge {
        #[arg(long)]
        matricule: String,
        /// entree, sortie, pause or reprise.
        #[arg(long, default_value = "entree")]
        kind: BadgeKind,
        #[arg(long, requires = "longitude", allow_hyphen_values = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_hyphen_values = true)]
        longitude: Option<f64>,
        #[arg(long, default_value = DEFAULT_SITE)]
        site: String,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::Watch { .. } => "watch",
            Self::Say { .. } => "say",
            Self::Badge { .. } => "badge",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Badge(#[from] BadgeError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("not signed in: run `sitesync login` or pass --user-id and --user-name")]
    NotSignedIn,
    #[error("could not reach the realtime server at {0}")]
    Unreachable(String),
}

impl CliError {
    const fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::Unauthorized) | Self::Badge(BadgeError::Api(ApiError::Unauthorized))
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.args);

    let config = match SyncConfig::load(&cli.args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(err = %e, "invalid configuration");
            eprintln!("sitesync: {e}");
            return ExitCode::FAILURE;
        }
    };
    let credentials = match FileCredentialStore::default_location() {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(err = %e, "no credential store");
            eprintln!("sitesync: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(command = cli.command.name(), "sitesync starting");
    match run(cli.command, &config, &credentials).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_unauthorized() {
                if let Err(clear) = credentials::clear_session(&credentials) {
                    tracing::warn!(err = %clear, "could not clear stale session");
                }
            }
            tracing::error!(err = %e, "command failed");
            eprintln!("sitesync: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to a file, or to stderr with `--log-stderr`.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(args: &CliArgs) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    if args.log_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    }

    let default_path = std::env::temp_dir().join("sitesync.log");
    let log_path = args.log_file.as_deref().unwrap_or(&default_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(
    command: Command,
    config: &SyncConfig,
    credentials: &FileCredentialStore,
) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let api = ApiClient::new(&config.api_url, config.request_timeout)?;
            let login = api.login(&email, &password).await?;
            credentials::save_session(credentials, &login.token, &login.user)?;
            println!("signed in as {} ({})", login.user.name, login.user.id);
            Ok(())
        }
        Command::Logout => {
            credentials::clear_session(credentials)?;
            println!("signed out");
            Ok(())
        }
        Command::Watch { rooms } => watch(config, credentials, &rooms).await,
        Command::Say { room, text } => say(config, credentials, &room, &text).await,
        Command::Badge {
            matricule,
            kind,
            latitude,
            longitude,
            site,
        } => {
            let location = latitude
                .zip(longitude)
                .map(|(latitude, longitude)| GeoPoint {
                    latitude,
                    longitude,
                });
            let request = BadgeRequest {
                location,
                chantier_name: site,
                ..BadgeRequest::new(matricule, kind)
            };
            badge(config, credentials, &request).await
        }
    }
}

/// Identity to connect as plus the REST token, if any.
fn resolve_session(
    config: &SyncConfig,
    credentials: &FileCredentialStore,
) -> Result<(Identity, Option<String>), CliError> {
    let stored = credentials::load_session(credentials)?;
    match (config.identity.clone(), stored) {
        (Some(identity), stored) => Ok((identity, stored.map(|session| session.token))),
        (None, Some(session)) => Ok((session.user, Some(session.token))),
        (None, None) => Err(CliError::NotSignedIn),
    }
}

fn api_client(config: &SyncConfig, token: Option<String>) -> Result<ApiClient, CliError> {
    let api = ApiClient::new(&config.api_url, config.request_timeout)?;
    api.set_token(token);
    Ok(api)
}

async fn watch(
    config: &SyncConfig,
    credentials: &FileCredentialStore,
    rooms: &[String],
) -> Result<(), CliError> {
    let (identity, token) = resolve_session(config, credentials)?;
    let api = api_client(config, token)?;
    let client = SyncClient::new(config.client_options());
    for room in rooms {
        client.join_room(room);
    }
    let mut changes = client.store().changes();
    let mut connected = client.connected();

    let report = snapshot::refresh(&api, client.store()).await;
    if report.unauthorized {
        credentials::clear_session(credentials)?;
        eprintln!("sitesync: stored session expired, snapshots skipped");
    }

    client.connect(identity).await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *connected.borrow_and_update();
                let transport = client
                    .transport_type()
                    .map_or_else(String::new, |t| format!(" via {t}"));
                println!("-- {}{transport}", if online { "connected" } else { "disconnected" });
            }
            change = changes.recv() => match change {
                Ok(change) => print_change(&client, &change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "display fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}

fn print_change(client: &SyncClient, change: &Change) {
    let store = client.store();
    match change {
        Change::Messages { room } => {
            if let Some(message) = store.messages(room).last() {
                println!("[{room}] {}: {}", message.user, message.text);
            }
        }
        Change::Typing { room } => {
            if let Some(user) = store.typist(room) {
                println!("[{room}] {user} is typing");
            }
        }
        Change::Notifications => {
            if let Some(notification) = store.notifications().first() {
                println!(
                    "! {} [{}] {}",
                    notification.title, notification.kind, notification.message
                );
            }
        }
        Change::Badges => {
            if let Some(badge) = store.badges().first() {
                println!(
                    "# {} {} @ {} {}",
                    badge.employe,
                    badge.kind,
                    badge.site().unwrap_or(DEFAULT_SITE),
                    badge.time
                );
            }
        }
        Change::Presence { employe_id } => {
            if let Some(presence) = store.presence(employe_id) {
                println!("@ {} is {}", presence.employe_name, presence.status);
            }
        }
    }
}

/// Connect and wait for the ack; fails after twice the socket timeout.
async fn connect_online(
    config: &SyncConfig,
    client: &SyncClient,
    identity: Identity,
) -> Result<(), CliError> {
    client.connect(identity).await;
    if client
        .wait_for_state(true, config.socket_timeout.saturating_mul(2))
        .await
    {
        Ok(())
    } else {
        client.disconnect().await;
        Err(CliError::Unreachable(config.socket_url.clone()))
    }
}

/// Wait for the first change matching `wanted`, up to `timeout`.
async fn wait_for_change(
    changes: &mut tokio::sync::broadcast::Receiver<Change>,
    timeout: Duration,
    wanted: impl Fn(&Change) -> bool,
) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            match changes.recv().await {
                Ok(change) if wanted(&change) => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

async fn say(
    config: &SyncConfig,
    credentials: &FileCredentialStore,
    room: &str,
    text: &str,
) -> Result<(), CliError> {
    let (identity, _) = resolve_session(config, credentials)?;
    let client = SyncClient::new(config.client_options());
    client.join_room(room);
    connect_online(config, &client, identity).await?;

    let mut changes = client.store().changes();
    client.send_message(room, text)?;
    let echoed = wait_for_change(&mut changes, config.socket_timeout, |change| {
        matches!(change, Change::Messages { room: r } if r == room)
    })
    .await;
    if !echoed {
        tracing::warn!(room, "message not echoed before timeout");
    }
    client.disconnect().await;
    println!("sent to {room}");
    Ok(())
}

async fn badge(
    config: &SyncConfig,
    credentials: &FileCredentialStore,
    request: &BadgeRequest,
) -> Result<(), CliError> {
    let (identity, token) = resolve_session(config, credentials)?;
    let api = api_client(config, token)?;
    let client = SyncClient::new(config.client_options());
    // The scan is recorded over REST even when realtime is unreachable.
    if let Err(e) = connect_online(config, &client, identity).await {
        tracing::warn!(err = %e, "recording badge without realtime announcement");
    }

    let mut changes = client.store().changes();
    let receipt = badging::record_badge(&api, &client, request).await?;
    if receipt.announced {
        wait_for_change(&mut changes, config.socket_timeout, |change| {
            matches!(change, Change::Badges)
        })
        .await;
    }
    client.disconnect().await;
    println!(
        "{} recorded for {}{}",
        request.kind,
        receipt.employee.display_name(),
        if receipt.announced { "" } else { " (not announced)" }
    );
    Ok(())
}
