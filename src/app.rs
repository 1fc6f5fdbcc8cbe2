//! Core application runner for `ruuvitag-relay`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit
//! codes: collaborators (scanner, identity provider, remote store, clock) and
//! the shutdown signal are injected so the flows can be tested deterministically.

use crate::config::ConfigError;
use crate::credentials::{Credentials, PersistError, TokenRefresher};
use crate::device::DeviceId;
use crate::history::HistoryEntry;
use crate::listener::{Listener, ListenerError};
use crate::pipeline::Clock;
use crate::reading::MIN_FORMAT_VERSION;
use crate::remote::{DevicePaths, RemoteStore};
use crate::scanner::{ScanError, Scanner};
use crate::settings::{Settings, SettingsFile, new_device_uuid};
use crate::throttle::ForwardInterval;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Settings file holding preferences and the persisted login session
    #[arg(long, default_value = "settings.json")]
    pub settings: PathBuf,

    /// Firebase web-app configuration (needs apiKey and databaseURL)
    #[arg(long, default_value = "firebase.json")]
    pub firebase_config: PathBuf,

    /// Verbose output, log pipeline decisions and undecodable advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Relay readings to the remote store until interrupted (default)
    Run {
        /// Forwarding interval in minutes, overriding the settings file
        #[arg(long)]
        interval: Option<i64>,
    },
    /// List RuuviTags in range until interrupted
    Discover,
    /// Only relay readings from this device (may be repeated)
    Follow { device: DeviceId },
    /// Stop following a device
    Unfollow { device: DeviceId },
    /// Relay readings from every device
    Automatic,
    /// Store a new forwarding interval in minutes; zero or less leaves it unchanged
    Interval {
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
    /// Generate a new identifier for this relay
    NewUuid,
}

/// Errors that end the process.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("no persisted session in {0}; log in first")]
    NoSession(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// External collaborators of a relay run.
pub struct Collaborators {
    pub scanner: Arc<dyn Scanner>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub store: Arc<dyn RemoteStore>,
    pub clock: Arc<dyn Clock>,
}

/// Relay readings until `shutdown` resolves or the listener stops on its own.
///
/// Resumes the persisted session from `settings`, marks the relay as
/// broadcasting for the duration, and returns the history of the finished
/// session.
///
/// # Errors
/// - `RunError::NoSession` if the settings hold no user uid and refresh token
/// - `RunError::Config` if the settings hold no device uuid
/// - `RunError::Persist` if the settings file cannot be written
/// - `RunError::Listener` if the scanner fails to start or the loop hit a fatal error
pub async fn run_relay<S>(
    settings: Arc<SettingsFile>,
    collaborators: Collaborators,
    interval_override: Option<i64>,
    shutdown: S,
) -> Result<Vec<HistoryEntry>, RunError>
where
    S: Future<Output = ()>,
{
    let snapshot = settings.snapshot();
    let session = snapshot
        .session()
        .ok_or_else(|| RunError::NoSession(settings.path().to_path_buf()))?;
    if snapshot.device_uuid.trim().is_empty() {
        return Err(ConfigError::Missing("device_uuid").into());
    }
    let interval = interval_override
        .map(ForwardInterval::from_minutes)
        .unwrap_or_else(|| snapshot.interval());
    let interest = snapshot.interest();

    let credentials = Arc::new(Credentials::new(
        session.credentials,
        collaborators.refresher,
        settings.clone(),
    ));
    let paths = DevicePaths::new(session.user_uid, snapshot.device_uuid.clone());
    let mut listener = Listener::new(
        collaborators.scanner,
        credentials,
        collaborators.store,
        paths,
        collaborators.clock,
    );

    settings.update(|s| s.broadcasting = true)?;
    info!(
        device_uuid = %snapshot.device_uuid,
        followed = ?interest.followed(),
        "Broadcasting"
    );
    if let Err(e) = listener.start(interest, interval).await {
        settings.update(|s| s.broadcasting = false)?;
        return Err(e.into());
    }

    let session = listener.session();
    let stopping = listener.stopping().unwrap_or_default();
    tokio::select! {
        _ = shutdown => info!("Shutdown requested"),
        _ = stopping.cancelled() => {}
    }

    let history = session.map(|s| s.history()).unwrap_or_default();
    let result = listener.stop().await;
    settings.update(|s| s.broadcasting = false)?;
    result?;
    Ok(history)
}

/// Print each newly discovered device to `out` until `shutdown` resolves.
///
/// Only devices broadcasting a supported data format are listed. Returns the
/// discovered devices in discovery order.
pub async fn discover<S>(
    scanner: &dyn Scanner,
    shutdown: S,
    out: &mut dyn Write,
) -> Result<Vec<DeviceId>, RunError>
where
    S: Future<Output = ()>,
{
    let cancel = CancellationToken::new();
    let mut readings = scanner.start_scan(None, cancel.clone()).await?;
    let mut discovered: Vec<DeviceId> = Vec::new();

    tokio::pin!(shutdown);
    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = readings.recv() => next,
        };
        match next {
            None => break,
            Some(Ok(reading)) => {
                if reading.format_version < MIN_FORMAT_VERSION || discovered.contains(&reading.device) {
                    continue;
                }
                writeln!(out, "{}", reading.device)?;
                discovered.push(reading.device);
            }
            Some(Err(e)) => debug!(error = %e, "Ignoring undecodable advertisement"),
        }
    }

    cancel.cancel();
    Ok(discovered)
}

/// Load the settings file, creating one with fresh defaults if it does not exist.
pub fn open_settings(path: &Path) -> Result<Arc<SettingsFile>, RunError> {
    match SettingsFile::load(path) {
        Ok(settings) => Ok(Arc::new(settings)),
        Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            let settings = SettingsFile::create(path, Settings::for_new_relay())?;
            info!(
                path = %path.display(),
                device_uuid = %settings.snapshot().device_uuid,
                "Created default settings"
            );
            Ok(Arc::new(settings))
        }
        Err(e) => Err(e.into()),
    }
}

/// Apply a settings subcommand to the settings file.
pub fn edit_settings(settings: &SettingsFile, command: &Command) -> Result<(), RunError> {
    match command {
        Command::Follow { device } => settings.update(|s| {
            let mut interest = s.interest();
            if !interest.follow(device.clone()) {
                info!(%device, "Already followed");
            }
            s.set_interest(&interest);
        })?,
        Command::Unfollow { device } => settings.update(|s| {
            let mut interest = s.interest();
            if !interest.unfollow(device) {
                info!(%device, "Was not followed");
            }
            s.set_interest(&interest);
        })?,
        Command::Automatic => settings.update(|s| s.followed_sensors.clear())?,
        Command::Interval { minutes } if *minutes <= 0 => {
            info!(minutes, "Interval unchanged");
        }
        Command::Interval { minutes } => {
            settings.update(|s| s.time_interval = *minutes)?;
            info!(interval = %ForwardInterval::from_minutes(*minutes), "Interval stored");
        }
        Command::NewUuid => {
            let device_uuid = new_device_uuid();
            settings.update(|s| s.device_uuid = device_uuid.clone())?;
            info!(%device_uuid, "New device uuid stored");
        }
        Command::Run { .. } | Command::Discover => {}
    }
    Ok(())
}
