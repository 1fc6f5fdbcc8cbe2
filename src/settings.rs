//! Persisted relay settings and session.
//!
//! The settings file holds user preferences (interval, follow list, relay
//! device id) next to the session left by the login flow (user uid and
//! tokens). It doubles as the [`CredentialStore`] for refreshed tokens.

use crate::config::{ConfigError, read_json};
use crate::credentials::{CredentialState, CredentialStore, PersistError};
use crate::device::DeviceId;
use crate::interest::InterestSet;
use crate::throttle::{ForwardInterval, MIN_INTERVAL_MINUTES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;
use uuid::Uuid;

fn default_interval() -> i64 {
    MIN_INTERVAL_MINUTES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Forwarding interval in minutes
    #[serde(default = "default_interval")]
    pub time_interval: i64,
    /// Identifier of this relay under the user's devices node
    #[serde(default)]
    pub device_uuid: String,
    /// Set while a relay session is running
    #[serde(default)]
    pub broadcasting: bool,
    /// Empty means automatic
    #[serde(default)]
    pub followed_sensors: Vec<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry, unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiration_time: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_interval: default_interval(),
            device_uuid: String::new(),
            broadcasting: false,
            followed_sensors: Vec::new(),
            user_uid: None,
            id_token: None,
            refresh_token: None,
            token_expiration_time: None,
        }
    }
}

/// Session left behind by a previous login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub user_uid: String,
    pub credentials: CredentialState,
}

/// A fresh identifier for this relay under the user's devices node.
pub fn new_device_uuid() -> String {
    Uuid::new_v4().to_string()
}

impl Settings {
    /// Defaults for a relay that has never run: automatic mode, a 1 minute
    /// interval and a newly generated device uuid.
    pub fn for_new_relay() -> Self {
        Self {
            device_uuid: new_device_uuid(),
            ..Self::default()
        }
    }

    pub fn interval(&self) -> ForwardInterval {
        ForwardInterval::from_minutes(self.time_interval)
    }

    pub fn interest(&self) -> InterestSet {
        InterestSet::from_followed(self.followed_sensors.iter().cloned())
    }

    pub fn set_interest(&mut self, interest: &InterestSet) {
        self.followed_sensors = interest.followed();
    }

    /// The persisted session, present when both a user uid and a refresh token are stored.
    ///
    /// A missing access token or expiry yields credentials that are already
    /// expired, so the first forward decision refreshes them.
    pub fn session(&self) -> Option<PersistedSession> {
        let user_uid = self.user_uid.clone()?;
        let refresh_token = self.refresh_token.clone()?;
        let expiry = self
            .token_expiration_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Some(PersistedSession {
            user_uid,
            credentials: CredentialState {
                access_token: self.id_token.clone().unwrap_or_default(),
                expiry,
                refresh_token,
            },
        })
    }

    fn store_credentials(&mut self, state: &CredentialState) {
        self.id_token = Some(state.access_token.clone());
        self.refresh_token = Some(state.refresh_token.clone());
        self.token_expiration_time = Some(state.expiry.timestamp());
    }
}

/// Settings backed by a JSON file; every update is written through.
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl SettingsFile {
    /// Load settings from `path`.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is missing, empty or not valid settings JSON.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = read_json(&path)?;
        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    /// Write `settings` to a new file at `path`.
    pub fn create(path: impl Into<PathBuf>, settings: Settings) -> Result<Self, PersistError> {
        let file = Self {
            path: path.into(),
            settings: Mutex::new(settings),
        };
        file.save(&file.snapshot())?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the file, apply `change` and write the result to disk.
    ///
    /// Edits written by another process since the last update are kept; only
    /// the fields touched by `change` are overwritten.
    ///
    /// # Errors
    /// Returns `PersistError` if the file cannot be written. In-memory settings
    /// keep the change either way.
    pub fn update<F>(&self, change: F) -> Result<(), PersistError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        self.reload(&mut settings);
        change(&mut settings);
        self.save(&settings)
    }

    fn reload(&self, settings: &mut Settings) {
        match read_json::<Settings>(&self.path) {
            Ok(on_disk) => *settings = on_disk,
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Could not reload settings, keeping in-memory copy"),
        }
    }

    fn save(&self, settings: &Settings) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json).map_err(|source| PersistError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl CredentialStore for SettingsFile {
    fn persist(&self, state: &CredentialState) -> Result<(), PersistError> {
        self.update(|settings| settings.store_credentials(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at, credentials_expiring_at};

    fn logged_in() -> Settings {
        Settings {
            time_interval: 5,
            device_uuid: "relay-1".into(),
            followed_sensors: vec!["AA:11".into()],
            user_uid: Some("user-1".into()),
            id_token: Some("id".into()),
            refresh_token: Some("refresh".into()),
            token_expiration_time: Some(at(0).timestamp()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_defaults_for_sparse_file() {
        let settings: Settings = serde_json::from_str(r#"{"device_uuid": "relay-1"}"#).unwrap();
        assert_eq!(settings.time_interval, 1);
        assert!(!settings.broadcasting);
        assert!(settings.interest().is_automatic());
        assert_eq!(settings.session(), None);
    }

    #[test]
    fn test_session_requires_uid_and_refresh_token() {
        let mut settings = logged_in();
        assert!(settings.session().is_some());
        settings.refresh_token = None;
        assert_eq!(settings.session(), None);

        let mut settings = logged_in();
        settings.user_uid = None;
        assert_eq!(settings.session(), None);
    }

    #[test]
    fn test_session_credentials() {
        let session = logged_in().session().unwrap();
        assert_eq!(session.user_uid, "user-1");
        assert_eq!(session.credentials.access_token, "id");
        assert_eq!(session.credentials.refresh_token, "refresh");
        assert_eq!(session.credentials.expiry, at(0));
    }

    #[test]
    fn test_session_without_expiry_is_expired() {
        let mut settings = logged_in();
        settings.token_expiration_time = None;
        settings.id_token = None;
        let session = settings.session().unwrap();
        assert_eq!(session.credentials.expiry, DateTime::<Utc>::UNIX_EPOCH);
        assert!(session.credentials.access_token.is_empty());
    }

    #[test]
    fn test_interval_and_interest() {
        let settings = logged_in();
        assert_eq!(settings.interval().minutes(), 5);
        assert!(settings.interest().accepts(&"AA:11".into()));
        assert!(!settings.interest().accepts(&"BB:22".into()));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        SettingsFile::create(&path, logged_in()).unwrap();

        let loaded = SettingsFile::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), logged_in());
    }

    #[test]
    fn test_logged_out_file_omits_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        SettingsFile::create(&path, Settings::default()).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(!json.contains("refresh_token"));
        assert!(json.contains("\"followed_sensors\": []"));
    }

    #[test]
    fn test_persist_credentials_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let file = SettingsFile::create(&path, logged_in()).unwrap();

        let state = credentials_expiring_at(at(3600));
        file.persist(&state).unwrap();

        let reloaded = SettingsFile::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.id_token.as_deref(), Some(state.access_token.as_str()));
        assert_eq!(reloaded.refresh_token.as_deref(), Some(state.refresh_token.as_str()));
        assert_eq!(reloaded.token_expiration_time, Some(at(3600).timestamp()));
    }

    #[test]
    fn test_update_persists_interest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let file = SettingsFile::create(&path, Settings::default()).unwrap();

        let mut interest = InterestSet::Automatic;
        interest.follow("BB:22".into());
        file.update(|s| s.set_interest(&interest)).unwrap();

        let reloaded = SettingsFile::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.followed_sensors, vec![DeviceId::from("BB:22")]);
    }

    #[test]
    fn test_update_keeps_edits_from_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let relay = SettingsFile::create(&path, logged_in()).unwrap();

        let editor = SettingsFile::load(&path).unwrap();
        editor
            .update(|s| s.followed_sensors = vec!["BB:22".into()])
            .unwrap();

        let state = credentials_expiring_at(at(3600));
        relay.persist(&state).unwrap();
        relay.update(|s| s.broadcasting = false).unwrap();

        let reloaded = SettingsFile::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.followed_sensors, vec![DeviceId::from("BB:22")]);
        assert_eq!(reloaded.refresh_token.as_deref(), Some(state.refresh_token.as_str()));
        assert_eq!(relay.snapshot().followed_sensors, vec![DeviceId::from("BB:22")]);
    }

    #[test]
    fn test_update_survives_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let file = SettingsFile::create(&path, logged_in()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        file.update(|s| s.time_interval = 7).unwrap();

        let reloaded = SettingsFile::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.time_interval, 7);
        assert_eq!(reloaded.user_uid.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_new_relay_defaults() {
        let settings = Settings::for_new_relay();
        assert_eq!(settings.time_interval, 1);
        assert!(!settings.broadcasting);
        assert!(settings.followed_sensors.is_empty());
        assert!(Uuid::parse_str(&settings.device_uuid).is_ok());
        assert_ne!(settings.device_uuid, Settings::for_new_relay().device_uuid);
    }

    #[test]
    fn test_unwritable_file_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("settings.json");
        let err = SettingsFile::create(&path, Settings::default()).unwrap_err();
        assert!(matches!(err, PersistError::Write { .. }));
    }

    #[test]
    fn test_load_empty_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            SettingsFile::load(&path),
            Err(ConfigError::Empty { .. })
        ));
    }
}
