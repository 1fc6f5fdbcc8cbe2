//! Firebase project configuration.
//!
//! The configuration is the web-app JSON snippet from the Firebase console.
//! Only `apiKey` and `databaseURL` are needed by the relay; a file without
//! them is rejected at startup.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading configuration or settings files. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{}: could not open file: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: file is empty", .path.display())]
    Empty { path: PathBuf },
    #[error("{}: invalid JSON: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration is missing a required key: {0}")]
    Missing(&'static str),
}

/// Read a JSON file, distinguishing missing, empty and malformed files.
pub(crate) fn read_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }
    serde_json::from_str(&contents).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirebaseConfig {
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
    #[serde(rename = "databaseURL", default)]
    pub database_url: String,
    #[serde(rename = "authDomain", default)]
    pub auth_domain: Option<String>,
    #[serde(rename = "projectId", default)]
    pub project_id: Option<String>,
}

impl FirebaseConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: FirebaseConfig = read_json(path)?;
        config.validate()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: FirebaseConfig =
            serde_json::from_str(json).map_err(|source| ConfigError::Invalid {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("apiKey"));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("databaseURL"));
        }
        Ok(self)
    }
}
