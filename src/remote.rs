//! Remote store writes (Firebase Realtime Database REST API).
//!
//! Every forwarded reading produces two writes under the user's device node:
//! - `users/{user}/devices/{device}/{mac}`: append, a new child with a generated key
//! - `users/{user}/devices/{device}/new_values/{mac}`: upsert of the latest value

use crate::device::DeviceId;
use crate::history::HistoryEntry;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

/// `utc_timestamp` format: ISO-8601 with `Z` suffix, second precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Errors from a single remote write.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote write request failed: {0}")]
    Request(String),
    #[error("remote store rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Payload written for each forwarded reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    pub utc_timestamp: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub rssi: i16,
    /// Millivolts
    pub battery: u32,
}

impl From<&HistoryEntry> for RemoteRecord {
    fn from(entry: &HistoryEntry) -> Self {
        let r = &entry.reading;
        Self {
            utc_timestamp: entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            temperature: r.temperature,
            humidity: r.humidity,
            pressure: r.pressure,
            rssi: r.signal_strength,
            battery: r.battery_millivolts,
        }
    }
}

/// Path builder for one user's relay device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    user_id: String,
    device_id: String,
}

impl DevicePaths {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Append-only event log of `mac`.
    pub fn event_log(&self, mac: &DeviceId) -> String {
        format!("users/{}/devices/{}/{}", self.user_id, self.device_id, mac)
    }

    /// Single latest-value slot of `mac`.
    pub fn latest_value(&self, mac: &DeviceId) -> String {
        format!(
            "users/{}/devices/{}/new_values/{}",
            self.user_id, self.device_id, mac
        )
    }
}

/// Datastore accepting authenticated writes.
pub trait RemoteStore: Send + Sync {
    /// Create a new uniquely keyed child under `path`.
    fn append<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// Replace the fields of the record at `path`.
    fn upsert<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;
}

/// Firebase Realtime Database over REST.
#[derive(Clone)]
pub struct FirebaseStore {
    http: reqwest::Client,
    database_url: String,
}

impl FirebaseStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        let database_url: String = database_url.into();
        Self {
            http: reqwest::Client::new(),
            database_url: database_url.trim_end_matches('/').to_string(),
        }
    }

    /// REST endpoint of `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url, path.trim_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl RemoteStore for FirebaseStore {
    fn append<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        let request = self
            .http
            .post(self.endpoint(path))
            .query(&[("auth", access_token)])
            .json(record);
        Box::pin(self.send(request))
    }

    fn upsert<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        let request = self
            .http
            .patch(self.endpoint(path))
            .query(&[("auth", access_token)])
            .json(record);
        Box::pin(self.send(request))
    }
}
