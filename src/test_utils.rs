//! Shared fixtures for unit tests: fixed instants, readings and in-memory collaborators.

use crate::credentials::{
    AuthError, CredentialState, CredentialStore, PersistError, TokenGrant, TokenRefresher,
};
use crate::device::DeviceId;
use crate::pipeline::Clock;
use crate::reading::Reading;
use crate::remote::{RemoteError, RemoteRecord, RemoteStore};
use crate::scanner::{ReadingResult, ScanError, Scanner};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::future::BoxFuture;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A stable device id for unit tests.
pub const TEST_DEVICE: &str = "AA:BB:CC:DD:EE:01";

/// `2024-05-01T12:00:00Z` shifted by `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

/// A plausible reading; tests override the fields they care about.
pub fn reading(device: &str, format_version: u8) -> Reading {
    Reading {
        device: DeviceId::from(device),
        timestamp: at(0),
        temperature: 21.5,
        humidity: 40.0,
        pressure: 1003.2,
        signal_strength: -70,
        battery_millivolts: 2950,
        format_version,
    }
}

pub fn credentials_expiring_at(expiry: DateTime<Utc>) -> CredentialState {
    CredentialState {
        access_token: "initial-access".into(),
        expiry,
        refresh_token: "initial-refresh".into(),
    }
}

/// Clock under test control.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Refresher returning numbered tokens (`access-1`, `refresh-1`, ...) or always failing.
pub struct ScriptedRefresher {
    fail: bool,
    lifetime: i64,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedRefresher {
    pub fn succeeding() -> Self {
        Self::succeeding_with_lifetime(3600)
    }

    pub fn succeeding_with_lifetime(lifetime: i64) -> Self {
        Self {
            fail: false,
            lifetime,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl TokenRefresher for ScriptedRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, AuthError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(refresh_token.to_string());
            if self.fail {
                return Err(AuthError::Request("connection refused".into()));
            }
            Ok(TokenGrant {
                id_token: format!("access-{n}"),
                refresh_token: format!("refresh-{n}"),
                expires_in: self.lifetime,
            })
        })
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    fail: bool,
    persisted: Mutex<Vec<CredentialState>>,
}

impl MemoryCredentialStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> Vec<CredentialState> {
        self.persisted.lock().unwrap().clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn persist(&self, state: &CredentialState) -> Result<(), PersistError> {
        if self.fail {
            return Err(PersistError::Write {
                path: PathBuf::from("settings.json"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.persisted.lock().unwrap().push(state.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Append,
    Upsert,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub kind: WriteKind,
    pub path: String,
    pub record: RemoteRecord,
    pub token: String,
}

/// Remote store that records every write attempt, optionally rejecting them all.
#[derive(Default)]
pub struct RecordingStore {
    fail: bool,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, kind: WriteKind, path: &str, record: &RemoteRecord, token: &str) -> Result<(), RemoteError> {
        self.writes.lock().unwrap().push(RecordedWrite {
            kind,
            path: path.to_string(),
            record: record.clone(),
            token: token.to_string(),
        });
        if self.fail {
            return Err(RemoteError::Rejected {
                status: 401,
                body: "Permission denied".into(),
            });
        }
        Ok(())
    }
}

impl RemoteStore for RecordingStore {
    fn append<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move { self.record(WriteKind::Append, path, record, access_token) })
    }

    fn upsert<'a>(
        &'a self,
        path: &'a str,
        record: &'a RemoteRecord,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move { self.record(WriteKind::Upsert, path, record, access_token) })
    }
}

/// Scanner replaying a fixed list of results.
///
/// With `hold_open`, the channel stays open after the results until the scan
/// is cancelled, like a real scanner; otherwise it closes right away.
pub struct FakeScanner {
    results: Vec<ReadingResult>,
    hold_open: bool,
    allow_lists: Mutex<Vec<Option<Vec<DeviceId>>>>,
}

impl FakeScanner {
    pub fn new(results: Vec<ReadingResult>) -> Self {
        Self {
            results,
            hold_open: false,
            allow_lists: Mutex::new(Vec::new()),
        }
    }

    pub fn held_open(results: Vec<ReadingResult>) -> Self {
        Self {
            hold_open: true,
            ..Self::new(results)
        }
    }

    /// Allow-lists passed to each `start_scan` call.
    pub fn allow_lists(&self) -> Vec<Option<Vec<DeviceId>>> {
        self.allow_lists.lock().unwrap().clone()
    }
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        allow_list: Option<Vec<DeviceId>>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<ReadingResult>, ScanError>> {
        self.allow_lists.lock().unwrap().push(allow_list);
        let results = self.results.clone();
        let hold_open = self.hold_open;
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<ReadingResult>(results.len().max(1));
            tokio::spawn(async move {
                for r in results {
                    if tx.send(r).await.is_err() {
                        return;
                    }
                }
                if hold_open {
                    cancel.cancelled().await;
                }
                // drop tx to close channel
            });
            Ok(rx)
        })
    }
}
