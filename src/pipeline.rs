//! Per-reading forwarding decision.
//!
//! Each decoded reading goes through, in order:
//! 1. format check (`format_version >= 5`)
//! 2. interest filter
//! 3. credential freshness (refresh when close to expiry)
//! 4. per-device rate limiter
//! 5. history append + rate limiter update
//! 6. two remote writes: event log append and latest-value upsert
//!
//! Delivery is best-effort: a failed write is logged and does not undo step 5.

use crate::credentials::{Credentials, PersistError};
use crate::history::HistoryEntry;
use crate::reading::Reading;
use crate::remote::{DevicePaths, RemoteRecord, RemoteStore};
use crate::session::ListenerSession;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a reading was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    UnsupportedFormat(u8),
    NotOfInterest,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Discarded(Discard),
    /// Accepted for forwarding; `delivered` is false if either remote write failed.
    Forwarded { delivered: bool },
}

/// Conditions that must stop the listener.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub struct Pipeline {
    session: Arc<ListenerSession>,
    credentials: Arc<Credentials>,
    store: Arc<dyn RemoteStore>,
    paths: DevicePaths,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        session: Arc<ListenerSession>,
        credentials: Arc<Credentials>,
        store: Arc<dyn RemoteStore>,
        paths: DevicePaths,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            credentials,
            store,
            paths,
            clock,
        }
    }

    pub fn session(&self) -> &Arc<ListenerSession> {
        &self.session
    }

    /// Run one reading through the forwarding decision.
    ///
    /// # Errors
    /// Returns `PipelineError` only for conditions that must end the session
    /// (refreshed credentials could not be persisted). Discards and failed
    /// remote writes are reported through [`Outcome`].
    pub async fn on_reading(&self, reading: Reading) -> Result<Outcome, PipelineError> {
        if !reading.is_supported() {
            return Ok(Outcome::Discarded(Discard::UnsupportedFormat(
                reading.format_version,
            )));
        }
        if !self.session.is_of_interest(&reading.device) {
            return Ok(Outcome::Discarded(Discard::NotOfInterest));
        }

        let now = self.clock.now();
        let credentials = self.credentials.ensure_fresh(now).await?;

        let Some(entry) = self.admit(reading, now) else {
            debug!("Reading rate limited");
            return Ok(Outcome::Discarded(Discard::RateLimited));
        };

        let record = RemoteRecord::from(&entry);
        let token = credentials.access_token.as_str();
        let mut delivered = true;

        let event_log = self.paths.event_log(&entry.device);
        if let Err(e) = self.store.append(&event_log, &record, token).await {
            warn!(device = %entry.device, path = %event_log, error = %e, "Failed to append reading");
            delivered = false;
        }

        let latest = self.paths.latest_value(&entry.device);
        if let Err(e) = self.store.upsert(&latest, &record, token).await {
            warn!(device = %entry.device, path = %latest, error = %e, "Failed to update latest value");
            delivered = false;
        }

        info!(delivered, "{entry}");
        Ok(Outcome::Forwarded { delivered })
    }

    /// Rate-limit check; on success the reading is committed to history and the limiter.
    fn admit(&self, reading: Reading, now: DateTime<Utc>) -> Option<HistoryEntry> {
        let mut limiter = self.session.lock_limiter();
        if !limiter.should_forward(&reading.device, now, self.session.interval()) {
            return None;
        }

        let entry = HistoryEntry::new(now, reading);
        self.session.lock_history().append(entry.clone());
        limiter.record_forwarded(&entry.device, now);
        Some(entry)
    }
}
