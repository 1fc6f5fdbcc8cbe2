//! Per-device rate limiting for forwarded readings.
//!
//! The limiter only answers "may this device be forwarded now?". Recording a
//! forward is a separate call, made by the pipeline once it has committed to
//! forwarding the reading.

use crate::device::DeviceId;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;

/// Smallest forwarding interval, in minutes.
pub const MIN_INTERVAL_MINUTES: i64 = 1;

/// Minimum time between two forwarded readings of the same device.
///
/// Always at least [`MIN_INTERVAL_MINUTES`]; zero or negative configured
/// values are raised to the floor rather than disabling the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardInterval {
    minutes: i64,
}

impl ForwardInterval {
    /// Interval from a configured number of minutes.
    ///
    /// # Example
    /// ```
    /// use ruuvitag_relay::throttle::ForwardInterval;
    ///
    /// assert_eq!(ForwardInterval::from_minutes(0).minutes(), 1);
    /// assert_eq!(ForwardInterval::from_minutes(5).as_delta().num_seconds(), 300);
    /// ```
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            minutes: minutes.max(MIN_INTERVAL_MINUTES),
        }
    }

    pub fn minutes(&self) -> i64 {
        self.minutes
    }

    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.minutes.saturating_mul(60))
    }
}

impl Default for ForwardInterval {
    fn default() -> Self {
        Self::from_minutes(MIN_INTERVAL_MINUTES)
    }
}

impl fmt::Display for ForwardInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes == 1 {
            write!(f, "1 minute")
        } else {
            write!(f, "{} minutes", self.minutes)
        }
    }
}

/// Tracks when each device was last forwarded.
///
/// Entries are created on the first forward of a device and never removed;
/// a fresh limiter is created for each listener session.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_forwarded: HashMap<DeviceId, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reading of `device` taken at `now` may be forwarded.
    ///
    /// The first reading of a device is always allowed. Does not update any
    /// state; call [`RateLimiter::record_forwarded`] after committing.
    pub fn should_forward(
        &self,
        device: &DeviceId,
        now: DateTime<Utc>,
        interval: ForwardInterval,
    ) -> bool {
        match self.last_forwarded.get(device) {
            Some(last) => now - *last >= interval.as_delta(),
            None => true,
        }
    }

    /// Mark `device` as forwarded at `now`.
    pub fn record_forwarded(&mut self, device: &DeviceId, now: DateTime<Utc>) {
        match self.last_forwarded.get_mut(device) {
            Some(last) => *last = now,
            None => {
                self.last_forwarded.insert(device.clone(), now);
            }
        }
    }

    pub fn last_forwarded(&self, device: &DeviceId) -> Option<DateTime<Utc>> {
        self.last_forwarded.get(device).copied()
    }

    /// Number of devices forwarded at least once.
    pub fn len(&self) -> usize {
        self.last_forwarded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_forwarded.is_empty()
    }
}
