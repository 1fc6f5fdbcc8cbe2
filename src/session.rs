//! Per-session state shared between the listener task and the foreground.
//!
//! A [`ListenerSession`] is created when the listener starts and dropped when
//! it stops, so rate-limit entries and history never leak between sessions.

use crate::device::DeviceId;
use crate::history::{HistoryBuffer, HistoryEntry};
use crate::interest::InterestSet;
use crate::throttle::{ForwardInterval, RateLimiter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Interest and interval are fixed for the lifetime of a session; user
/// edits take effect on the next start.
#[derive(Debug)]
pub struct ListenerSession {
    interval: ForwardInterval,
    interest: InterestSet,
    limiter: Mutex<RateLimiter>,
    history: Mutex<HistoryBuffer>,
}

impl ListenerSession {
    pub fn new(interest: InterestSet, interval: ForwardInterval) -> Self {
        Self {
            interval,
            interest,
            limiter: Mutex::new(RateLimiter::new()),
            history: Mutex::new(HistoryBuffer::new()),
        }
    }

    pub fn interval(&self) -> ForwardInterval {
        self.interval
    }

    pub fn interest(&self) -> &InterestSet {
        &self.interest
    }

    pub fn is_of_interest(&self, device: &DeviceId) -> bool {
        self.interest.accepts(device)
    }

    /// Copy of the history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_history().snapshot()
    }

    /// Number of devices forwarded at least once in this session.
    pub fn forwarded_devices(&self) -> usize {
        self.lock_limiter().len()
    }

    // Lock order: limiter before history.
    pub(crate) fn lock_limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_history(&self) -> MutexGuard<'_, HistoryBuffer> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
