//! Bounded history of forwarded readings, kept for display.

use crate::device::DeviceId;
use crate::reading::Reading;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;

/// Number of entries kept by [`HistoryBuffer`].
pub const HISTORY_CAPACITY: usize = 10;

/// A reading that was accepted for forwarding, stamped with the decision time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub device: DeviceId,
    pub reading: Reading,
}

impl HistoryEntry {
    pub fn new(timestamp: DateTime<Utc>, reading: Reading) -> Self {
        Self {
            timestamp,
            device: reading.device.clone(),
            reading,
        }
    }
}

/// One display line: `2024-05-01 12:00:00  AA:BB:..  Temperature: 21.5 °C, ...`
impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.reading;
        write!(
            f,
            "{}  {}  Temperature: {} \u{00B0}C, Humidity: {} %, Pressure: {} hPa, RSSI: {} dBm, Battery: {} V",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.device,
            r.temperature,
            r.humidity,
            r.pressure,
            r.signal_strength,
            r.battery_volts()
        )
    }
}

/// Fixed-capacity FIFO of the most recently forwarded readings.
///
/// Appending to a full buffer evicts the oldest entry first, so the length
/// stays within `0..=HISTORY_CAPACITY`.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
