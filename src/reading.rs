//! Decoded RuuviTag reading.

use crate::device::DeviceId;
use chrono::{DateTime, Utc};

/// Oldest RuuviTag data format the relay accepts.
pub const MIN_FORMAT_VERSION: u8 = 5;

/// One telemetry sample from a beacon.
///
/// Units follow what the remote store expects:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Pressure in hectopascals
/// - Signal strength (RSSI) in dBm
/// - Battery in millivolts
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device: DeviceId,
    /// When the scanner decoded the advertisement
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub signal_strength: i16,
    pub battery_millivolts: u32,
    /// RuuviTag data format byte
    pub format_version: u8,
}

impl Reading {
    /// Whether the reading uses a data format the relay can forward.
    pub fn is_supported(&self) -> bool {
        self.format_version >= MIN_FORMAT_VERSION
    }

    /// Battery potential in Volts, for display.
    pub fn battery_volts(&self) -> f64 {
        f64::from(self.battery_millivolts) / 1000.0
    }
}
