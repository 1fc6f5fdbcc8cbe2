//! BLE scanner abstraction for RuuviTag devices.
//!
//! A scanner is a producer: it decodes advertisements into [`Reading`]s and
//! pushes them into a channel until its cancellation token fires, then drops
//! the sender so the consumer sees the stream end.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::device::DeviceId;
use crate::reading::{MIN_FORMAT_VERSION, Reading};
use chrono::Utc;
use futures::future::BoxFuture;
use ruuvi_decoders::v5;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// RuuviTag data format the relay does not forward
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Invalid or corrupted data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Decoder library returned an error
    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Convenience alias for decoded readings or decode errors.
pub type ReadingResult = Result<Reading, DecodeError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Data decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
    /// The consumer dropped the reading channel
    #[error("Reading channel closed")]
    ChannelClosed,
}

/// Ruuvi Innovations manufacturer ID (little-endian bytes for pattern matching).
///
/// Bluetooth LE advertisements use little-endian byte order for manufacturer IDs.
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Ruuvi Innovations manufacturer ID for data lookup.
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(feature = "bluer")]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size for reading results.
pub const READING_CHANNEL_BUFFER_SIZE: usize = 100;

/// Source of decoded readings.
pub trait Scanner: Send + Sync {
    /// Start producing readings.
    ///
    /// With an `allow_list`, only those devices are reported. The returned
    /// channel closes once `cancel` fires.
    fn start_scan(
        &self,
        allow_list: Option<Vec<DeviceId>>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<ReadingResult>, ScanError>>;
}

/// The compiled-in Bluetooth scanner.
pub fn default_scanner() -> Result<Arc<dyn Scanner>, ScanError> {
    #[cfg(feature = "bluer")]
    return Ok(Arc::new(bluer::BluerScanner));
    #[cfg(not(feature = "bluer"))]
    return Err(ScanError::BackendNotAvailable("bluer".into()));
}

/// Decode manufacturer data from a RuuviTag into a [`Reading`].
///
/// Only data format 5 carries every field the relay forwards; older formats
/// and the air-quality formats are reported as unsupported.
///
/// # Arguments
/// * `device` - Hardware address of the advertiser
/// * `rssi` - Signal strength of the advertisement in dBm
/// * `data` - The manufacturer-specific data bytes (without the company ID prefix)
///
/// # Unit Conversions
/// - Pressure: Pascals → hectopascals (divide by 100)
pub fn decode_ruuvi_data(device: DeviceId, rssi: i16, data: &[u8]) -> Result<Reading, DecodeError> {
    let Some(&format) = data.first() else {
        return Err(DecodeError::InvalidData("Empty data".into()));
    };

    if format != MIN_FORMAT_VERSION {
        return Err(DecodeError::UnsupportedFormat(format!(
            "RuuviTag data format {format} (only V5 supported)"
        )));
    }

    let tag = v5::decode(data)
        .map_err(|e| DecodeError::DecoderError(format!("Failed to decode RuuviTag data: {e:?}")))?;

    let missing = |field: &str| DecodeError::InvalidData(format!("{field} not available"));
    Ok(Reading {
        device,
        timestamp: Utc::now(),
        temperature: tag.temperature.ok_or_else(|| missing("temperature"))?,
        humidity: tag.humidity.ok_or_else(|| missing("humidity"))?,
        pressure: tag.pressure.map(|pa| pa / 100.0).ok_or_else(|| missing("pressure"))?,
        signal_strength: rssi,
        battery_millivolts: tag
            .battery_voltage
            .map(u32::from)
            .ok_or_else(|| missing("battery"))?,
        format_version: format,
    })
}

/// Whether an advertiser passes the scanner-level allow-list.
pub(crate) fn allowed(allow_list: Option<&[DeviceId]>, device: &DeviceId) -> bool {
    allow_list.is_none_or(|list| list.contains(device))
}
