//! BlueZ D-Bus backend for RuuviTag scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    DecodeError, MANUFACTURER_DATA_TYPE, READING_CHANNEL_BUFFER_SIZE, RUUVI_MANUFACTURER_ID,
    RUUVI_MANUFACTURER_ID_BYTES, ReadingResult, ScanError, Scanner, allowed, decode_ruuvi_data,
};
use crate::device::DeviceId;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner backed by the default BlueZ adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluerScanner;

impl Scanner for BluerScanner {
    fn start_scan(
        &self,
        allow_list: Option<Vec<DeviceId>>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<ReadingResult>, ScanError>> {
        Box::pin(start_scan(allow_list, cancel))
    }
}

/// Start scanning for RuuviTag devices using the BlueZ D-Bus backend.
///
/// Powers on the default adapter and registers a passive advertisement monitor
/// for Ruuvi manufacturer data. The monitor reports a device once when it
/// comes into range; later advertisements arrive as manufacturer data
/// property changes, so each found device is watched until it is lost.
/// Readings are sent through the returned channel until `cancel` fires.
pub async fn start_scan(
    allow_list: Option<Vec<DeviceId>>,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ReadingResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(READING_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: RUUVI_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state; dropping it ends the D-Bus session.
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;
        let mut watchers: HashMap<Address, CancellationToken> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = monitor_handle.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                MonitorEvent::DeviceFound(found) => {
                    let id = DeviceId::from(found.device);
                    if !allowed(allow_list.as_deref(), &id) || watchers.contains_key(&found.device) {
                        continue;
                    }
                    let device = match adapter.device(found.device) {
                        Ok(device) => device,
                        Err(e) => {
                            if !report(&tx, Err(e.into())).await {
                                break;
                            }
                            continue;
                        }
                    };
                    if !report(&tx, process_device(&device, &id, &tx).await).await {
                        break;
                    }
                    let watch = cancel.child_token();
                    watchers.insert(found.device, watch.clone());
                    tokio::spawn(watch_device(device, id, tx.clone(), watch));
                }
                MonitorEvent::DeviceLost(lost) => {
                    if let Some(watch) = watchers.remove(&lost.device) {
                        watch.cancel();
                    }
                }
                _ => {}
            }
        }

        for watch in watchers.into_values() {
            watch.cancel();
        }
        debug!("Bluetooth scan stopped");
    });

    Ok(rx)
}

/// Forward readings from manufacturer data changes of one device until `cancel` fires.
async fn watch_device(
    device: Device,
    id: DeviceId,
    tx: mpsc::Sender<ReadingResult>,
    cancel: CancellationToken,
) {
    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            report(&tx, Err(e.into())).await;
            return;
        }
    };
    tokio::pin!(events);

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            None => break,
            Some(DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(_))) => {
                if !report(&tx, process_device(&device, &id, &tx).await).await {
                    break;
                }
            }
            Some(_) => {}
        }
    }
    debug!(device = %id, "Stopped watching device");
}

/// Read the manufacturer data of a device and forward its reading.
async fn process_device(
    device: &Device,
    id: &DeviceId,
    tx: &mpsc::Sender<ReadingResult>,
) -> Result<(), ScanError> {
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };
    let Some(ruuvi_data) = manufacturer_data.get(&RUUVI_MANUFACTURER_ID) else {
        return Ok(());
    };
    let rssi = device.rssi().await?.unwrap_or_default();

    let reading = decode_ruuvi_data(id.clone(), rssi, ruuvi_data)?;
    tx.send(Ok(reading))
        .await
        .map_err(|_| ScanError::ChannelClosed)
}

/// Pass a failed read on to the consumer. Returns `false` once the channel is closed.
async fn report(tx: &mpsc::Sender<ReadingResult>, result: Result<(), ScanError>) -> bool {
    let err = match result {
        Ok(()) => return true,
        Err(ScanError::ChannelClosed) => return false,
        Err(ScanError::Decode(e)) => e,
        Err(other) => DecodeError::InvalidData(other.to_string()),
    };
    tx.send(Err(err)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_to_device_id() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let id: DeviceId = addr.into();
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_report_forwards_failures() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(report(&tx, Ok(())).await);
        assert!(report(&tx, Err(DecodeError::InvalidData("short".into()).into())).await);
        assert!(report(&tx, Err(ScanError::Bluetooth("gone".into()))).await);

        assert_eq!(rx.recv().await, Some(Err(DecodeError::InvalidData("short".into()))));
        assert_eq!(
            rx.recv().await,
            Some(Err(DecodeError::InvalidData("Bluetooth error: gone".into())))
        );
    }

    #[tokio::test]
    async fn test_report_stops_on_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!report(&tx, Err(ScanError::ChannelClosed)).await);
        assert!(!report(&tx, Err(ScanError::Bluetooth("gone".into()))).await);
    }
}
