//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running. BlueZ only
//! exposes parsed manufacturer data, so the scan record is rebuilt with
//! [`scan_record_from_manufacturer_data`] before it is handed on.

use super::{
    APPLE_COMPANY_ID, IBEACON_PREFIX, SIGHTING_CHANNEL_BUFFER_SIZE, ScanError,
    scan_record_from_manufacturer_data,
};
use crate::beacon::Sighting;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start an LE discovery session on the default adapter.
///
/// Duplicate reports are requested so every advertisement carrying a fresh
/// RSSI produces a sighting, not only the first one per device.
pub async fn start_scan() -> Result<mpsc::Receiver<Sighting>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(SIGHTING_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                match read_sighting(&adapter, address).await {
                    Ok(Some(sighting)) => {
                        if tx.send(sighting).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(%address, error = %e, "failed to read device"),
                }
            }
        }
    });

    Ok(rx)
}

/// Read the current advertisement state of a device.
///
/// Returns `None` for devices without an iBeacon manufacturer frame.
async fn read_sighting(adapter: &Adapter, address: Address) -> Result<Option<Sighting>, ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    let Some(payload) = manufacturer_data.get(&APPLE_COMPANY_ID) else {
        return Ok(None);
    };
    if !payload.starts_with(&IBEACON_PREFIX[2..]) {
        return Ok(None);
    }

    // a missing RSSI reads as 0, which the distance estimate treats as unknown
    let rssi = device.rssi().await?.unwrap_or(0);
    let name = device.name().await?;

    Ok(Some(Sighting {
        address: address.into(),
        rssi,
        advertisement: scan_record_from_manufacturer_data(APPLE_COMPANY_ID, payload),
        name,
    }))
}
