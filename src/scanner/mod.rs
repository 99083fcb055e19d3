//! BLE scanner abstraction.
//!
//! Each backend runs its own task and pushes one [`Sighting`] per received
//! advertisement into a bounded channel. Backends do not decode: the raw
//! scan record is handed to the consumer as-is.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::beacon::Sighting;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Apple's Bluetooth SIG company identifier, used by iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Manufacturer data prefix of an iBeacon frame: company id (LE), type, length.
#[cfg(feature = "bluer")]
pub const IBEACON_PREFIX: [u8; 4] = [0x4C, 0x00, 0x02, 0x15];

/// Flags AD structure leading every reconstructed scan record.
pub const FLAGS_AD: [u8; 3] = [0x02, 0x01, 0x06];

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size for sightings.
pub const SIGHTING_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;

        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;

        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Rebuild a scan record from parsed manufacturer data.
///
/// Produces the flags AD structure followed by a single manufacturer AD
/// structure: `02 01 06 <len> FF <company LE> <payload>`. Payload bytes that
/// do not fit a one-byte AD length are dropped.
pub fn scan_record_from_manufacturer_data(company_id: u16, payload: &[u8]) -> Vec<u8> {
    // length byte counts the type byte and the two company id bytes
    let payload = &payload[..payload.len().min(usize::from(u8::MAX) - 3)];
    let mut record = Vec::with_capacity(FLAGS_AD.len() + 4 + payload.len());
    record.extend_from_slice(&FLAGS_AD);
    record.push((payload.len() + 3) as u8);
    record.push(MANUFACTURER_DATA_TYPE);
    record.extend_from_slice(&company_id.to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Start scanning using the specified backend.
///
/// The returned receiver yields sightings until the backend task ends.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<Sighting>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}
