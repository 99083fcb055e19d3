//! Beacon value types exchanged between the scanner and the core.

use crate::mac_address::MacAddress;

/// Identity of a beacon as derived from one advertisement.
///
/// `address` is the hardware address of the radio; the remaining fields are
/// the broadcast identity triple plus the calibrated one-meter reference
/// level. Built by [`crate::advertisement::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeaconIdentity {
    /// Hardware address, `AA:BB:CC:DD:EE:FF` for scanned beacons
    pub address: String,
    /// Upper-case 8-4-4-4-12 UUID, always 36 characters
    pub uuid: String,
    /// 0 when the advertisement is too short to carry it
    pub major: u16,
    /// 0 when the advertisement is too short to carry it
    pub minor: u16,
    /// `0xFF - raw` calibration byte, [`crate::advertisement::REFERENCE_UNKNOWN`] if absent
    pub reference_level: u8,
}

impl BeaconIdentity {
    /// True when `other` broadcasts the same (uuid, major, minor) triple.
    pub fn same_broadcast(&self, uuid: &str, major: u16, minor: u16) -> bool {
        self.uuid == uuid && self.major == major && self.minor == minor
    }
}

/// A single radio sighting as delivered by a scanner backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub address: MacAddress,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Raw advertisement bytes in the scan-record layout
    pub advertisement: Vec<u8>,
    /// Advertised local name, if any
    pub name: Option<String>,
}
