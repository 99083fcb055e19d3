use crate::beacon::{BeaconIdentity, Sighting};
use crate::mac_address::MacAddress;

/// A stable address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Same address as [`TEST_ADDRESS`], in the form scanners deliver.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build a 30-byte iBeacon scan record.
pub fn ibeacon_record(uuid: [u8; 16], major: u16, minor: u16, tx_power: u8) -> Vec<u8> {
    let mut raw = vec![0x02, 0x01, 0x06, 0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15];
    raw.extend_from_slice(&uuid);
    raw.extend_from_slice(&major.to_be_bytes());
    raw.extend_from_slice(&minor.to_be_bytes());
    raw.push(tx_power);
    raw
}

/// Identity with a calibrated reference level, for tests that don't decode.
pub fn identity(address: &str, uuid: &str, major: u16, minor: u16) -> BeaconIdentity {
    BeaconIdentity {
        address: address.to_string(),
        uuid: uuid.to_string(),
        major,
        minor,
        reference_level: 58,
    }
}

/// Sighting of a default iBeacon record from `address`.
pub fn sighting(address: MacAddress, rssi: i16) -> Sighting {
    Sighting {
        address,
        rssi,
        advertisement: ibeacon_record([0x11; 16], 1, 2, 0xC5),
        name: None,
    }
}
