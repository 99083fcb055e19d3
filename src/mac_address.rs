//! Hardware address of a beacon radio.
//!
//! Scanner backends hand out addresses as 6 raw bytes; everything above the
//! scanner layer (tracker, store, output) keys beacons by the canonical
//! `AA:BB:CC:DD:EE:FF` string produced by [`MacAddress`]'s `Display`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address in transmission-independent (big-endian) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing an address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid address: expected 6 octets, got {0}")]
    WrongOctetCount(usize),
    #[error("invalid address: octet {0} must be two hex digits")]
    WrongOctetWidth(usize),
    #[error("invalid address: '{0}' is not hex")]
    NotHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(ParseMacError::WrongOctetCount(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, octet) in octets.iter().enumerate() {
            if octet.len() != 2 {
                return Err(ParseMacError::WrongOctetWidth(i));
            }
            // from_str_radix alone would accept a leading sign
            if !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError::NotHex(octet.to_string()));
            }
            bytes[i] =
                u8::from_str_radix(octet, 16).map_err(|_| ParseMacError::NotHex(octet.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}
