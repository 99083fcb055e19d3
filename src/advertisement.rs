//! Decoding of raw beacon advertisements.
//!
//! The decoder works on the full scan record, not on the manufacturer
//! payload alone. For an iBeacon-shaped record the byte layout is:
//!
//! ```text
//!  0..3   flags AD structure           02 01 06
//!  3..5   manufacturer AD header       1A FF
//!  5..7   company id                   4C 00
//!  7..9   beacon type / length         02 15
//!  9..25  proximity UUID (16 bytes)
//! 25..27  major (big-endian)
//! 27..29  minor (big-endian)
//! 29      calibrated TX power
//! ```
//!
//! Only the UUID window is mandatory. Major, minor and the reference level
//! fall back to documented defaults when the buffer ends early.

use crate::beacon::BeaconIdentity;
use thiserror::Error;
use uuid::Uuid;

/// Start of the 16-byte UUID window.
pub const UUID_OFFSET: usize = 9;

/// Shortest buffer that still carries a full UUID.
pub const MIN_ADVERTISEMENT_LEN: usize = UUID_OFFSET + 16;

const MAJOR_OFFSET: usize = 25;
const MINOR_OFFSET: usize = 27;
const REFERENCE_OFFSET: usize = 29;

/// Reference level reported when the advertisement carries no calibration byte.
pub const REFERENCE_UNKNOWN: u8 = 0xFF;

/// Errors returned by [`decode`].
///
/// A buffer long enough for the UUID but too short for major, minor or the
/// reference level is not an error; those fields take their defaults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("advertisement too short: {len} bytes, need at least {}", MIN_ADVERTISEMENT_LEN)]
    TooShort { len: usize },
}

/// Decode a raw advertisement received from `address`.
///
/// Pure and deterministic; safe to call from any thread.
pub fn decode(address: &str, raw: &[u8]) -> Result<BeaconIdentity, DecodeError> {
    let window: [u8; 16] = raw
        .get(UUID_OFFSET..MIN_ADVERTISEMENT_LEN)
        .and_then(|w| w.try_into().ok())
        .ok_or(DecodeError::TooShort { len: raw.len() })?;

    let mut buf = Uuid::encode_buffer();
    let uuid = Uuid::from_bytes(window)
        .hyphenated()
        .encode_upper(&mut buf)
        .to_string();

    Ok(BeaconIdentity {
        address: address.to_string(),
        uuid,
        major: read_u16_be(raw, MAJOR_OFFSET),
        minor: read_u16_be(raw, MINOR_OFFSET),
        reference_level: raw
            .get(REFERENCE_OFFSET)
            .map_or(REFERENCE_UNKNOWN, |b| 0xFF - b),
    })
}

fn read_u16_be(raw: &[u8], offset: usize) -> u16 {
    raw.get(offset..offset + 2)
        .map_or(0, |b| u16::from_be_bytes([b[0], b[1]]))
}
