//! Distance estimation from received signal strength.
//!
//! An empirical piecewise power-law fit of `rssi / reference` to meters.
//! The constants and the `ratio < 1.0` branch condition are part of the
//! observable behavior and must not be tuned.

use crate::advertisement::REFERENCE_UNKNOWN;

const NEAR_EXPONENT: i32 = 10;
const FAR_COEFFICIENT: f64 = 0.89976;
const FAR_EXPONENT: f64 = 7.7095;
const FAR_OFFSET: f64 = 0.111;

/// Estimate the distance in meters to a beacon.
///
/// Returns `f64::INFINITY` when the distance is unknown: no signal reading
/// (`signal_strength == 0`) or no calibration
/// (`reference_level == REFERENCE_UNKNOWN`). Infinity means "no number to
/// show", and sorts after every finite estimate.
pub fn estimate(signal_strength: i16, reference_level: u8) -> f64 {
    if signal_strength == 0 || reference_level == REFERENCE_UNKNOWN {
        return f64::INFINITY;
    }

    let ratio = f64::from(signal_strength) / f64::from(reference_level);
    if ratio < 1.0 {
        ratio.powi(NEAR_EXPONENT)
    } else {
        FAR_COEFFICIENT * ratio.powf(FAR_EXPONENT) + FAR_OFFSET
    }
}
