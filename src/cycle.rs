//! Scan cycle timing.
//!
//! A scan session ticks at a fixed period; every tick closes one cycle of the
//! presence tracker. The whole session is bounded by a hard stop.

use std::time::Duration;

/// Default time between cycle boundaries.
pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_millis(2500);

/// Default hard stop for one scan session.
pub const DEFAULT_SESSION_LIMIT: Duration = Duration::from_secs(60 * 60);

/// Parse a duration from a human-readable string.
///
/// Accepts `500ms`, `3s`, `1m`, `2h`, or a bare number of seconds.
///
/// ```
/// use beacon_listener::cycle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("2500ms").unwrap(), Duration::from_millis(2500));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    let (num, unit, scale) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds", 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours", 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes", 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds", 1000)
    } else {
        (src, "duration", 1000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    value
        .checked_mul(scale)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {src}"))
}

/// Like [`parse_duration`] but rejects zero, for timer periods.
pub fn parse_period(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err("period must be greater than zero".to_string()),
        period => Ok(period),
    }
}
