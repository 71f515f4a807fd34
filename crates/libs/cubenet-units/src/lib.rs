//! # cubenet-units
//!
//! Typed integer quantities used throughout the cubenet simulator: virtual
//! [`Time`] in nanoseconds and link [`Bandwidth`] in bits per second. Both
//! parse the human notation used by scenario files (`"10ms"`, `"1 Mbps"`)
//! and render back in the largest unit that keeps the value at or above 1.

mod bandwidth;
mod time;

pub use bandwidth::Bandwidth;
pub use time::Time;

/// Errors from parsing a unit-carrying quantity.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("unknown time unit '{0}' (expected ns, us, ms, s, m or h)")]
    UnknownTimeUnit(String),

    #[error("unknown bandwidth unit '{0}' (expected bps, Kbps, Mbps or Gbps)")]
    UnknownBandwidthUnit(String),

    #[error("'{0}' is not a number")]
    BadNumber(String),
}

pub(crate) fn split_number_and_unit(input: &str) -> (&str, &str) {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    (number, unit.trim())
}

pub(crate) fn parse_number(text: &str) -> Result<f64, UnitError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| UnitError::BadNumber(text.to_string()))
}
