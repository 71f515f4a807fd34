use std::fmt;

use crate::UnitError;

/// Throughput of a link in bits per second.
///
/// Zero or negative means "infinite" everywhere in the simulator; a link
/// with infinite bandwidth transmits frames without serialisation delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth(i64);

impl Bandwidth {
    pub const BPS: i64 = 1;
    pub const KBPS: i64 = 1_000;
    pub const MBPS: i64 = 1_000_000;
    pub const GBPS: i64 = 1_000_000_000;

    /// The "no limit" value.
    pub const INFINITE: Bandwidth = Bandwidth(0);

    pub const fn from_bps(bps: i64) -> Self {
        Bandwidth(bps)
    }

    pub const fn bps(self) -> i64 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 <= 0
    }

    /// Parse `"<number>[ ]?<unit>?"` where the unit is one of
    /// `bps Kbps Mbps Gbps`; a missing unit applies `default_multiplier`.
    pub fn parse(text: &str, default_multiplier: i64) -> Result<Self, UnitError> {
        let (number, unit) = crate::split_number_and_unit(text);
        let multiplier = match unit {
            "" => default_multiplier,
            "bps" => Self::BPS,
            "Kbps" => Self::KBPS,
            "Mbps" => Self::MBPS,
            "Gbps" => Self::GBPS,
            other => return Err(UnitError::UnknownBandwidthUnit(other.to_string())),
        };
        let value = crate::parse_number(number)?;
        Ok(Bandwidth((value * multiplier as f64).round() as i64))
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, suffix) = match self.0 {
            v if v < Self::KBPS => (Self::BPS, "bps"),
            v if v < Self::MBPS => (Self::KBPS, "Kbps"),
            v if v < Self::GBPS => (Self::MBPS, "Mbps"),
            _ => (Self::GBPS, "Gbps"),
        };
        write!(f, "{} {}", self.0 as f64 / unit as f64, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_notation() {
        assert_eq!(Bandwidth::parse("1Mbps", Bandwidth::BPS).unwrap().bps(), 1_000_000);
        assert_eq!(Bandwidth::parse("2.5 Kbps", Bandwidth::BPS).unwrap().bps(), 2_500);
        assert_eq!(Bandwidth::parse("64", Bandwidth::KBPS).unwrap().bps(), 64_000);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(Bandwidth::parse("3 furlongs", Bandwidth::BPS).is_err());
    }

    #[test]
    fn zero_is_infinite() {
        assert!(Bandwidth::INFINITE.is_infinite());
        assert!(Bandwidth::from_bps(-5).is_infinite());
        assert!(!Bandwidth::from_bps(1).is_infinite());
    }

    #[test]
    fn renders_in_largest_unit() {
        assert_eq!(Bandwidth::from_bps(10_000_000).to_string(), "10 Mbps");
        assert_eq!(Bandwidth::from_bps(999).to_string(), "999 bps");
        assert_eq!(Bandwidth::from_bps(1_500_000_000).to_string(), "1.5 Gbps");
    }
}
