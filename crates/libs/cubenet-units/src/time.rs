use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::UnitError;

/// An instant or difference of virtual time, stored in nanoseconds.
///
/// A negative value is the "unspecified" sentinel used by callers that
/// distinguish "no time given" from time zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    pub const NANOSEC: i64 = 1;
    pub const MICROSEC: i64 = 1_000;
    pub const MILLISEC: i64 = 1_000_000;
    pub const SEC: i64 = 1_000_000_000;
    pub const MIN: i64 = 60_000_000_000;
    pub const HOUR: i64 = 3_600_000_000_000;

    pub const ZERO: Time = Time(0);

    /// The "no time given" sentinel.
    pub const UNSPECIFIED: Time = Time(-1);

    pub const fn from_nanos(nanos: i64) -> Self {
        Time(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Time(millis * Self::MILLISEC)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Time(secs * Self::SEC)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub const fn is_unspecified(self) -> bool {
        self.0 < 0
    }

    /// Parse `"<number>[ ]?<unit>?"` where the unit is one of
    /// `ns us ms s m h`. A missing unit applies `default_multiplier`
    /// (one of the associated unit constants). Fractional numbers are
    /// accepted and rounded to whole nanoseconds.
    pub fn parse(text: &str, default_multiplier: i64) -> Result<Self, UnitError> {
        let (number, unit) = crate::split_number_and_unit(text);
        let multiplier = match unit {
            "" => default_multiplier,
            "ns" => Self::NANOSEC,
            "us" => Self::MICROSEC,
            "ms" => Self::MILLISEC,
            "s" => Self::SEC,
            "m" => Self::MIN,
            "h" => Self::HOUR,
            other => return Err(UnitError::UnknownTimeUnit(other.to_string())),
        };
        let value = crate::parse_number(number)?;
        Ok(Time((value * multiplier as f64).round() as i64))
    }

    /// Render in the requested unit, e.g. `format_in(Time::SEC)` -> `"0.1 s"`.
    pub fn format_in(self, unit: i64) -> String {
        let suffix = match unit {
            Self::NANOSEC => "ns",
            Self::MICROSEC => "us",
            Self::MILLISEC => "ms",
            Self::SEC => "s",
            Self::MIN => "m",
            Self::HOUR => "h",
            _ => "ns",
        };
        format!("{} {}", self.0 as f64 / unit as f64, suffix)
    }

    fn best_unit(self) -> i64 {
        match self.0 {
            v if v < Self::MICROSEC => Self::NANOSEC,
            v if v < Self::MILLISEC => Self::MICROSEC,
            v if v < Self::SEC => Self::MILLISEC,
            v if v < Self::MIN => Self::SEC,
            v if v < Self::HOUR => Self::MIN,
            _ => Self::HOUR,
        }
    }
}

impl fmt::Display for Time {
    /// Renders using the largest unit in which the value is at least 1.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_in(self.best_unit()))
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.0 += rhs.0;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_explicit_units() {
        assert_eq!(Time::parse("10ms", Time::SEC).unwrap().value(), 10 * Time::MILLISEC);
        assert_eq!(Time::parse("24.5us", Time::SEC).unwrap().value(), 24_500);
        assert_eq!(Time::parse("1 h", Time::SEC).unwrap().value(), Time::HOUR);
        assert_eq!(Time::parse("0ns", Time::SEC).unwrap(), Time::ZERO);
    }

    #[test]
    fn parses_with_default_multiplier() {
        assert_eq!(Time::parse("10", Time::SEC).unwrap().value(), 10 * Time::SEC);
        assert_eq!(Time::parse("3", Time::NANOSEC).unwrap().value(), 3);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(Time::parse("5 parsecs", Time::SEC).is_err());
        assert!(Time::parse("xyz", Time::SEC).is_err());
    }

    #[test]
    fn renders_in_largest_unit() {
        assert_eq!(Time::from_nanos(990 * Time::MILLISEC).to_string(), "990 ms");
        assert_eq!(Time::from_nanos(1_250).to_string(), "1.25 us");
        assert_eq!(Time::from_secs(90).to_string(), "1.5 m");
    }

    #[test]
    fn display_round_trips_through_parse() {
        for unit in [
            Time::NANOSEC,
            Time::MICROSEC,
            Time::MILLISEC,
            Time::SEC,
            Time::MIN,
            Time::HOUR,
        ] {
            let t = Time::from_nanos(90 * Time::MILLISEC);
            let rendered = t.format_in(unit);
            assert_eq!(Time::parse(&rendered, Time::SEC).unwrap(), t, "unit {unit}");
        }
    }

    #[test]
    fn ordering_and_sum() {
        let a = Time::from_millis(5);
        let b = Time::from_millis(7);
        assert!(a < b);
        assert_eq!((a + b).value(), 12 * Time::MILLISEC);
        let mut c = a;
        c += b;
        assert_eq!(c, a + b);
    }
}
