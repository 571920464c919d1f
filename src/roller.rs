//! Time rollers
//!
//! A roller maps a timestamp to the start of the period that contains it,
//! e.g. "start of the minute". Views use rollers to select whole periods.

use crate::index::Interval;
use crate::timestamp::{Domain, Scale, Timestamp, TimestampError, TimestampKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maps timestamps onto period boundaries
pub trait TimeRoller: Send + Sync + fmt::Debug {
    /// Start of the period containing `timestamp`
    fn roll(&self, timestamp: Timestamp) -> Result<Timestamp, TimestampError>;

    /// Start of the period following the one that starts at `start`
    fn next(&self, start: Timestamp) -> Result<Timestamp, TimestampError>;

    /// Closed interval covering the period containing `timestamp`
    fn period(&self, timestamp: Timestamp) -> Result<Interval, TimestampError> {
        let start = self.roll(timestamp)?;
        let next = self.next(start)?;
        let end = next.checked_sub(&Timestamp::elapsed(Scale::Nanos, 1)?)?;
        Ok(Interval { start, end })
    }
}

/// Fixed-length period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RollUnit {
    pub fn seconds(self) -> i64 {
        match self {
            RollUnit::Second => 1,
            RollUnit::Minute => 60,
            RollUnit::Hour => 3_600,
            RollUnit::Day => 86_400,
        }
    }
}

impl fmt::Display for RollUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollUnit::Second => "second",
            RollUnit::Minute => "minute",
            RollUnit::Hour => "hour",
            RollUnit::Day => "day",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RollUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "second" | "s" => Ok(RollUnit::Second),
            "minute" | "m" => Ok(RollUnit::Minute),
            "hour" | "h" => Ok(RollUnit::Hour),
            "day" | "d" => Ok(RollUnit::Day),
            other => Err(format!("Unknown roll unit: {}", other)),
        }
    }
}

/// Rolls down to a multiple of a fixed unit since the epoch (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatingRoller {
    unit: RollUnit,
}

impl TruncatingRoller {
    pub fn new(unit: RollUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> RollUnit {
        self.unit
    }
}

impl TimeRoller for TruncatingRoller {
    fn roll(&self, timestamp: Timestamp) -> Result<Timestamp, TimestampError> {
        let unit = self.unit.seconds();
        let seconds = timestamp.seconds().div_euclid(unit) * unit;
        let domain = if timestamp.is_absolute() {
            Domain::Absolute
        } else {
            Domain::Elapsed
        };
        Timestamp::new(TimestampKind::new(Scale::Seconds, domain), seconds, 0)
    }

    fn next(&self, start: Timestamp) -> Result<Timestamp, TimestampError> {
        start.checked_add(&Timestamp::elapsed(Scale::Seconds, self.unit.seconds())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: i64) -> Timestamp {
        Timestamp::absolute(Scale::Seconds, s).unwrap()
    }

    #[test]
    fn test_roll_minute() {
        let roller = TruncatingRoller::new(RollUnit::Minute);
        assert_eq!(roller.roll(ts(90)).unwrap(), ts(60));
        assert_eq!(roller.roll(ts(60)).unwrap(), ts(60));
        assert_eq!(roller.next(ts(60)).unwrap(), ts(120));
    }

    #[test]
    fn test_roll_drops_subseconds() {
        let roller = TruncatingRoller::new(RollUnit::Second);
        let t = Timestamp::absolute(Scale::Millis, 5_250).unwrap();
        assert_eq!(roller.roll(t).unwrap(), ts(5));
    }

    #[test]
    fn test_roll_before_epoch() {
        let roller = TruncatingRoller::new(RollUnit::Hour);
        assert_eq!(roller.roll(ts(-1)).unwrap(), ts(-3_600));
    }

    #[test]
    fn test_period() {
        let roller = TruncatingRoller::new(RollUnit::Day);
        let period = roller.period(ts(100_000)).unwrap();
        assert_eq!(period.start, ts(86_400));
        assert!(period.contains(ts(172_799)));
        assert!(!period.contains(ts(172_800)));
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!("Hour".parse::<RollUnit>().unwrap(), RollUnit::Hour);
        assert_eq!("d".parse::<RollUnit>().unwrap(), RollUnit::Day);
        assert!("fortnight".parse::<RollUnit>().is_err());
    }
}
