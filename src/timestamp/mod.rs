//! Timestamps
//!
//! A [`Timestamp`] is an immutable `(seconds, nanoseconds)` pair tagged with a
//! [`TimestampKind`]: one of four resolutions (second, millisecond,
//! microsecond, nanosecond) crossed with absolute (since the Unix epoch) or
//! elapsed (a span). Every timestamp packs into one tagged `u64`, see
//! [`codec`].
//!
//! # Ordering
//!
//! Equality, ordering and hashing use only `(seconds, nanoseconds)`, so
//! `1000 ms == 1 s` regardless of the kind that produced each operand.
//!
//! # Arithmetic
//!
//! Binary operations widen both operands to the finer resolution before
//! combining them; a result is never silently narrowed. Narrowing is the
//! explicit, lossy [`Timestamp::truncate_to`].

pub mod codec;
mod error;

pub use error::TimestampError;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Resolution of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scale {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl Scale {
    /// All scales, coarsest first
    pub fn all() -> [Scale; 4] {
        [Scale::Seconds, Scale::Millis, Scale::Micros, Scale::Nanos]
    }

    /// Units of this scale in one second
    pub fn units_per_second(self) -> i128 {
        match self {
            Scale::Seconds => 1,
            Scale::Millis => 1_000,
            Scale::Micros => 1_000_000,
            Scale::Nanos => 1_000_000_000,
        }
    }

    /// Nanoseconds in one unit of this scale
    pub fn nanos_per_unit(self) -> u32 {
        match self {
            Scale::Seconds => 1_000_000_000,
            Scale::Millis => 1_000_000,
            Scale::Micros => 1_000,
            Scale::Nanos => 1,
        }
    }

    /// The finer of two scales
    pub fn finer(self, other: Scale) -> Scale {
        self.max(other)
    }

    fn fraction_digits(self) -> usize {
        match self {
            Scale::Seconds => 0,
            Scale::Millis => 3,
            Scale::Micros => 6,
            Scale::Nanos => 9,
        }
    }
}

/// Whether a timestamp is a point in time or a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Offset from the Unix epoch
    Absolute,
    /// Duration, may be negative
    Elapsed,
}

/// Resolution plus domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimestampKind {
    pub scale: Scale,
    pub domain: Domain,
}

impl TimestampKind {
    pub const ABSOLUTE_SECONDS: Self = Self::new(Scale::Seconds, Domain::Absolute);
    pub const ABSOLUTE_MILLIS: Self = Self::new(Scale::Millis, Domain::Absolute);
    pub const ABSOLUTE_MICROS: Self = Self::new(Scale::Micros, Domain::Absolute);
    pub const ABSOLUTE_NANOS: Self = Self::new(Scale::Nanos, Domain::Absolute);
    pub const ELAPSED_SECONDS: Self = Self::new(Scale::Seconds, Domain::Elapsed);
    pub const ELAPSED_MILLIS: Self = Self::new(Scale::Millis, Domain::Elapsed);
    pub const ELAPSED_MICROS: Self = Self::new(Scale::Micros, Domain::Elapsed);
    pub const ELAPSED_NANOS: Self = Self::new(Scale::Nanos, Domain::Elapsed);

    pub const fn new(scale: Scale, domain: Domain) -> Self {
        Self { scale, domain }
    }

    pub fn is_absolute(self) -> bool {
        self.domain == Domain::Absolute
    }
}

impl fmt::Display for TimestampKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domain = match self.domain {
            Domain::Absolute => "absolute",
            Domain::Elapsed => "elapsed",
        };
        let scale = match self.scale {
            Scale::Seconds => "seconds",
            Scale::Millis => "millis",
            Scale::Micros => "micros",
            Scale::Nanos => "nanos",
        };
        write!(f, "{}-{}", domain, scale)
    }
}

/// An immutable tagged timestamp
///
/// Invariant: `nanos < 1_000_000_000`, `nanos` is a multiple of the kind's
/// unit and the total magnitude fits the kind's encoded width. Negative
/// values are normalised so that `seconds` carries the sign (`-1.5 s` is
/// `seconds = -2, nanos = 500_000_000`).
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    kind: TimestampKind,
    seconds: i64,
    nanos: u32,
}

impl Timestamp {
    /// The distinguished zero timestamp (all encoded bits zero)
    pub const ZERO: Timestamp = Timestamp {
        kind: TimestampKind::ELAPSED_SECONDS,
        seconds: 0,
        nanos: 0,
    };

    /// Construct from seconds and nanoseconds
    pub fn new(kind: TimestampKind, seconds: i64, nanos: u32) -> Result<Self, TimestampError> {
        if nanos as i128 >= NANOS_PER_SEC {
            return Err(TimestampError::InvalidSubsecond(nanos));
        }
        if nanos % kind.scale.nanos_per_unit() != 0 {
            return Err(TimestampError::PrecisionLoss { kind, nanos });
        }

        let units = seconds as i128 * kind.scale.units_per_second()
            + (nanos / kind.scale.nanos_per_unit()) as i128;
        check_range(kind, units)?;

        Ok(Self {
            kind,
            seconds,
            nanos,
        })
    }

    /// Construct from a count of resolution units
    pub fn from_units(kind: TimestampKind, units: i128) -> Result<Self, TimestampError> {
        check_range(kind, units)?;

        let per_sec = kind.scale.units_per_second();
        let seconds = units.div_euclid(per_sec) as i64;
        let nanos = (units.rem_euclid(per_sec) as u32) * kind.scale.nanos_per_unit();

        Ok(Self {
            kind,
            seconds,
            nanos,
        })
    }

    /// Absolute timestamp from units since the epoch
    pub fn absolute(scale: Scale, units: i64) -> Result<Self, TimestampError> {
        Self::from_units(TimestampKind::new(scale, Domain::Absolute), units as i128)
    }

    /// Elapsed timestamp from a unit count
    pub fn elapsed(scale: Scale, units: i64) -> Result<Self, TimestampError> {
        Self::from_units(TimestampKind::new(scale, Domain::Elapsed), units as i128)
    }

    /// Current wall-clock time at millisecond resolution
    pub fn now() -> Self {
        let millis = Utc::now().timestamp_millis() as i128;
        Self {
            kind: TimestampKind::ABSOLUTE_MILLIS,
            seconds: millis.div_euclid(1_000) as i64,
            nanos: (millis.rem_euclid(1_000) as u32) * 1_000_000,
        }
    }

    pub fn kind(&self) -> TimestampKind {
        self.kind
    }

    pub fn scale(&self) -> Scale {
        self.kind.scale
    }

    /// Whole seconds (floor)
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Nanoseconds past `seconds`, always non-negative
    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// `(kind, seconds, nanoseconds)`
    pub fn parts(&self) -> (TimestampKind, i64, u32) {
        (self.kind, self.seconds, self.nanos)
    }

    /// Value counted in units of this timestamp's own scale
    pub fn units(&self) -> i128 {
        self.seconds as i128 * self.kind.scale.units_per_second()
            + (self.nanos / self.kind.scale.nanos_per_unit()) as i128
    }

    /// Value counted in nanoseconds
    pub fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SEC + self.nanos as i128
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }

    pub fn is_negative(&self) -> bool {
        self.seconds < 0
    }

    pub fn is_absolute(&self) -> bool {
        self.kind.is_absolute()
    }

    /// Three-way comparison by `(seconds, nanoseconds)`
    pub fn compare(&self, other: &Timestamp) -> Ordering {
        self.cmp(other)
    }

    /// Tagged 64-bit form
    pub fn to_bits(&self) -> u64 {
        codec::encode_timestamp(self)
    }

    /// Decode from the tagged 64-bit form
    pub fn from_bits(bits: u64) -> Result<Self, TimestampError> {
        codec::decode(bits)
    }

    /// Re-express at another scale without losing precision.
    ///
    /// Fails with `PrecisionLoss` when narrowing would drop digits.
    pub fn to_scale(&self, scale: Scale) -> Result<Self, TimestampError> {
        Self::new(TimestampKind::new(scale, self.kind.domain), self.seconds, self.nanos)
    }

    /// Narrow to a coarser scale, discarding sub-unit precision (rounds
    /// toward negative infinity). This is the only lossy conversion.
    pub fn truncate_to(&self, scale: Scale) -> Result<Self, TimestampError> {
        let kind = TimestampKind::new(scale, self.kind.domain);
        let units = self.total_nanos().div_euclid(scale.nanos_per_unit() as i128);
        Self::from_units(kind, units)
    }

    /// Same instant reinterpreted in another domain
    pub fn with_domain(&self, domain: Domain) -> Result<Self, TimestampError> {
        Self::from_units(TimestampKind::new(self.kind.scale, domain), self.units())
    }

    /// Checked addition.
    ///
    /// `absolute + elapsed` and `elapsed + absolute` are absolute,
    /// `elapsed + elapsed` is elapsed, `absolute + absolute` is rejected.
    pub fn checked_add(&self, rhs: &Timestamp) -> Result<Self, TimestampError> {
        let domain = match (self.kind.domain, rhs.kind.domain) {
            (Domain::Absolute, Domain::Absolute) => {
                return Err(TimestampError::IncompatibleDomains {
                    op: "add",
                    lhs: self.kind,
                    rhs: rhs.kind,
                })
            }
            (Domain::Elapsed, Domain::Elapsed) => Domain::Elapsed,
            _ => Domain::Absolute,
        };
        self.combine(rhs, domain, self.total_nanos() + rhs.total_nanos())
    }

    /// Checked subtraction.
    ///
    /// `absolute - absolute` is elapsed, `absolute - elapsed` is absolute,
    /// `elapsed - elapsed` is elapsed, `elapsed - absolute` is rejected.
    pub fn checked_sub(&self, rhs: &Timestamp) -> Result<Self, TimestampError> {
        let domain = match (self.kind.domain, rhs.kind.domain) {
            (Domain::Elapsed, Domain::Absolute) => {
                return Err(TimestampError::IncompatibleDomains {
                    op: "subtract",
                    lhs: self.kind,
                    rhs: rhs.kind,
                })
            }
            (Domain::Absolute, Domain::Absolute) => Domain::Elapsed,
            (domain, _) => domain,
        };
        self.combine(rhs, domain, self.total_nanos() - rhs.total_nanos())
    }

    fn combine(&self, rhs: &Timestamp, domain: Domain, nanos: i128) -> Result<Self, TimestampError> {
        let scale = self.kind.scale.finer(rhs.kind.scale);
        // Both operands are exact at the finer scale, so is their sum
        let units = nanos / scale.nanos_per_unit() as i128;
        Self::from_units(TimestampKind::new(scale, domain), units)
    }
}

fn check_range(kind: TimestampKind, units: i128) -> Result<(), TimestampError> {
    let max = codec::max_magnitude(kind);
    if units.unsigned_abs() > max as u128 {
        return Err(TimestampError::OutOfRange { kind, units, max });
    }
    Ok(())
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.seconds == other.seconds && self.nanos == other.nanos
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.seconds, self.nanos).cmp(&(other.seconds, other.nanos))
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seconds.hash(state);
        self.nanos.hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute() {
            if let Some(dt) = DateTime::<Utc>::from_timestamp(self.seconds, self.nanos) {
                return write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
            }
        }

        let digits = self.kind.scale.fraction_digits();
        // Print the signed magnitude rather than the floored representation
        let total = self.total_nanos();
        let sign = if total < 0 { "-" } else { "" };
        let abs = total.unsigned_abs();
        let secs = abs / NANOS_PER_SEC as u128;
        let frac = abs % NANOS_PER_SEC as u128;

        if digits == 0 {
            write!(f, "{}{}s", sign, secs)
        } else {
            let frac = frac / 10u128.pow(9 - digits as u32);
            write!(f, "{}{}.{:0width$}s", sign, secs, frac, width = digits)
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_bits())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        codec::decode(bits).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: i64) -> Timestamp {
        Timestamp::absolute(Scale::Seconds, s).unwrap()
    }

    #[test]
    fn test_equality_ignores_resolution() {
        let a = Timestamp::absolute(Scale::Millis, 1_500).unwrap();
        let b = Timestamp::absolute(Scale::Nanos, 1_500_000_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.compare(&b), Ordering::Equal);
        assert!(secs(1) < a);
    }

    #[test]
    fn test_negative_normalisation() {
        let ts = Timestamp::elapsed(Scale::Millis, -1_500).unwrap();
        assert_eq!(ts.seconds(), -2);
        assert_eq!(ts.subsec_nanos(), 500_000_000);
        assert_eq!(ts.units(), -1_500);
        assert!(ts.is_negative());
        assert_eq!(ts.to_string(), "-1.500s");
    }

    #[test]
    fn test_add_widens_to_finer_scale() {
        let base = secs(10);
        let step = Timestamp::elapsed(Scale::Micros, 250).unwrap();

        let sum = base.checked_add(&step).unwrap();
        assert_eq!(sum.kind(), TimestampKind::ABSOLUTE_MICROS);
        assert_eq!(sum.units(), 10_000_250);
    }

    #[test]
    fn test_subtract_domains() {
        let a = Timestamp::absolute(Scale::Millis, 5_000).unwrap();
        let b = secs(2);

        let span = a.checked_sub(&b).unwrap();
        assert_eq!(span.kind(), TimestampKind::ELAPSED_MILLIS);
        assert_eq!(span.units(), 3_000);

        let back = a.checked_sub(&span).unwrap();
        assert!(back.is_absolute());
        assert_eq!(back, b);

        assert!(matches!(
            span.checked_sub(&a),
            Err(TimestampError::IncompatibleDomains { .. })
        ));
        assert!(matches!(
            a.checked_add(&b),
            Err(TimestampError::IncompatibleDomains { .. })
        ));
    }

    #[test]
    fn test_add_overflow_fails() {
        let max = codec::max_magnitude(TimestampKind::ELAPSED_SECONDS) as i64;
        let big = Timestamp::elapsed(Scale::Seconds, max).unwrap();
        let one = Timestamp::elapsed(Scale::Seconds, 1).unwrap();
        assert!(matches!(
            big.checked_add(&one),
            Err(TimestampError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_narrowing_is_explicit() {
        let ts = Timestamp::absolute(Scale::Millis, 1_999).unwrap();
        assert!(matches!(
            ts.to_scale(Scale::Seconds),
            Err(TimestampError::PrecisionLoss { .. })
        ));

        let truncated = ts.truncate_to(Scale::Seconds).unwrap();
        assert_eq!(truncated, secs(1));

        let widened = ts.to_scale(Scale::Nanos).unwrap();
        assert_eq!(widened, ts);
        assert_eq!(widened.scale(), Scale::Nanos);
    }

    #[test]
    fn test_truncate_negative_floors() {
        let ts = Timestamp::elapsed(Scale::Millis, -1_001).unwrap();
        let truncated = ts.truncate_to(Scale::Seconds).unwrap();
        assert_eq!(truncated.units(), -2);
    }

    #[test]
    fn test_invalid_subsecond() {
        assert_eq!(
            Timestamp::new(TimestampKind::ABSOLUTE_NANOS, 0, 1_000_000_000).unwrap_err(),
            TimestampError::InvalidSubsecond(1_000_000_000)
        );
    }

    #[test]
    fn test_serde_uses_tagged_bits() {
        let ts = Timestamp::absolute(Scale::Micros, 42).unwrap();
        let bytes = bincode::serialize(&ts).unwrap();
        assert_eq!(bytes, ts.to_bits().to_le_bytes());

        let back: Timestamp = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.parts(), ts.parts());
    }

    #[test]
    fn test_display() {
        assert_eq!(secs(0).to_string(), "1970-01-01T00:00:00Z");
        assert_eq!(Timestamp::elapsed(Scale::Seconds, 30).unwrap().to_string(), "30s");
        assert_eq!(
            Timestamp::elapsed(Scale::Micros, 1_000_001).unwrap().to_string(),
            "1.000001s"
        );
    }

    #[test]
    fn test_now_is_absolute_millis() {
        let now = Timestamp::now();
        assert_eq!(now.kind(), TimestampKind::ABSOLUTE_MILLIS);
        assert!(!now.is_negative());
        assert_eq!(Timestamp::from_bits(now.to_bits()).unwrap(), now);
    }
}
