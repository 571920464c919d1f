//! Tagged 64-bit timestamp encoding
//!
//! The top bits of every encoded value carry a tag naming the timestamp kind.
//! Tags are read progressively: the 2-bit tag is examined first and only the
//! `00` ("extended") region is refined by the 4-, 6- and 8-bit tags.
//!
//! ```text
//! tag        width  kind                payload (sign + magnitude)
//! 01         2      absolute millis     1 + 61 bits
//! 10         2      absolute micros     1 + 61 bits
//! 11         2      absolute nanos      1 + 61 bits
//! 0001       4      absolute seconds    1 + 59 bits
//! 0010       4      elapsed nanos       1 + 59 bits
//! 0011       4      elapsed micros      1 + 59 bits
//! 000001     6      elapsed millis      1 + 57 bits
//! 000010     6      elapsed seconds     1 + 57 bits
//! 000011     6      reserved
//! 00000000   8      ZERO (payload must be zero)
//! ```
//!
//! Magnitudes are counted in units of the kind's resolution. The all-zero
//! word is the distinguished ZERO timestamp, an elapsed-seconds zero.

use crate::timestamp::{Domain, Scale, Timestamp, TimestampError, TimestampKind};

/// Tag prefix and its width in bits
#[derive(Debug, Clone, Copy)]
struct Tag {
    prefix: u64,
    width: u32,
}

impl Tag {
    const fn new(prefix: u64, width: u32) -> Self {
        Self { prefix, width }
    }

    /// Number of magnitude bits left after the tag and the sign bit
    fn magnitude_bits(self) -> u32 {
        64 - self.width - 1
    }

    fn sign_shift(self) -> u32 {
        63 - self.width
    }
}

fn tag_for(kind: TimestampKind) -> Tag {
    match (kind.domain, kind.scale) {
        (Domain::Absolute, Scale::Millis) => Tag::new(0b01, 2),
        (Domain::Absolute, Scale::Micros) => Tag::new(0b10, 2),
        (Domain::Absolute, Scale::Nanos) => Tag::new(0b11, 2),
        (Domain::Absolute, Scale::Seconds) => Tag::new(0b0001, 4),
        (Domain::Elapsed, Scale::Nanos) => Tag::new(0b0010, 4),
        (Domain::Elapsed, Scale::Micros) => Tag::new(0b0011, 4),
        (Domain::Elapsed, Scale::Millis) => Tag::new(0b00_0001, 6),
        (Domain::Elapsed, Scale::Seconds) => Tag::new(0b00_0010, 6),
    }
}

/// Largest magnitude (in resolution units) representable for a kind
pub fn max_magnitude(kind: TimestampKind) -> u64 {
    (1u64 << tag_for(kind).magnitude_bits()) - 1
}

/// Encode a `(kind, seconds, nanoseconds)` triple into its tagged form.
///
/// Fails if the magnitude does not fit the kind or if the nanoseconds carry
/// precision finer than the kind's resolution.
pub fn encode(kind: TimestampKind, seconds: i64, nanos: u32) -> Result<u64, TimestampError> {
    Ok(encode_timestamp(&Timestamp::new(kind, seconds, nanos)?))
}

/// Encode an already validated timestamp
pub fn encode_timestamp(ts: &Timestamp) -> u64 {
    let kind = ts.kind();
    let units = ts.units();

    if units == 0 && kind == TimestampKind::ELAPSED_SECONDS {
        return 0;
    }

    let tag = tag_for(kind);
    let negative = units < 0;
    // Validated on construction, fits the magnitude bits
    let magnitude = units.unsigned_abs() as u64;

    (tag.prefix << (64 - tag.width)) | ((negative as u64) << tag.sign_shift()) | magnitude
}

/// Decode a tagged value, inspecting the 2-bit tag first and refining the
/// extended region with the 4-, 6- and 8-bit tags in turn.
pub fn decode(bits: u64) -> Result<Timestamp, TimestampError> {
    let (kind, tag) = match bits >> 62 {
        0b01 => (TimestampKind::ABSOLUTE_MILLIS, Tag::new(0b01, 2)),
        0b10 => (TimestampKind::ABSOLUTE_MICROS, Tag::new(0b10, 2)),
        0b11 => (TimestampKind::ABSOLUTE_NANOS, Tag::new(0b11, 2)),
        _ => match bits >> 60 {
            0b0001 => (TimestampKind::ABSOLUTE_SECONDS, Tag::new(0b0001, 4)),
            0b0010 => (TimestampKind::ELAPSED_NANOS, Tag::new(0b0010, 4)),
            0b0011 => (TimestampKind::ELAPSED_MICROS, Tag::new(0b0011, 4)),
            _ => match bits >> 58 {
                0b00_0001 => (TimestampKind::ELAPSED_MILLIS, Tag::new(0b00_0001, 6)),
                0b00_0010 => (TimestampKind::ELAPSED_SECONDS, Tag::new(0b00_0010, 6)),
                0b00_0011 => return Err(TimestampError::InvalidEncoding(bits)),
                _ => {
                    // 8-bit region: only the all-zero word is assigned
                    if bits == 0 {
                        return Ok(Timestamp::ZERO);
                    }
                    return Err(TimestampError::InvalidEncoding(bits));
                }
            },
        },
    };

    let negative = (bits >> tag.sign_shift()) & 1 == 1;
    let magnitude = bits & ((1u64 << tag.magnitude_bits()) - 1);
    let units = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };

    Timestamp::from_units(kind, units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_kinds() -> Vec<TimestampKind> {
        let mut kinds = Vec::new();
        for domain in [Domain::Absolute, Domain::Elapsed] {
            for scale in Scale::all() {
                kinds.push(TimestampKind::new(scale, domain));
            }
        }
        kinds
    }

    #[test]
    fn test_zero_is_all_zero_bits() {
        assert_eq!(encode_timestamp(&Timestamp::ZERO), 0);
        let decoded = decode(0).unwrap();
        assert!(decoded.is_zero());
        assert_eq!(decoded.kind(), TimestampKind::ELAPSED_SECONDS);
    }

    #[test]
    fn test_tags_are_distinct() {
        for kind in all_kinds() {
            let ts = Timestamp::from_units(kind, 1).unwrap();
            let decoded = decode(encode_timestamp(&ts)).unwrap();
            assert_eq!(decoded.kind(), kind, "kind {kind} did not survive");
        }
    }

    #[test]
    fn test_reserved_tags_rejected() {
        assert!(matches!(
            decode(0b00_0011u64 << 58),
            Err(TimestampError::InvalidEncoding(_))
        ));
        assert!(matches!(decode(1), Err(TimestampError::InvalidEncoding(_))));
        assert!(matches!(
            decode(0b0000_0001u64 << 56),
            Err(TimestampError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_negative_values() {
        let ts = Timestamp::new(TimestampKind::ELAPSED_MILLIS, -3, 250_000_000).unwrap();
        let decoded = decode(encode_timestamp(&ts)).unwrap();
        assert!(decoded.is_negative());
        assert_eq!(decoded.parts(), ts.parts());
    }

    #[test]
    fn test_out_of_range_fails() {
        let max = max_magnitude(TimestampKind::ELAPSED_SECONDS) as i64;
        assert!(encode(TimestampKind::ELAPSED_SECONDS, max, 0).is_ok());
        assert!(matches!(
            encode(TimestampKind::ELAPSED_SECONDS, max + 1, 0),
            Err(TimestampError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(TimestampKind::ABSOLUTE_NANOS, i64::MAX / 1_000_000_000, 0),
            Err(TimestampError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_precision_loss_fails() {
        assert!(matches!(
            encode(TimestampKind::ABSOLUTE_MILLIS, 10, 1_500),
            Err(TimestampError::PrecisionLoss { .. })
        ));
    }

    #[test]
    fn test_extreme_magnitudes_roundtrip() {
        for kind in all_kinds() {
            let max = max_magnitude(kind) as i128;
            for units in [max, -max, 1, -1] {
                let ts = Timestamp::from_units(kind, units).unwrap();
                let decoded = decode(encode_timestamp(&ts)).unwrap();
                assert_eq!(decoded.units(), units);
                assert_eq!(decoded.kind(), kind);
            }
        }
    }

    fn kind_strategy() -> impl Strategy<Value = TimestampKind> {
        (0usize..8).prop_map(|i| all_kinds()[i])
    }

    proptest! {
        #[test]
        fn test_roundtrip_proptest(kind in kind_strategy(), raw in any::<i64>()) {
            let max = max_magnitude(kind) as i128;
            let units = (raw as i128) % (max + 1);
            let ts = Timestamp::from_units(kind, units).unwrap();
            let (k, secs, nanos) = ts.parts();

            let bits = encode(k, secs, nanos).unwrap();
            let decoded = decode(bits).unwrap();

            prop_assert_eq!(decoded.parts(), (k, secs, nanos));
        }

        #[test]
        fn test_order_matches_seconds_nanos(
            a_kind in kind_strategy(),
            b_kind in kind_strategy(),
            a in -1_000_000_000i64..1_000_000_000,
            b in -1_000_000_000i64..1_000_000_000,
        ) {
            let ta = Timestamp::from_units(a_kind, a as i128).unwrap();
            let tb = Timestamp::from_units(b_kind, b as i128).unwrap();

            let expected = (ta.seconds(), ta.subsec_nanos()).cmp(&(tb.seconds(), tb.subsec_nanos()));
            prop_assert_eq!(ta.cmp(&tb), expected);
            prop_assert_eq!(ta.total_nanos().cmp(&tb.total_nanos()), expected);
        }
    }
}
