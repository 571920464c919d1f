//! Timestamp codec error types

use crate::timestamp::TimestampKind;
use thiserror::Error;

/// Errors raised while constructing, converting or decoding timestamps
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Magnitude does not fit the bit width reserved for this kind
    #[error("{units} units out of range for {kind} (max magnitude {max})")]
    OutOfRange {
        kind: TimestampKind,
        units: i128,
        max: u64,
    },

    /// Sub-second part is not below one second
    #[error("Invalid sub-second value: {0} ns")]
    InvalidSubsecond(u32),

    /// Value carries precision the target resolution cannot hold
    #[error("{nanos} ns cannot be represented exactly by {kind}")]
    PrecisionLoss { kind: TimestampKind, nanos: u32 },

    /// Arithmetic between two kinds that has no meaning (e.g. absolute + absolute)
    #[error("Cannot {op} {rhs} and {lhs}")]
    IncompatibleDomains {
        op: &'static str,
        lhs: TimestampKind,
        rhs: TimestampKind,
    },

    /// Tag bits do not name any known kind
    #[error("Invalid timestamp encoding: {0:#018x}")]
    InvalidEncoding(u64),
}
