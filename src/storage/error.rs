//! Index error types
//!
//! [`IndexError`] is the taxonomy surfaced to callers. Wrapping variants carry
//! a [`StoreFault`] as their `source()` so the cause chain leads back to the
//! originating I/O, corruption or encoding failure.

use crate::storage::types::IndexId;
use crate::timestamp::TimestampError;
use thiserror::Error;

/// Underlying cause of a failed store operation
#[derive(Error, Debug)]
pub enum StoreFault {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Timestamp could not be encoded or decoded
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    /// Operation is not supported by this index kind
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<bincode::Error> for StoreFault {
    fn from(err: bincode::Error) -> Self {
        StoreFault::Serialization(err.to_string())
    }
}

/// Errors that can occur in index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Index has been terminated and is permanently read-only
    #[error("Index {0} is terminated")]
    Terminated(String),

    /// Index has been closed
    #[error("Index {0} is closed")]
    Closed(String),

    /// Index must be activated before items can be appended
    #[error("Index {0} is not activated")]
    NotActivated(String),

    /// Append failed part way
    #[error("Failed to add item to index {index}")]
    AddItemFailed {
        index: String,
        #[source]
        source: StoreFault,
    },

    /// Lazy load of an item failed
    #[error("Failed to get item {position} from index {index}")]
    GetItemFailed {
        index: String,
        position: u64,
        #[source]
        source: StoreFault,
    },

    /// Position outside `[0, length)`
    #[error("Position {position} out of bounds (length {length})")]
    PositionOutOfBounds { position: u64, length: u64 },

    /// Timestamp cannot be resolved against this index
    #[error("Timestamp out of bounds: {0}")]
    TimestampOutOfBounds(String),

    /// Index was opened read-only
    #[error("Index {0} is read-only")]
    ReadOnly(String),

    /// Another writer holds the write lock
    #[error("Index {0} is write-locked by another writer")]
    WriteLocked(String),

    /// Selections are read-only windows
    #[error("Cannot add items through a selection")]
    SelectionReadOnly,

    /// Creation/open properties are missing or contradictory
    #[error("Invalid index specification: {0}")]
    SpecificationInvalid(String),

    #[error("Failed to open index {uri}")]
    OpenFailed {
        uri: String,
        #[source]
        source: StoreFault,
    },

    #[error("Failed to create index {uri}")]
    CreateFailed {
        uri: String,
        #[source]
        source: StoreFault,
    },

    #[error("Failed to commit index {index}")]
    CommitFailed {
        index: String,
        #[source]
        source: StoreFault,
    },

    #[error("Failed to close index {index}")]
    CloseFailed {
        index: String,
        #[source]
        source: StoreFault,
    },

    /// Referenced index is not open in the directory
    #[error("Unknown index: {0}")]
    UnknownIndex(IndexId),

    /// Directory handle refers to a store that has since been closed
    #[error("Stale index handle")]
    StaleHandle,

    /// Timestamp supplied at an API boundary is invalid
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

impl IndexError {
    /// True for transient preconditions a caller may fix and retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::NotActivated(_) | IndexError::WriteLocked(_))
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = IndexError::PositionOutOfBounds {
            position: 7,
            length: 3,
        };
        assert_eq!(err.to_string(), "Position 7 out of bounds (length 3)");

        let err = IndexError::Terminated("events".to_string());
        assert_eq!(err.to_string(), "Index events is terminated");
    }

    #[test]
    fn test_cause_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "data file missing");
        let err = IndexError::GetItemFailed {
            index: "events".to_string(),
            position: 4,
            source: io_err.into(),
        };

        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "IO error: data file missing");
        assert!(cause.source().is_some());
    }

    #[test]
    fn test_retryable() {
        assert!(IndexError::NotActivated("x".into()).is_retryable());
        assert!(!IndexError::Terminated("x".into()).is_retryable());
    }
}
