//! Index structures
//!
//! - **IndexCache**: append-only item slots with timestamp → position search
//! - **CachePolicy**: eviction strategies that hollow or drop resident payloads
//! - **IndexView**: navigational cursors and sub-range selections
//! - **IndexDirectory**: process-wide table of open stores
//!
//! # Architecture
//!
//! ```text
//! IndexView ──┐
//! IndexView ──┼──→ IndexDirectory ──→ IndexStore ──→ IndexCache + CachePolicy
//! IndexView ──┘     (refcounts)       (files)         (slots)
//! ```

mod cache;
mod directory;
mod policy;
mod view;

pub use cache::{locate, CacheStats, IndexCache, ItemSlots, SlotState};
pub use directory::{Gate, IndexDirectory, OpenTicket, StoreHandle};
pub use policy::{
    CachePolicy, HollowAfterTimeout, HollowAfterUse, HollowAtDataVolume, KeepEverything,
    PolicyConfig, RemoveAfterUse,
};
pub use view::{Interval, IndexView, Overlap, Region};

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which timestamp of an item a comparison uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// When the item was recorded
    Index,
    /// When the data logically occurred
    Data,
}

/// How long an item's timestamp is considered valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    /// Valid from its own timestamp until the next item's
    Continuous,
    /// A single instant
    Discrete,
}

/// A cursor position, or the sentinel for falling off either end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {
    TooLow,
    At(u64),
    TooHigh,
}

impl Position {
    /// The position, if it is not a sentinel
    pub fn get(self) -> Option<u64> {
        match self {
            Position::At(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_sentinel(self) -> bool {
        !matches!(self, Position::At(_))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::TooLow => write!(f, "TOO_LOW"),
            Position::At(p) => write!(f, "{}", p),
            Position::TooHigh => write!(f, "TOO_HIGH"),
        }
    }
}

/// Result of resolving a timestamp against an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Timestamp of the item at `position`, absent for sentinels
    pub timestamp: Option<Timestamp>,
    pub position: Position,
}

impl Location {
    pub fn too_low() -> Self {
        Self {
            timestamp: None,
            position: Position::TooLow,
        }
    }

    pub fn too_high() -> Self {
        Self {
            timestamp: None,
            position: Position::TooHigh,
        }
    }

    pub fn at(position: u64, timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            position: Position::At(position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering() {
        assert!(Position::TooLow < Position::At(0));
        assert!(Position::At(u64::MAX) < Position::TooHigh);
        assert_eq!(Position::At(4).get(), Some(4));
        assert!(Position::TooHigh.is_sentinel());
        assert_eq!(Position::TooLow.to_string(), "TOO_LOW");
    }
}
