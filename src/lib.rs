//! # TimeIndex
//!
//! Time-indexed, append-only storage of opaque payloads. Every item carries
//! an index timestamp (when it was recorded) and a data timestamp (when the
//! data occurred); indexes answer "which item was current at time T" with a
//! binary search over either.
//!
//! ## Features
//!
//! - **Compact timestamps**: four resolutions, absolute or elapsed, one tagged `u64`
//! - **Four index kinds**: in-core, inline, external data file, shadow of foreign data
//! - **Lazy payloads**: items load hollow and fetch their bytes on first access
//! - **Cache policies**: hollow or drop payloads by use, age or resident volume
//! - **Views**: cursors, marks and composable time selections
//! - **Shared directory**: one store per index per process, reference counted
//!
//! ## Modules
//!
//! - [`timestamp`]: Timestamp type and codec
//! - [`storage`]: Index store, headers and on-disk records
//! - [`index`]: Item cache, cache policies, views and the index directory
//! - [`events`], [`registry`], [`roller`]: collaborators used by stores and views
//! - [`config`]: Configuration files and environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use timeindex::index::{IndexDirectory, Interval, Lifetime, Overlap, Selector};
//! use timeindex::storage::{IndexItem, IndexKind, IndexSpec, StoreContext};
//! use timeindex::timestamp::{Scale, Timestamp};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(IndexDirectory::new(StoreContext::default()));
//!     let mut view = directory.open_or_create(
//!         IndexSpec::file(IndexKind::Inline, "readings", "./indexes"),
//!     )?;
//!     view.store().activate()?;
//!
//!     for s in [10, 20, 30] {
//!         let at = Timestamp::absolute(Scale::Seconds, s)?;
//!         view.add_item(IndexItem::with_bytes(at, vec![s as u8]))?;
//!     }
//!
//!     let interval = Interval::new(
//!         Timestamp::absolute(Scale::Seconds, 15)?,
//!         Timestamp::absolute(Scale::Seconds, 30)?,
//!     )?;
//!     let selection = view.select(interval, Selector::Data, Overlap::Inside, Lifetime::Continuous)?;
//!     println!("{} items selected", selection.len());
//!
//!     directory.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod events;
pub mod index;
pub mod registry;
pub mod roller;
pub mod storage;
pub mod timestamp;

// Re-export top-level types for convenience
pub use storage::{
    IndexError, IndexItem, IndexKind, IndexResult, IndexSpec, IndexStore, LoadStyle, Payload,
    StoreContext,
};

pub use index::{
    IndexDirectory, IndexView, Interval, Lifetime, Location, Overlap, PolicyConfig, Position,
    Selector,
};

pub use timestamp::{Scale, Timestamp, TimestampError, TimestampKind};
