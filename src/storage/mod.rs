//! Index storage
//!
//! This module provides the persistent side of an index:
//!
//! - **types**: Items, payloads and identifiers
//! - **header**: Index header and its fixed on-disk region
//! - **record**: Fixed-size item records
//! - **spec**: Creation/open parameters built from property maps
//! - **lock**: Advisory write lock on index files
//! - **engine**: The store itself, one engine for every index kind
//! - **error**: Error types
//!
//! # File layout
//!
//! ```text
//! <name>.tix:   [header region: 4096 bytes][record 0][record 1]...
//!                 inline kind: each record is followed by its payload
//! <name>.tdat:  [payload 0][payload 1]...   (external kind only)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use timeindex::storage::{IndexItem, IndexKind, IndexSpec, IndexStore, StoreContext};
//! use timeindex::timestamp::Timestamp;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = IndexSpec::file(IndexKind::External, "events", "./indexes");
//!     let store = IndexStore::open_or_create(spec, StoreContext::default())?;
//!     store.activate()?;
//!
//!     store.add_item(IndexItem::with_bytes(Timestamp::now(), b"hello".to_vec()))?;
//!     store.commit()?;
//!     store.close()?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod header;
pub mod lock;
pub mod record;
pub mod spec;
pub mod types;

// Re-export commonly used types
pub use engine::{CommitOutcome, IndexStore, StoreContext};
pub use error::{IndexError, IndexResult, StoreFault};
pub use header::{IndexHeader, IndexKind, IndexOptions, ReferencedIndex, HEADER_REGION};
pub use lock::WriteLock;
pub use record::{ItemRecord, PayloadKind, RECORD_SIZE};
pub use spec::{IndexSpec, LoadStyle, SpecDefaults, DATA_EXTENSION, INDEX_EXTENSION};
pub use types::{
    DataHolder, DataReference, DataType, IndexId, IndexItem, IndexReference, Payload,
};
