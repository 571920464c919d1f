//! Core data types for index items
//!
//! - `IndexItem`: one timestamped record
//! - `Payload`: resident bytes, a reference into file-backed storage, or a
//!   reference to an item in another index
//! - `IndexId` and `DataType`: identifiers

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier of an index, assigned once at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(Uuid);

impl IndexId {
    /// Allocate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric data type code, resolved to a name through a
/// [`TypeRegistry`](crate::registry::TypeRegistry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataType(pub u16);

impl DataType {
    /// Opaque bytes
    pub const OCTET_STREAM: DataType = DataType(0);
    /// Item whose payload is a reference to another index
    pub const INDEX_REFERENCE: DataType = DataType(1);
}

impl Default for DataType {
    fn default() -> Self {
        DataType::OCTET_STREAM
    }
}

/// Location of payload bytes in file-backed storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataReference {
    /// Byte offset of the payload
    pub offset: u64,
    /// Payload size in bytes
    pub size: u32,
}

impl DataReference {
    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }
}

/// Pointer to an item held by a different index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexReference {
    /// ID of the referenced index
    pub index_id: IndexId,
    /// Absolute position of the item in that index
    pub position: u64,
}

/// Resident payload bytes
///
/// `origin` records where the bytes live in storage so the holder can be
/// hollowed back into a [`DataReference`] without losing that metadata.
#[derive(Debug, Clone)]
pub struct DataHolder {
    bytes: Arc<[u8]>,
    read_at: Timestamp,
    origin: Option<DataReference>,
}

impl DataHolder {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            read_at: Timestamp::now(),
            origin: None,
        }
    }

    /// Holder for bytes read back from storage at `origin`
    pub fn loaded(bytes: impl Into<Arc<[u8]>>, origin: DataReference) -> Self {
        Self {
            origin: Some(origin),
            ..Self::new(bytes)
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// When the bytes were created or read from storage
    pub fn read_at(&self) -> Timestamp {
        self.read_at
    }

    pub fn origin(&self) -> Option<DataReference> {
        self.origin
    }

    pub(crate) fn with_origin(mut self, origin: DataReference) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Payload of an index item
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes held in memory
    Resident(DataHolder),
    /// Hollow: bytes live in storage at this reference
    FileRef(DataReference),
    /// Item in another index
    IndexRef(IndexReference),
}

impl Payload {
    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Payload::Resident(DataHolder::new(data))
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Payload::Resident(_))
    }

    pub fn is_hollow(&self) -> bool {
        matches!(self, Payload::FileRef(_))
    }

    /// Resident bytes, if any
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Payload::Resident(holder) => Some(holder.bytes()),
            _ => None,
        }
    }

    /// Payload size in bytes; references to other indexes have no size
    pub fn size(&self) -> u32 {
        match self {
            Payload::Resident(holder) => holder.len() as u32,
            Payload::FileRef(reference) => reference.size,
            Payload::IndexRef(_) => 0,
        }
    }

    /// Number of bytes this payload keeps in memory
    pub fn resident_bytes(&self) -> usize {
        match self {
            Payload::Resident(holder) => holder.len(),
            _ => 0,
        }
    }
}

/// One record of an index
#[derive(Debug, Clone)]
pub struct IndexItem {
    index_time: Timestamp,
    data_time: Timestamp,
    payload: Payload,
    item_id: u64,
    data_type: DataType,
    annotation: u32,
    position: Option<u64>,
    last_access: Option<Instant>,
}

impl IndexItem {
    /// Create an item recorded at `index_time`; the data timestamp defaults
    /// to the index timestamp.
    pub fn new(index_time: Timestamp, payload: Payload) -> Self {
        Self {
            index_time,
            data_time: index_time,
            payload,
            item_id: 0,
            data_type: DataType::default(),
            annotation: 0,
            position: None,
            last_access: None,
        }
    }

    /// Create an item with resident bytes
    pub fn with_bytes(index_time: Timestamp, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(index_time, Payload::bytes(data))
    }

    /// Builder method: set the data timestamp
    pub fn data_time(mut self, data_time: Timestamp) -> Self {
        self.data_time = data_time;
        self
    }

    /// Builder method: set the item ID
    pub fn item_id(mut self, item_id: u64) -> Self {
        self.item_id = item_id;
        self
    }

    /// Builder method: set the data type
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Builder method: set the annotation word
    pub fn annotation(mut self, annotation: u32) -> Self {
        self.annotation = annotation;
        self
    }

    pub fn index_timestamp(&self) -> Timestamp {
        self.index_time
    }

    pub fn data_timestamp(&self) -> Timestamp {
        self.data_time
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Resident payload bytes, if any
    pub fn data(&self) -> Option<&[u8]> {
        self.payload.data()
    }

    pub fn id(&self) -> u64 {
        self.item_id
    }

    pub fn kind(&self) -> DataType {
        self.data_type
    }

    pub fn annotation_word(&self) -> u32 {
        self.annotation
    }

    /// Absolute position, assigned when the item is appended
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// When the item was last handed out by its cache
    pub fn last_access(&self) -> Option<Instant> {
        self.last_access
    }

    /// Timestamp used for comparisons under `selector`
    pub fn timestamp(&self, selector: crate::index::Selector) -> Timestamp {
        match selector {
            crate::index::Selector::Index => self.index_time,
            crate::index::Selector::Data => self.data_time,
        }
    }

    pub fn is_hollow(&self) -> bool {
        self.payload.is_hollow()
    }

    pub(crate) fn set_position(&mut self, position: u64) {
        self.position = Some(position);
    }

    pub(crate) fn touch(&mut self) {
        self.last_access = Some(Instant::now());
    }

    pub(crate) fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Selector;
    use crate::timestamp::Scale;

    fn ts(s: i64) -> Timestamp {
        Timestamp::absolute(Scale::Seconds, s).unwrap()
    }

    #[test]
    fn test_item_builder() {
        let item = IndexItem::with_bytes(ts(10), b"hello".to_vec())
            .data_time(ts(8))
            .item_id(42)
            .data_type(DataType(7));

        assert_eq!(item.index_timestamp(), ts(10));
        assert_eq!(item.data_timestamp(), ts(8));
        assert_eq!(item.timestamp(Selector::Data), ts(8));
        assert_eq!(item.timestamp(Selector::Index), ts(10));
        assert_eq!(item.id(), 42);
        assert_eq!(item.kind(), DataType(7));
        assert_eq!(item.data(), Some(&b"hello"[..]));
        assert_eq!(item.position(), None);
    }

    #[test]
    fn test_data_time_defaults_to_index_time() {
        let item = IndexItem::with_bytes(ts(3), vec![1, 2, 3]);
        assert_eq!(item.data_timestamp(), item.index_timestamp());
    }

    #[test]
    fn test_payload_sizes() {
        let resident = Payload::bytes(vec![0u8; 50]);
        assert_eq!(resident.size(), 50);
        assert_eq!(resident.resident_bytes(), 50);

        let hollow = Payload::FileRef(DataReference::new(4096, 50));
        assert_eq!(hollow.size(), 50);
        assert_eq!(hollow.resident_bytes(), 0);
        assert!(hollow.is_hollow());
        assert!(hollow.data().is_none());
    }

    #[test]
    fn test_holder_keeps_origin() {
        let holder = DataHolder::loaded(vec![9u8; 4], DataReference::new(100, 4));
        assert_eq!(holder.origin(), Some(DataReference::new(100, 4)));
        assert_eq!(holder.len(), 4);
    }
}
