//! Index header
//!
//! Every file-backed index reserves the first [`HEADER_REGION`] bytes of its
//! index file for the header. Item records follow the region.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER REGION (4096 bytes)              │
//! │   magic: [u8; 4] = "TIDX"               │
//! │   version: u16                          │
//! │   body_len: u32                         │
//! │   body_crc: u32                         │
//! │   body: [u8; body_len] (bincode)        │
//! │   padding                               │
//! ├─────────────────────────────────────────┤
//! │ ITEM RECORDS (see record.rs)            │
//! └─────────────────────────────────────────┘
//! ```

use crate::index::Selector;
use crate::storage::error::StoreFault;
use crate::storage::types::{DataType, IndexId};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Magic bytes for index file identification
const INDEX_MAGIC: [u8; 4] = *b"TIDX";

/// Current index format version
pub const INDEX_VERSION: u16 = 1;

/// Bytes reserved for the header at the start of the index file
pub const HEADER_REGION: u64 = 4096;

/// Fixed prefix before the serialized body: magic + version + len + crc
const PREFIX_SIZE: usize = 14;

/// Where an index keeps its payload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Memory only, nothing persisted
    InCore,
    /// Payload bytes stored in the index file after each record
    Inline,
    /// Payload bytes stored in a companion data file
    External,
    /// Index metadata only; payload lives in an externally owned data file
    Shadow,
}

impl IndexKind {
    pub fn is_file_backed(self) -> bool {
        self != IndexKind::InCore
    }

    /// Whether appends write payload bytes
    pub fn writes_payload(self) -> bool {
        matches!(self, IndexKind::Inline | IndexKind::External)
    }

    /// Whether payload bytes live in a file separate from the index file
    pub fn has_data_file(self) -> bool {
        matches!(self, IndexKind::External | IndexKind::Shadow)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::InCore => write!(f, "incore"),
            IndexKind::Inline => write!(f, "inline"),
            IndexKind::External => write!(f, "external"),
            IndexKind::Shadow => write!(f, "shadow"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incore" => Ok(IndexKind::InCore),
            "inline" => Ok(IndexKind::Inline),
            "external" => Ok(IndexKind::External),
            "shadow" => Ok(IndexKind::Shadow),
            other => Err(format!("unknown index kind: {}", other)),
        }
    }
}

/// Entry in the referenced-index table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedIndex {
    pub id: IndexId,
    pub uri: String,
}

/// Known header options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub description: Option<String>,
    pub index_path: Option<String>,
    pub data_path: Option<String>,
    /// Slot number → referenced index, as stored in reference records
    pub referenced: BTreeMap<u32, ReferencedIndex>,
    /// Data type codes used by items, with their names
    pub data_types: BTreeMap<u16, String>,
    /// Options this version does not interpret
    pub extra: BTreeMap<String, String>,
}

impl IndexOptions {
    /// Slot already assigned to `id`
    pub fn find_reference(&self, id: IndexId) -> Option<u32> {
        self.referenced
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|(&slot, _)| slot)
    }

    /// Slot the next newly referenced index would get
    pub fn next_reference_slot(&self) -> u32 {
        self.referenced.keys().next_back().map_or(0, |s| s + 1)
    }

    /// Slot for `id`, allocating one if the index is not yet referenced
    pub fn reference_slot(&mut self, id: IndexId, uri: &str) -> u32 {
        if let Some(slot) = self.find_reference(id) {
            return slot;
        }

        let slot = self.next_reference_slot();
        self.referenced.insert(
            slot,
            ReferencedIndex {
                id,
                uri: uri.to_string(),
            },
        );
        slot
    }
}

/// Per-index metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub name: String,
    pub id: IndexId,
    pub kind: IndexKind,
    pub version: u16,
    pub created: Timestamp,
    pub terminated_at: Option<Timestamp>,
    pub terminated: bool,
    pub first_time: Option<Timestamp>,
    pub last_time: Option<Timestamp>,
    pub first_data_time: Option<Timestamp>,
    pub last_data_time: Option<Timestamp>,
    /// Number of items ever appended
    pub length: u64,
    /// Payload size if every item so far has had the same size
    pub item_size: Option<u32>,
    pub fixed_size: bool,
    /// Whether data timestamps have never gone backwards
    pub in_time_order: bool,
    /// Offset of the first item record
    pub first_offset: u64,
    /// Offset one past the last committed byte of the index file
    pub end_offset: u64,
    /// Offset one past the last payload byte of the data file
    pub data_end_offset: u64,
    pub options: IndexOptions,
}

impl IndexHeader {
    /// Fresh header for a new, empty index
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        let start = if kind.is_file_backed() { HEADER_REGION } else { 0 };
        Self {
            name: name.into(),
            id: IndexId::generate(),
            kind,
            version: INDEX_VERSION,
            created: Timestamp::now(),
            terminated_at: None,
            terminated: false,
            first_time: None,
            last_time: None,
            first_data_time: None,
            last_data_time: None,
            length: 0,
            item_size: None,
            fixed_size: true,
            in_time_order: true,
            first_offset: start,
            end_offset: start,
            data_end_offset: 0,
            options: IndexOptions::default(),
        }
    }

    /// Record an appended item's timestamps, size and type.
    ///
    /// `first_*` are set exactly once, `last_*` on every call.
    pub fn record_append(
        &mut self,
        index_time: Timestamp,
        data_time: Timestamp,
        size: u32,
        data_type: DataType,
        type_name: Option<&str>,
    ) {
        if self.length == 0 {
            self.first_time = Some(index_time);
            self.first_data_time = Some(data_time);
            self.item_size = Some(size);
        } else {
            if self.last_data_time.is_some_and(|last| data_time < last) {
                self.in_time_order = false;
            }
            if self.item_size != Some(size) {
                self.fixed_size = false;
            }
        }

        self.last_time = Some(index_time);
        self.last_data_time = Some(data_time);
        self.length += 1;

        if let Some(name) = type_name {
            self.options
                .data_types
                .entry(data_type.0)
                .or_insert_with(|| name.to_string());
        }
    }

    /// First timestamp under `selector`
    pub fn first(&self, selector: Selector) -> Option<Timestamp> {
        match selector {
            Selector::Index => self.first_time,
            Selector::Data => self.first_data_time,
        }
    }

    /// Last timestamp under `selector`
    pub fn last(&self, selector: Selector) -> Option<Timestamp> {
        match selector {
            Selector::Index => self.last_time,
            Selector::Data => self.last_data_time,
        }
    }

    /// Serialize into a full header region
    pub fn to_region(&self) -> Result<Vec<u8>, StoreFault> {
        let body = bincode::serialize(self)?;
        if PREFIX_SIZE + body.len() > HEADER_REGION as usize {
            return Err(StoreFault::Unsupported(format!(
                "Header of {} bytes exceeds the {} byte header region",
                body.len(),
                HEADER_REGION
            )));
        }

        let mut buf = vec![0u8; HEADER_REGION as usize];
        buf[0..4].copy_from_slice(&INDEX_MAGIC);
        buf[4..6].copy_from_slice(&INDEX_VERSION.to_le_bytes());
        buf[6..10].copy_from_slice(&(body.len() as u32).to_le_bytes());
        buf[10..14].copy_from_slice(&crc32fast::hash(&body).to_le_bytes());
        buf[PREFIX_SIZE..PREFIX_SIZE + body.len()].copy_from_slice(&body);

        Ok(buf)
    }

    /// Parse a header region
    pub fn from_region(buf: &[u8]) -> Result<Self, StoreFault> {
        if buf.len() < PREFIX_SIZE {
            return Err(StoreFault::Corruption("Header region truncated".into()));
        }

        if buf[0..4] != INDEX_MAGIC {
            return Err(StoreFault::Corruption(format!(
                "Invalid magic: {:?}",
                &buf[0..4]
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > INDEX_VERSION {
            return Err(StoreFault::Unsupported(format!(
                "Index format version {}",
                version
            )));
        }

        let body_len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
        let stored_crc = u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]);

        let body = buf
            .get(PREFIX_SIZE..PREFIX_SIZE + body_len)
            .ok_or_else(|| StoreFault::Corruption("Header body truncated".into()))?;

        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(StoreFault::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(bincode::deserialize(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Scale;

    fn ts(s: i64) -> Timestamp {
        Timestamp::absolute(Scale::Seconds, s).unwrap()
    }

    #[test]
    fn test_header_region_roundtrip() {
        let mut header = IndexHeader::new("events", IndexKind::External);
        header.options.description = Some("test index".into());
        header.record_append(ts(10), ts(10), 5, DataType(0), Some("octet-stream"));
        header.options.reference_slot(IndexId::generate(), "file:///tmp/other.tix");

        let region = header.to_region().unwrap();
        assert_eq!(region.len(), HEADER_REGION as usize);

        let restored = IndexHeader::from_region(&region).unwrap();
        assert_eq!(restored, header);
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let header = IndexHeader::new("events", IndexKind::Inline);
        let mut region = header.to_region().unwrap();
        region[PREFIX_SIZE + 2] ^= 0xFF;

        assert!(matches!(
            IndexHeader::from_region(&region),
            Err(StoreFault::Corruption(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let region = vec![0u8; HEADER_REGION as usize];
        assert!(matches!(
            IndexHeader::from_region(&region),
            Err(StoreFault::Corruption(_))
        ));
    }

    #[test]
    fn test_record_append_bounds() {
        let mut header = IndexHeader::new("events", IndexKind::InCore);
        header.record_append(ts(10), ts(10), 4, DataType(0), None);
        header.record_append(ts(20), ts(20), 4, DataType(0), None);
        header.record_append(ts(30), ts(15), 8, DataType(0), None);

        assert_eq!(header.length, 3);
        assert_eq!(header.first_time, Some(ts(10)));
        assert_eq!(header.first_data_time, Some(ts(10)));
        assert_eq!(header.last_time, Some(ts(30)));
        assert_eq!(header.last_data_time, Some(ts(15)));
        assert!(!header.in_time_order);
        assert!(!header.fixed_size);
    }

    #[test]
    fn test_reference_slots_are_stable() {
        let mut options = IndexOptions::default();
        let a = IndexId::generate();
        let b = IndexId::generate();

        assert_eq!(options.reference_slot(a, "mem:a"), 0);
        assert_eq!(options.reference_slot(b, "mem:b"), 1);
        assert_eq!(options.reference_slot(a, "mem:a"), 0);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut header = IndexHeader::new("events", IndexKind::External);
        header.options.description = Some("x".repeat(HEADER_REGION as usize));
        assert!(matches!(header.to_region(), Err(StoreFault::Unsupported(_))));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Shadow".parse::<IndexKind>().unwrap(), IndexKind::Shadow);
        assert!("bogus".parse::<IndexKind>().is_err());
        assert!(IndexKind::External.has_data_file());
        assert!(!IndexKind::Shadow.writes_payload());
    }
}
