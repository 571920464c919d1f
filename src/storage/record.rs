//! Item record format
//!
//! Each item is stored as a fixed 48-byte record. Inline indexes write the
//! payload bytes directly after their record; external and shadow indexes
//! point into a data file.
//!
//! Layout (little-endian):
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  0  index_time: u64 (tagged timestamp)   │
//! │  8  data_time: u64 (tagged timestamp)    │
//! │ 16  payload_kind: u8                     │
//! │ 17  reserved: u8                         │
//! │ 18  data_type: u16                       │
//! │ 20  size_or_slot: u32                    │
//! │ 24  offset_or_position: u64              │
//! │ 32  item_id: u64                         │
//! │ 40  annotation: u32                      │
//! │ 44  crc: u32 (CRC32 of bytes 0..44)      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! For data payloads `size_or_slot`/`offset_or_position` hold the payload
//! size and offset. For index references they hold the referenced-index
//! table slot and the referenced item position.

use crate::storage::error::StoreFault;
use crate::storage::types::{DataReference, DataType, IndexId, IndexItem, IndexReference, Payload};
use crate::timestamp::Timestamp;

/// Size of one item record in bytes
pub const RECORD_SIZE: usize = 48;

const CRC_OFFSET: usize = 44;

/// What the payload fields of a record describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    /// Bytes follow the record in the index file
    Inline = 0,
    /// Bytes live in the data file
    DataFile = 1,
    /// Reference to an item in another index
    IndexRef = 2,
}

impl TryFrom<u8> for PayloadKind {
    type Error = StoreFault;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadKind::Inline),
            1 => Ok(PayloadKind::DataFile),
            2 => Ok(PayloadKind::IndexRef),
            _ => Err(StoreFault::Corruption(format!(
                "Unknown payload kind: {}",
                value
            ))),
        }
    }
}

/// Decoded item record
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub index_time: Timestamp,
    pub data_time: Timestamp,
    pub payload_kind: PayloadKind,
    pub data_type: DataType,
    pub size_or_slot: u32,
    pub offset_or_position: u64,
    pub item_id: u64,
    pub annotation: u32,
}

impl ItemRecord {
    /// Record describing `item` with its payload stored at `offset`/`size`
    /// (or, for index references, at `slot`/`position`).
    pub fn for_item(
        item: &IndexItem,
        payload_kind: PayloadKind,
        size_or_slot: u32,
        offset_or_position: u64,
    ) -> Self {
        Self {
            index_time: item.index_timestamp(),
            data_time: item.data_timestamp(),
            payload_kind,
            data_type: item.kind(),
            size_or_slot,
            offset_or_position,
            item_id: item.id(),
            annotation: item.annotation_word(),
        }
    }

    /// Serialize record to bytes
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];

        buf[0..8].copy_from_slice(&self.index_time.to_bits().to_le_bytes());
        buf[8..16].copy_from_slice(&self.data_time.to_bits().to_le_bytes());
        buf[16] = self.payload_kind as u8;
        // byte 17 reserved
        buf[18..20].copy_from_slice(&self.data_type.0.to_le_bytes());
        buf[20..24].copy_from_slice(&self.size_or_slot.to_le_bytes());
        buf[24..32].copy_from_slice(&self.offset_or_position.to_le_bytes());
        buf[32..40].copy_from_slice(&self.item_id.to_le_bytes());
        buf[40..44].copy_from_slice(&self.annotation.to_le_bytes());

        let crc = crc32fast::hash(&buf[0..CRC_OFFSET]);
        buf[CRC_OFFSET..RECORD_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Parse record from bytes
    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Result<Self, StoreFault> {
        let stored_crc = u32::from_le_bytes(read_array(buf, CRC_OFFSET));
        let computed_crc = crc32fast::hash(&buf[0..CRC_OFFSET]);

        if stored_crc != computed_crc {
            return Err(StoreFault::Corruption(format!(
                "Record checksum mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(Self {
            index_time: Timestamp::from_bits(u64::from_le_bytes(read_array(buf, 0)))?,
            data_time: Timestamp::from_bits(u64::from_le_bytes(read_array(buf, 8)))?,
            payload_kind: PayloadKind::try_from(buf[16])?,
            data_type: DataType(u16::from_le_bytes(read_array(buf, 18))),
            size_or_slot: u32::from_le_bytes(read_array(buf, 20)),
            offset_or_position: u64::from_le_bytes(read_array(buf, 24)),
            item_id: u64::from_le_bytes(read_array(buf, 32)),
            annotation: u32::from_le_bytes(read_array(buf, 40)),
        })
    }

    /// Bytes of payload stored inline after this record
    pub fn inline_len(&self) -> u64 {
        match self.payload_kind {
            PayloadKind::Inline => self.size_or_slot as u64,
            _ => 0,
        }
    }

    /// Rebuild a hollow item; the payload is left as a reference and must be
    /// materialized separately. `resolve_slot` maps a referenced-index slot
    /// to the referenced index ID.
    pub fn into_item(
        self,
        resolve_slot: impl FnOnce(u32) -> Result<IndexId, StoreFault>,
    ) -> Result<IndexItem, StoreFault> {
        let payload = match self.payload_kind {
            PayloadKind::Inline | PayloadKind::DataFile => Payload::FileRef(DataReference::new(
                self.offset_or_position,
                self.size_or_slot,
            )),
            PayloadKind::IndexRef => Payload::IndexRef(IndexReference {
                index_id: resolve_slot(self.size_or_slot)?,
                position: self.offset_or_position,
            }),
        };

        Ok(IndexItem::new(self.index_time, payload)
            .data_time(self.data_time)
            .item_id(self.item_id)
            .data_type(self.data_type)
            .annotation(self.annotation))
    }
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Scale;

    fn sample() -> ItemRecord {
        ItemRecord {
            index_time: Timestamp::absolute(Scale::Millis, 1_700_000_000_123).unwrap(),
            data_time: Timestamp::absolute(Scale::Seconds, 1_700_000_000).unwrap(),
            payload_kind: PayloadKind::DataFile,
            data_type: DataType(3),
            size_or_slot: 50,
            offset_or_position: 8192,
            item_id: 77,
            annotation: 0xABCD,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample();
        let restored = ItemRecord::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(restored, record);
        assert_eq!(restored.index_time.kind(), record.index_time.kind());
    }

    #[test]
    fn test_record_corruption_detected() {
        let mut bytes = sample().to_bytes();
        bytes[25] ^= 0x01;
        assert!(matches!(
            ItemRecord::from_bytes(&bytes),
            Err(StoreFault::Corruption(_))
        ));
    }

    #[test]
    fn test_into_item_hollow() {
        let item = sample().into_item(|_| unreachable!()).unwrap();
        assert!(item.is_hollow());
        assert_eq!(item.payload().size(), 50);
        assert_eq!(item.id(), 77);
        assert_eq!(item.annotation_word(), 0xABCD);
    }

    #[test]
    fn test_into_item_reference() {
        let target = IndexId::generate();
        let record = ItemRecord {
            payload_kind: PayloadKind::IndexRef,
            size_or_slot: 2,
            offset_or_position: 9,
            ..sample()
        };

        let item = record
            .clone()
            .into_item(|slot| {
                assert_eq!(slot, 2);
                Ok(target)
            })
            .unwrap();

        match item.payload() {
            Payload::IndexRef(r) => {
                assert_eq!(r.index_id, target);
                assert_eq!(r.position, 9);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(record.inline_len(), 0);
    }
}
