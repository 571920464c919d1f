//! Index Cache - append-only item slots for one index
//!
//! Slot `n` holds the item at absolute position `n`. A slot can be:
//! - **resident**: payload bytes in memory
//! - **hollow**: payload replaced by a [`DataReference`] into storage
//! - **missing**: never loaded, or dropped by [`RemoveAfterUse`](super::RemoveAfterUse)
//!
//! The owning store fills hollow and missing slots on demand through
//! [`IndexCache::retrieve`] and [`IndexCache::fill`].
//!
//! # Locate
//! [`locate`] maps a timestamp to a position with a binary search that
//! compares each midpoint against its successor, resolving the boundary case
//! by [`Lifetime`]. Fetched timestamps are memoized for the duration of one
//! call since a fetch may hit the disk.

use crate::index::policy::CachePolicy;
use crate::index::{Lifetime, Location, Selector};
use crate::storage::error::{IndexError, IndexResult, StoreFault};
use crate::storage::header::IndexHeader;
use crate::storage::types::{DataHolder, DataReference, IndexItem, Payload};
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

/// Counters describing cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Items handed out through `get_item`
    pub accesses: u64,
    /// Accesses that needed a load from storage first
    pub misses: u64,
    /// Item records read from storage into empty slots
    pub lazy_loads: u64,
    /// Hollow payloads read back from storage
    pub reloads: u64,
    /// Payloads hollowed
    pub hollowed: u64,
    /// Items dropped from their slot
    pub removed: u64,
    /// Payload bytes currently in memory
    pub resident_bytes: u64,
    /// Items currently in a slot
    pub resident_items: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.accesses.saturating_sub(self.misses)
    }

    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        if self.accesses == 0 {
            return 0.0;
        }
        self.hits() as f64 / self.accesses as f64
    }
}

/// What a slot currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Missing,
    Hollow(DataReference),
    Resident,
    /// Reference to an item of another index; nothing to load
    Reference,
}

/// Item storage shared between a cache and its policy.
///
/// Policies receive `&mut ItemSlots` in their callbacks so they can hollow or
/// remove items without reaching back into the cache.
#[derive(Debug, Default)]
pub struct ItemSlots {
    items: Vec<Option<IndexItem>>,
    resident_bytes: usize,
    stats: CacheStats,
}

impl ItemSlots {
    /// Number of positions, loaded or not
    pub fn len(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `position`, if its slot is filled
    pub fn get(&self, position: u64) -> Option<&IndexItem> {
        self.items.get(position as usize).and_then(Option::as_ref)
    }

    pub fn state(&self, position: u64) -> SlotState {
        match self.get(position).map(IndexItem::payload) {
            None => SlotState::Missing,
            Some(Payload::FileRef(reference)) => SlotState::Hollow(*reference),
            Some(Payload::Resident(_)) => SlotState::Resident,
            Some(Payload::IndexRef(_)) => SlotState::Reference,
        }
    }

    /// Payload bytes currently held in memory
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Replace a resident payload by the reference it was loaded from.
    ///
    /// Returns whether any bytes were released. Hollow, missing and
    /// reference slots are left alone, as are payloads with no storage
    /// origin (nothing to reload them from).
    pub fn hollow(&mut self, position: u64) -> bool {
        let Some(item) = self.items.get_mut(position as usize).and_then(Option::as_mut) else {
            return false;
        };

        let origin = match item.payload() {
            Payload::Resident(holder) => match holder.origin() {
                Some(origin) => origin,
                None => return false,
            },
            _ => return false,
        };

        let released = item.payload().resident_bytes();
        item.set_payload(Payload::FileRef(origin));
        self.resident_bytes -= released;
        self.stats.hollowed += 1;

        trace!(position, released, "Hollowed item");
        true
    }

    /// Drop the item at `position` from its slot entirely
    pub fn remove(&mut self, position: u64) -> bool {
        let Some(slot) = self.items.get_mut(position as usize) else {
            return false;
        };

        match slot.take() {
            Some(item) => {
                self.resident_bytes -= item.payload().resident_bytes();
                self.stats.removed += 1;
                trace!(position, "Removed item");
                true
            }
            None => false,
        }
    }

    fn push(&mut self, item: IndexItem) {
        self.resident_bytes += item.payload().resident_bytes();
        self.items.push(Some(item));
    }

    fn replace(&mut self, position: u64, item: IndexItem) {
        let slot = &mut self.items[position as usize];
        if let Some(old) = slot.as_ref() {
            self.resident_bytes -= old.payload().resident_bytes();
        }
        self.resident_bytes += item.payload().resident_bytes();
        *slot = Some(item);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            resident_bytes: self.resident_bytes as u64,
            resident_items: self.items.iter().filter(|slot| slot.is_some()).count() as u64,
            ..self.stats
        }
    }
}

/// First and last timestamps under both selectors
#[derive(Debug, Clone, Copy, Default)]
struct TimeBounds {
    first_index: Option<Timestamp>,
    first_data: Option<Timestamp>,
    last_index: Option<Timestamp>,
    last_data: Option<Timestamp>,
}

impl TimeBounds {
    fn get(&self, selector: Selector) -> Option<(Timestamp, Timestamp)> {
        let (first, last) = match selector {
            Selector::Index => (self.first_index, self.last_index),
            Selector::Data => (self.first_data, self.last_data),
        };
        first.zip(last)
    }
}

/// Append-only in-memory sequence of items for one index
#[derive(Debug)]
pub struct IndexCache {
    name: String,
    slots: ItemSlots,
    policy: Box<dyn CachePolicy>,
    bounds: TimeBounds,
}

impl IndexCache {
    pub fn new(name: impl Into<String>, policy: Box<dyn CachePolicy>) -> Self {
        Self {
            name: name.into(),
            slots: ItemSlots::default(),
            policy,
            bounds: TimeBounds::default(),
        }
    }

    /// Size the cache for an opened index: `header.length` empty slots and
    /// the header's time bounds.
    pub(crate) fn restore(&mut self, header: &IndexHeader) {
        self.slots.items.resize_with(header.length as usize, || None);
        self.bounds = TimeBounds {
            first_index: header.first_time,
            first_data: header.first_data_time,
            last_index: header.last_time,
            last_data: header.last_data_time,
        };
    }

    pub fn len(&self) -> u64 {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Append an item at `position = len()`; returns the new length
    pub fn add_item(&mut self, mut item: IndexItem) -> u64 {
        self.policy.before_add(&mut self.slots);

        let position = self.slots.len();
        item.set_position(position);
        item.touch();

        if position == 0 {
            self.bounds.first_index = Some(item.index_timestamp());
            self.bounds.first_data = Some(item.data_timestamp());
        }
        self.bounds.last_index = Some(item.index_timestamp());
        self.bounds.last_data = Some(item.data_timestamp());

        self.slots.push(item);
        self.policy.after_add(&mut self.slots, position);

        position + 1
    }

    /// Hand out the item at `position`.
    ///
    /// Returns `Ok(None)` for a missing slot; the caller is expected to
    /// [`retrieve`](Self::retrieve) it and ask again.
    pub fn get_item(&mut self, position: u64) -> IndexResult<Option<IndexItem>> {
        self.check_bounds(position)?;
        self.policy.before_get(&mut self.slots, position);

        let item = match self.slots.items[position as usize].as_mut() {
            Some(item) => {
                item.touch();
                item.clone()
            }
            None => return Ok(None),
        };
        self.slots.stats.accesses += 1;

        self.policy.after_get(&mut self.slots, position);
        Ok(Some(item))
    }

    /// Item at `position` without notifying the policy
    pub fn peek(&self, position: u64) -> Option<&IndexItem> {
        self.slots.get(position)
    }

    pub fn state(&self, position: u64) -> SlotState {
        self.slots.state(position)
    }

    /// Insert an item read from storage at its prior position
    pub fn retrieve(&mut self, position: u64, mut item: IndexItem) -> IndexResult<()> {
        self.check_bounds(position)?;
        item.set_position(position);
        self.slots.replace(position, item);
        self.slots.stats.lazy_loads += 1;
        Ok(())
    }

    /// Reload the payload of a hollow item
    pub fn fill(&mut self, position: u64, holder: DataHolder) -> IndexResult<()> {
        self.check_bounds(position)?;
        let Some(item) = self.slots.items[position as usize].as_mut() else {
            return Err(IndexError::GetItemFailed {
                index: self.name.clone(),
                position,
                source: StoreFault::Corruption("no item to fill".into()),
            });
        };

        let released = item.payload().resident_bytes();
        let added = holder.len();
        item.set_payload(Payload::Resident(holder));
        self.slots.resident_bytes = self.slots.resident_bytes - released + added;
        self.slots.stats.reloads += 1;
        Ok(())
    }

    /// Let the policy see an item made resident while preloading
    pub(crate) fn preloaded(&mut self, position: u64) {
        self.policy.after_get(&mut self.slots, position);
    }

    /// Count an access that had to load from storage first
    pub(crate) fn record_miss(&mut self) {
        self.slots.stats.misses += 1;
    }

    pub(crate) fn reset_stats(&mut self) {
        self.slots.stats = CacheStats::default();
    }

    pub fn hollow(&mut self, position: u64) -> IndexResult<bool> {
        self.check_bounds(position)?;
        Ok(self.slots.hollow(position))
    }

    /// Hollow every resident item; returns how many were hollowed
    pub fn hollow_all(&mut self) -> u64 {
        (0..self.slots.len())
            .filter(|&position| self.slots.hollow(position))
            .count() as u64
    }

    /// First and last timestamps under `selector`
    pub fn bounds(&self, selector: Selector) -> Option<(Timestamp, Timestamp)> {
        self.bounds.get(selector)
    }

    /// True iff `first <= timestamp <= last` under `selector`
    pub fn contains(&self, timestamp: Timestamp, selector: Selector) -> bool {
        self.bounds(selector)
            .is_some_and(|(first, last)| first <= timestamp && timestamp <= last)
    }

    /// Locate among loaded items only.
    ///
    /// Fails with `GetItemFailed` if the search touches an empty slot; stores
    /// with lazily loaded items locate through their own fetch path.
    pub fn locate(
        &self,
        timestamp: Timestamp,
        selector: Selector,
        lifetime: Lifetime,
    ) -> IndexResult<Location> {
        locate(
            self.len(),
            self.bounds(selector),
            timestamp,
            lifetime,
            |position| {
                self.slots
                    .get(position)
                    .map(|item| item.timestamp(selector))
                    .ok_or_else(|| IndexError::GetItemFailed {
                        index: self.name.clone(),
                        position,
                        source: StoreFault::Unsupported("item is not loaded".into()),
                    })
            },
        )
    }

    pub fn stats(&self) -> CacheStats {
        self.slots.snapshot()
    }

    pub fn resident_bytes(&self) -> usize {
        self.slots.resident_bytes()
    }

    fn check_bounds(&self, position: u64) -> IndexResult<()> {
        if position >= self.len() {
            return Err(IndexError::PositionOutOfBounds {
                position,
                length: self.len(),
            });
        }
        Ok(())
    }
}

/// Resolve `query` to a position among `length` items ordered by timestamp.
///
/// `bounds` are the first and last timestamps; `fetch` returns the timestamp
/// of the item at a position. Queries outside the bounds, or any query
/// against an empty index, resolve to a sentinel rather than an error.
pub fn locate<F>(
    length: u64,
    bounds: Option<(Timestamp, Timestamp)>,
    query: Timestamp,
    lifetime: Lifetime,
    mut fetch: F,
) -> IndexResult<Location>
where
    F: FnMut(u64) -> IndexResult<Timestamp>,
{
    let Some((first, last)) = bounds.filter(|_| length > 0) else {
        return Ok(Location::too_low());
    };

    if query < first {
        return Ok(Location::too_low());
    }
    if query > last {
        return Ok(Location::too_high());
    }
    if query == last {
        return Ok(Location::at(length - 1, last));
    }

    let mut seen: HashMap<u64, Timestamp> = HashMap::new();
    let mut time_at = |position: u64| -> IndexResult<Timestamp> {
        if let Some(ts) = seen.get(&position) {
            return Ok(*ts);
        }
        let ts = fetch(position)?;
        seen.insert(position, ts);
        Ok(ts)
    };

    let mut lo = 0u64;
    let mut hi = length - 1;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let t_mid = time_at(mid)?;
        let t_next = time_at(mid + 1)?;

        if t_mid <= query && query < t_next {
            if query == t_mid || lifetime == Lifetime::Continuous {
                return Ok(Location::at(mid, t_mid));
            }
            return Ok(Location::at(mid + 1, t_next));
        } else if query == t_next {
            return Ok(Location::at(mid + 1, t_next));
        } else if query < t_mid {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    let ts = time_at(lo)?;
    Ok(Location::at(lo, ts))
}
