//! Cache policies
//!
//! A [`CachePolicy`] is told about every append and read and decides which
//! items to hollow (payload swapped for a storage reference) or remove
//! (slot emptied, item regenerated from storage on demand).
//!
//! Policies only ever act on [`ItemSlots`]; they never see the cache that
//! owns them, so they cannot re-enter it. The position passed to each hook
//! is the item being added or returned and is never evicted by that hook.

use crate::index::cache::ItemSlots;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Eviction strategy invoked around cache reads and writes
pub trait CachePolicy: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether this policy empties slots (the store must be able to
    /// regenerate items by position)
    fn removes_items(&self) -> bool {
        false
    }

    fn before_add(&mut self, _slots: &mut ItemSlots) {}

    fn after_add(&mut self, _slots: &mut ItemSlots, _position: u64) {}

    fn before_get(&mut self, _slots: &mut ItemSlots, _position: u64) {}

    fn after_get(&mut self, _slots: &mut ItemSlots, _position: u64) {}
}

/// Positions ordered by most recent touch, oldest first
#[derive(Debug, Default)]
struct TouchQueue {
    clock: u64,
    by_tick: BTreeMap<u64, u64>,
    ticks: HashMap<u64, u64>,
}

impl TouchQueue {
    fn touch(&mut self, position: u64) {
        self.clock += 1;
        if let Some(old) = self.ticks.insert(position, self.clock) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.clock, position);
    }

    fn oldest(&self) -> Option<u64> {
        self.by_tick.values().next().copied()
    }

    fn pop_oldest(&mut self) -> Option<u64> {
        let (_, position) = self.by_tick.pop_first()?;
        self.ticks.remove(&position);
        Some(position)
    }

    fn len(&self) -> usize {
        self.by_tick.len()
    }

    /// Pop the oldest position unless it is `keep`
    fn pop_unless(&mut self, keep: u64) -> Option<u64> {
        match self.oldest() {
            Some(position) if position != keep => self.pop_oldest(),
            _ => None,
        }
    }
}

/// Never evicts anything
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepEverything;

impl CachePolicy for KeepEverything {
    fn name(&self) -> &'static str {
        "keep"
    }
}

/// Hollows the least recently used item once more than `window` items have
/// been touched
#[derive(Debug)]
pub struct HollowAfterUse {
    window: usize,
    queue: TouchQueue,
}

impl HollowAfterUse {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            queue: TouchQueue::default(),
        }
    }

    fn used(&mut self, slots: &mut ItemSlots, position: u64) {
        self.queue.touch(position);
        while self.queue.len() > self.window {
            match self.queue.pop_unless(position) {
                Some(oldest) => {
                    slots.hollow(oldest);
                }
                None => break,
            }
        }
    }
}

impl CachePolicy for HollowAfterUse {
    fn name(&self) -> &'static str {
        "hollow-after-use"
    }

    fn after_add(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }

    fn after_get(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }
}

/// Hollows items whose last access is older than `timeout`
#[derive(Debug)]
pub struct HollowAfterTimeout {
    timeout: Duration,
    queue: TouchQueue,
}

impl HollowAfterTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            queue: TouchQueue::default(),
        }
    }

    fn sweep(&mut self, slots: &mut ItemSlots, current: Option<u64>) {
        let mut hollowed = 0;
        while let Some(oldest) = self.queue.oldest() {
            if Some(oldest) == current {
                break;
            }

            let expired = slots
                .get(oldest)
                .and_then(|item| item.last_access())
                .map_or(true, |at| at.elapsed() > self.timeout);
            if !expired {
                break;
            }

            self.queue.pop_oldest();
            if slots.hollow(oldest) {
                hollowed += 1;
            }
        }

        if hollowed > 0 {
            debug!(hollowed, timeout_ms = self.timeout.as_millis() as u64, "Hollowed idle items");
        }
    }
}

impl CachePolicy for HollowAfterTimeout {
    fn name(&self) -> &'static str {
        "hollow-after-timeout"
    }

    fn before_add(&mut self, slots: &mut ItemSlots) {
        self.sweep(slots, None);
    }

    fn after_add(&mut self, slots: &mut ItemSlots, position: u64) {
        self.queue.touch(position);
        self.sweep(slots, Some(position));
    }

    fn before_get(&mut self, slots: &mut ItemSlots, position: u64) {
        self.sweep(slots, Some(position));
    }

    fn after_get(&mut self, slots: &mut ItemSlots, position: u64) {
        self.queue.touch(position);
    }
}

/// Hollows least recently used items while resident payload bytes exceed
/// `threshold`
#[derive(Debug)]
pub struct HollowAtDataVolume {
    threshold: usize,
    queue: TouchQueue,
}

impl HollowAtDataVolume {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            queue: TouchQueue::default(),
        }
    }

    fn used(&mut self, slots: &mut ItemSlots, position: u64) {
        self.queue.touch(position);
        while slots.resident_bytes() > self.threshold {
            match self.queue.pop_unless(position) {
                Some(oldest) => {
                    slots.hollow(oldest);
                }
                None => break,
            }
        }
    }
}

impl CachePolicy for HollowAtDataVolume {
    fn name(&self) -> &'static str {
        "hollow-at-volume"
    }

    fn after_add(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }

    fn after_get(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }
}

/// Like [`HollowAfterUse`] but empties the slot instead of hollowing it
#[derive(Debug)]
pub struct RemoveAfterUse {
    window: usize,
    queue: TouchQueue,
}

impl RemoveAfterUse {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            queue: TouchQueue::default(),
        }
    }

    fn used(&mut self, slots: &mut ItemSlots, position: u64) {
        self.queue.touch(position);
        while self.queue.len() > self.window {
            match self.queue.pop_unless(position) {
                Some(oldest) => {
                    slots.remove(oldest);
                }
                None => break,
            }
        }
    }
}

impl CachePolicy for RemoveAfterUse {
    fn name(&self) -> &'static str {
        "remove-after-use"
    }

    fn removes_items(&self) -> bool {
        true
    }

    fn after_add(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }

    fn after_get(&mut self, slots: &mut ItemSlots, position: u64) {
        self.used(slots, position);
    }
}

/// Serializable description of a policy.
///
/// String form: `keep`, `hollow-after-use:<items>`,
/// `hollow-after-timeout:<millis>`, `hollow-at-volume:<bytes>`,
/// `remove-after-use:<items>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PolicyConfig {
    #[default]
    Keep,
    HollowAfterUse(usize),
    HollowAfterTimeout(Duration),
    HollowAtDataVolume(usize),
    RemoveAfterUse(usize),
}

impl PolicyConfig {
    pub fn build(self) -> Box<dyn CachePolicy> {
        match self {
            PolicyConfig::Keep => Box::new(KeepEverything),
            PolicyConfig::HollowAfterUse(n) => Box::new(HollowAfterUse::new(n)),
            PolicyConfig::HollowAfterTimeout(d) => Box::new(HollowAfterTimeout::new(d)),
            PolicyConfig::HollowAtDataVolume(b) => Box::new(HollowAtDataVolume::new(b)),
            PolicyConfig::RemoveAfterUse(n) => Box::new(RemoveAfterUse::new(n)),
        }
    }

    pub fn removes_items(self) -> bool {
        matches!(self, PolicyConfig::RemoveAfterUse(_))
    }
}

impl fmt::Display for PolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyConfig::Keep => write!(f, "keep"),
            PolicyConfig::HollowAfterUse(n) => write!(f, "hollow-after-use:{}", n),
            PolicyConfig::HollowAfterTimeout(d) => {
                write!(f, "hollow-after-timeout:{}", d.as_millis())
            }
            PolicyConfig::HollowAtDataVolume(b) => write!(f, "hollow-at-volume:{}", b),
            PolicyConfig::RemoveAfterUse(n) => write!(f, "remove-after-use:{}", n),
        }
    }
}

impl FromStr for PolicyConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s.as_str(), None),
        };

        let number = |arg: Option<&str>| -> Result<u64, String> {
            let arg = arg.ok_or_else(|| format!("policy '{}' needs an argument", name))?;
            arg.parse::<u64>()
                .map_err(|_| format!("invalid argument '{}' for policy '{}'", arg, name))
        };

        match name {
            "keep" | "keep-everything" => Ok(PolicyConfig::Keep),
            "hollow-after-use" => Ok(PolicyConfig::HollowAfterUse(number(arg)? as usize)),
            "hollow-after-timeout" => Ok(PolicyConfig::HollowAfterTimeout(
                Duration::from_millis(number(arg)?),
            )),
            "hollow-at-volume" => Ok(PolicyConfig::HollowAtDataVolume(number(arg)? as usize)),
            "remove-after-use" => Ok(PolicyConfig::RemoveAfterUse(number(arg)? as usize)),
            other => Err(format!("unknown cache policy: {}", other)),
        }
    }
}

impl TryFrom<String> for PolicyConfig {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PolicyConfig> for String {
    fn from(policy: PolicyConfig) -> Self {
        policy.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cache::{IndexCache, SlotState};
    use crate::storage::types::{DataHolder, DataReference, IndexItem, Payload};
    use crate::timestamp::{Scale, Timestamp};

    /// Item whose payload is known to live at `position * size` in storage
    fn stored_item(position: u64, size: usize) -> IndexItem {
        let origin = DataReference::new(position * size as u64, size as u32);
        IndexItem::new(
            Timestamp::absolute(Scale::Seconds, position as i64).unwrap(),
            Payload::Resident(DataHolder::loaded(vec![position as u8; size], origin)),
        )
    }

    #[test]
    fn test_hollow_at_data_volume_scenario() {
        let mut cache = IndexCache::new("volume", PolicyConfig::HollowAtDataVolume(1000).build());

        for p in 0..21 {
            cache.add_item(stored_item(p, 50));
        }
        assert!((0..20).any(|p| cache.state(p) != SlotState::Resident));
        assert_eq!(cache.state(0), SlotState::Hollow(DataReference::new(0, 50)));
        assert_eq!(cache.state(20), SlotState::Resident);
        assert!(cache.resident_bytes() <= 1000);

        for p in 21..100 {
            cache.add_item(stored_item(p, 50));
            assert_eq!(cache.state(p), SlotState::Resident);
            assert!(cache.resident_bytes() <= 1000);
        }
    }

    #[test]
    fn test_hollow_after_use_window() {
        let mut cache = IndexCache::new("use", Box::new(HollowAfterUse::new(3)));
        for p in 0..5 {
            cache.add_item(stored_item(p, 8));
        }

        assert!(cache.peek(0).unwrap().is_hollow());
        assert!(cache.peek(1).unwrap().is_hollow());
        assert!((2..5).all(|p| cache.state(p) == SlotState::Resident));

        // Reading item 2 makes it most recent; the next add evicts item 3
        cache.get_item(2).unwrap();
        cache.add_item(stored_item(5, 8));
        assert_eq!(cache.state(2), SlotState::Resident);
        assert!(cache.peek(3).unwrap().is_hollow());
    }

    #[test]
    fn test_policy_never_evicts_current_item() {
        let mut cache = IndexCache::new("zero", Box::new(HollowAfterUse::new(0)));
        cache.add_item(stored_item(0, 8));
        assert_eq!(cache.state(0), SlotState::Resident);

        cache.add_item(stored_item(1, 8));
        assert!(cache.peek(0).unwrap().is_hollow());
        assert_eq!(cache.state(1), SlotState::Resident);
    }

    #[test]
    fn test_remove_after_use() {
        let mut cache = IndexCache::new("remove", Box::new(RemoveAfterUse::new(2)));
        for p in 0..4 {
            cache.add_item(stored_item(p, 8));
        }

        assert_eq!(cache.state(0), SlotState::Missing);
        assert_eq!(cache.state(1), SlotState::Missing);
        assert!(cache.get_item(0).unwrap().is_none());
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().removed, 2);
    }

    #[test]
    fn test_hollow_after_timeout() {
        let mut cache = IndexCache::new(
            "timeout",
            Box::new(HollowAfterTimeout::new(Duration::from_millis(20))),
        );
        cache.add_item(stored_item(0, 8));
        cache.add_item(stored_item(1, 8));
        assert_eq!(cache.state(0), SlotState::Resident);

        std::thread::sleep(Duration::from_millis(60));
        cache.get_item(1).unwrap();

        assert!(cache.peek(0).unwrap().is_hollow());
        assert_eq!(cache.state(1), SlotState::Resident);
    }

    #[test]
    fn test_policy_config_parse() {
        assert_eq!("keep".parse::<PolicyConfig>().unwrap(), PolicyConfig::Keep);
        assert_eq!(
            "hollow-after-use:64".parse::<PolicyConfig>().unwrap(),
            PolicyConfig::HollowAfterUse(64)
        );
        assert_eq!(
            "HOLLOW-AFTER-TIMEOUT:30000".parse::<PolicyConfig>().unwrap(),
            PolicyConfig::HollowAfterTimeout(Duration::from_secs(30))
        );
        assert_eq!(
            "hollow-at-volume:1048576".parse::<PolicyConfig>().unwrap(),
            PolicyConfig::HollowAtDataVolume(1_048_576)
        );
        assert!("remove-after-use".parse::<PolicyConfig>().is_err());
        assert!("lru:4".parse::<PolicyConfig>().is_err());

        let policy = PolicyConfig::RemoveAfterUse(16);
        assert_eq!(policy.to_string().parse::<PolicyConfig>().unwrap(), policy);
        assert!(policy.removes_items());
        assert!(policy.build().removes_items());
    }
}
