//! Index lifecycle events
//!
//! Stores report what happens to them through an [`EventSink`]. Delivery is
//! fire-and-forget: a sink cannot fail or veto the operation that produced
//! the event, and is called after the store's own state is updated.

use crate::storage::types::IndexId;
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

/// Something that happened to an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Created { id: IndexId, name: String },
    Opened { id: IndexId, name: String },
    Closed { id: IndexId, name: String },
    Committed { id: IndexId, name: String, length: u64 },
    ItemAdded { id: IndexId, position: u64 },
    ItemAccessed { id: IndexId, position: u64 },
}

impl IndexEvent {
    pub fn index_id(&self) -> IndexId {
        match self {
            IndexEvent::Created { id, .. }
            | IndexEvent::Opened { id, .. }
            | IndexEvent::Closed { id, .. }
            | IndexEvent::Committed { id, .. }
            | IndexEvent::ItemAdded { id, .. }
            | IndexEvent::ItemAccessed { id, .. } => *id,
        }
    }
}

/// Receiver of index events
pub trait EventSink: Send + Sync + fmt::Debug {
    fn on_event(&self, event: &IndexEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&self, _event: &IndexEvent) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: &IndexEvent) {
        match event {
            IndexEvent::ItemAdded { id, position } | IndexEvent::ItemAccessed { id, position } => {
                tracing::trace!(index = %id, position, event = ?event, "Index event");
            }
            _ => debug!(index = %event.index_id(), event = ?event, "Index event"),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<IndexEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far
    pub fn events(&self) -> Vec<IndexEvent> {
        self.events.lock().clone()
    }

    /// Events received so far, emptying the sink
    pub fn take(&self) -> Vec<IndexEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &IndexEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let id = IndexId::generate();
        sink.on_event(&IndexEvent::ItemAdded { id, position: 0 });
        sink.on_event(&IndexEvent::Closed {
            id,
            name: "events".into(),
        });

        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].index_id(), id);
        assert!(sink.events().is_empty());
    }
}
