//! Index views
//!
//! An [`IndexView`] is a window `[start, start + len)` over the items of one
//! store, plus a cursor and a mark. Positions seen through a view are
//! relative to its window; they resolve to absolute store positions by
//! adding `start`.
//!
//! A root view covers the whole index. Its window is fixed when it is
//! created and only grows through [`IndexView::refresh`] or appends made
//! through the view itself, so a view keeps a stable picture of the index
//! while other writers append.
//!
//! A selection is a view cut out of another view by time or by position.
//! Selections compose: the window of a selection of a selection is derived
//! from its parent's window, never from the whole index. Selections are
//! read-only.
//!
//! # Example
//! ```ignore
//! let day = view.select(Interval::new(midnight, next_midnight)?, Selector::Data,
//!                       Overlap::Straddle, Lifetime::Continuous)?;
//! let morning = day.select(Interval::new(midnight, noon)?, ...)?;
//! ```

use crate::index::directory::{IndexDirectory, StoreHandle};
use crate::index::{Lifetime, Location, Position, Selector};
use crate::roller::TimeRoller;
use crate::storage::engine::IndexStore;
use crate::storage::error::{IndexError, IndexResult};
use crate::storage::header::IndexHeader;
use crate::storage::types::IndexItem;
use crate::timestamp::Timestamp;
use std::sync::Arc;
use tracing::warn;

/// Closed time interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> IndexResult<Self> {
        if end < start {
            return Err(IndexError::TimestampOutOfBounds(format!(
                "interval ends at {} before it starts at {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Which items a time selection keeps at its lower edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Only items whose timestamp lies inside the interval
    Inside,
    /// Also the item still valid at the interval start (continuous lifetime)
    Straddle,
}

/// Span between the cursor and the mark, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub first: u64,
    pub last: u64,
}

impl Region {
    /// Number of positions covered; a region always holds at least one
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Absolute window of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u64,
    len: u64,
}

/// Directory registration; keeps the store's handle count up to date
#[derive(Debug)]
struct Registration {
    directory: Arc<IndexDirectory>,
    handle: StoreHandle,
}

impl Clone for Registration {
    fn clone(&self) -> Self {
        if let Err(e) = self.directory.add_handle(self.handle) {
            warn!(error = %e, "Failed to register view handle");
        }
        Self {
            directory: Arc::clone(&self.directory),
            handle: self.handle,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(e) = self.directory.remove_handle(self.handle) {
            warn!(error = %e, "Failed to release view handle");
        }
    }
}

/// Navigational window over one store
#[derive(Debug, Clone)]
pub struct IndexView {
    store: Arc<IndexStore>,
    registration: Option<Registration>,
    window: Window,
    /// Window of the view this one was selected from
    parent: Option<Window>,
    cursor: Position,
    mark: Position,
}

impl IndexView {
    /// Root view over `store`, not tracked by any directory
    pub fn new(store: Arc<IndexStore>) -> Self {
        let len = store.len();
        Self {
            store,
            registration: None,
            window: Window { start: 0, len },
            parent: None,
            cursor: Position::TooLow,
            mark: Position::TooLow,
        }
    }

    /// Root view owning one handle count of `handle` in `directory`
    pub(crate) fn registered(
        store: Arc<IndexStore>,
        directory: Arc<IndexDirectory>,
        handle: StoreHandle,
    ) -> Self {
        Self {
            registration: Some(Registration { directory, handle }),
            ..Self::new(store)
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Directory handle of the backing store, if registered
    pub fn handle(&self) -> Option<StoreHandle> {
        self.registration.as_ref().map(|r| r.handle)
    }

    pub fn header(&self) -> IndexHeader {
        self.store.header()
    }

    pub fn is_selection(&self) -> bool {
        self.parent.is_some()
    }

    pub fn len(&self) -> u64 {
        self.window.len
    }

    pub fn is_empty(&self) -> bool {
        self.window.len == 0
    }

    /// Absolute position of the first item in the window
    pub fn start(&self) -> u64 {
        self.window.start
    }

    /// Inclusive absolute bounds, `None` for an empty window
    pub fn bounds(&self) -> Option<(u64, u64)> {
        if self.is_empty() {
            return None;
        }
        Some((self.window.start, self.window.start + self.window.len - 1))
    }

    /// Inclusive absolute bounds of the view this selection came from
    pub fn parent_bounds(&self) -> Option<(u64, u64)> {
        self.parent
            .filter(|w| w.len > 0)
            .map(|w| (w.start, w.start + w.len - 1))
    }

    /// Extend a root view to the current length of the index
    pub fn refresh(&mut self) -> u64 {
        if !self.is_selection() {
            self.window.len = self.store.len();
        }
        self.window.len
    }

    pub fn position(&self) -> Position {
        self.cursor
    }

    /// Move the cursor to `position`
    pub fn set_position(&mut self, position: u64) -> IndexResult<Position> {
        self.check_position(position)?;
        self.cursor = Position::At(position);
        Ok(self.cursor)
    }

    /// Move the cursor to the item matching `timestamp`, clamping to the
    /// window when the timestamp lies outside it. An empty view leaves the
    /// cursor at `TooHigh`.
    pub fn position_at(
        &mut self,
        timestamp: Timestamp,
        selector: Selector,
        lifetime: Lifetime,
    ) -> IndexResult<Position> {
        let location = self.locate(timestamp, selector, lifetime)?;
        self.cursor = match location.position {
            _ if self.is_empty() => Position::TooHigh,
            Position::TooLow => Position::At(0),
            Position::TooHigh => Position::At(self.window.len - 1),
            at => at,
        };
        Ok(self.cursor)
    }

    /// Resolve `timestamp` to a position relative to this window
    pub fn locate(
        &self,
        timestamp: Timestamp,
        selector: Selector,
        lifetime: Lifetime,
    ) -> IndexResult<Location> {
        if selector == Selector::Data && !self.store.in_time_order() {
            return Err(IndexError::TimestampOutOfBounds(format!(
                "index {} is not in time order",
                self.store.name()
            )));
        }
        if self.is_empty() {
            return Ok(Location::too_high());
        }

        let location = self.store.locate(timestamp, selector, lifetime)?;
        let (first, last) = (self.window.start, self.window.start + self.window.len - 1);

        Ok(match location.position {
            Position::At(p) if p < first => Location::too_low(),
            Position::At(p) if p > last => Location::too_high(),
            Position::At(p) => Location {
                timestamp: location.timestamp,
                position: Position::At(p - first),
            },
            sentinel => Location {
                timestamp: None,
                position: sentinel,
            },
        })
    }

    /// Advance the cursor; stepping past the end yields `TooHigh`
    pub fn forward(&mut self) -> Position {
        self.cursor = match self.cursor {
            _ if self.is_empty() => Position::TooHigh,
            Position::TooLow => Position::At(0),
            Position::At(p) if p + 1 < self.window.len => Position::At(p + 1),
            _ => Position::TooHigh,
        };
        self.cursor
    }

    /// Step the cursor back; stepping before the start yields `TooLow`
    pub fn backward(&mut self) -> Position {
        self.cursor = match self.cursor {
            _ if self.is_empty() => Position::TooLow,
            Position::TooHigh => Position::At(self.window.len - 1),
            Position::At(p) if p > 0 => Position::At(p - 1),
            _ => Position::TooLow,
        };
        self.cursor
    }

    /// Save the cursor as the mark
    pub fn mark(&mut self) {
        self.mark = self.cursor;
    }

    pub fn marked(&self) -> Position {
        self.mark
    }

    /// Swap cursor and mark
    pub fn exchange(&mut self) {
        std::mem::swap(&mut self.cursor, &mut self.mark);
    }

    /// Positions between cursor and mark, if both are on an item
    pub fn region(&self) -> Option<Region> {
        let (a, b) = (self.cursor.get()?, self.mark.get()?);
        Some(Region {
            first: a.min(b),
            last: a.max(b),
        })
    }

    /// Item at the cursor, `None` on a sentinel
    pub fn current(&self) -> IndexResult<Option<IndexItem>> {
        match self.cursor {
            Position::At(p) => self.get_item(p).map(Some),
            _ => Ok(None),
        }
    }

    /// Item at `position` within the window
    pub fn get_item(&self, position: u64) -> IndexResult<IndexItem> {
        self.check_position(position)?;
        self.store.get_item(self.window.start + position)
    }

    /// Iterate the items of the window in order
    pub fn items(&self) -> impl Iterator<Item = IndexResult<IndexItem>> + '_ {
        (0..self.window.len).map(move |p| self.get_item(p))
    }

    /// Timestamp of the first item in the window
    pub fn first_time(&self, selector: Selector) -> IndexResult<Option<Timestamp>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.get_item(0)?.timestamp(selector)))
    }

    /// Timestamp of the last item in the window
    pub fn last_time(&self, selector: Selector) -> IndexResult<Option<Timestamp>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.get_item(self.window.len - 1)?.timestamp(selector)))
    }

    /// Append through a root view; returns the new length of the view
    pub fn add_item(&mut self, item: IndexItem) -> IndexResult<u64> {
        if self.is_selection() {
            return Err(IndexError::SelectionReadOnly);
        }
        self.store.add_item(item)?;
        Ok(self.refresh())
    }

    /// Append a reference to `position` of `target`
    pub fn add_reference(
        &mut self,
        index_time: Timestamp,
        target: &IndexView,
        position: u64,
    ) -> IndexResult<u64> {
        if self.is_selection() {
            return Err(IndexError::SelectionReadOnly);
        }
        target.check_position(position)?;
        self.store.add_reference(
            index_time,
            target.store.id(),
            target.store.uri(),
            target.window.start + position,
        )?;
        Ok(self.refresh())
    }

    /// Sub-view of items whose timestamps fall in `interval`.
    ///
    /// The first item is the first at or after `interval.start`, or with
    /// [`Overlap::Straddle`] and a continuous lifetime, the item still valid
    /// at `interval.start`. The last item is the last at or before
    /// `interval.end`. The result never extends beyond this view.
    pub fn select(
        &self,
        interval: Interval,
        selector: Selector,
        overlap: Overlap,
        lifetime: Lifetime,
    ) -> IndexResult<IndexView> {
        let lower = if overlap == Overlap::Straddle && lifetime == Lifetime::Continuous {
            Lifetime::Continuous
        } else {
            Lifetime::Discrete
        };

        let first = match self.locate(interval.start, selector, lower)?.position {
            Position::TooLow => Some(0),
            Position::At(p) => Some(p),
            Position::TooHigh => None,
        };
        let last = match self.locate(interval.end, selector, Lifetime::Continuous)?.position {
            Position::TooHigh if !self.is_empty() => Some(self.window.len - 1),
            Position::At(p) => Some(p),
            _ => None,
        };

        match first.zip(last).filter(|(first, last)| first <= last) {
            Some((first, last)) => Ok(self.sub_view(first, last - first + 1)),
            None => Ok(self.sub_view(first.unwrap_or(self.window.len).min(self.window.len), 0)),
        }
    }

    /// Sub-view of positions `first..=last` of this view
    pub fn select_positions(&self, first: u64, last: u64) -> IndexResult<IndexView> {
        self.check_position(first)?;
        self.check_position(last)?;
        if last < first {
            return Err(IndexError::PositionOutOfBounds {
                position: last,
                length: self.window.len,
            });
        }
        Ok(self.sub_view(first, last - first + 1))
    }

    /// Selection of the roller period containing `at`
    pub fn select_rolled(
        &self,
        at: Timestamp,
        roller: &dyn TimeRoller,
        selector: Selector,
        lifetime: Lifetime,
    ) -> IndexResult<IndexView> {
        let interval = roller.period(at)?;
        self.select(interval, selector, Overlap::Inside, lifetime)
    }

    /// Selection of the region between cursor and mark
    pub fn select_region(&self) -> IndexResult<Option<IndexView>> {
        match self.region() {
            Some(region) => self.select_positions(region.first, region.last).map(Some),
            None => Ok(None),
        }
    }

    fn sub_view(&self, first: u64, len: u64) -> IndexView {
        IndexView {
            store: Arc::clone(&self.store),
            registration: self.registration.clone(),
            window: Window {
                start: self.window.start + first,
                len,
            },
            parent: Some(self.window),
            cursor: Position::TooLow,
            mark: Position::TooLow,
        }
    }

    fn check_position(&self, position: u64) -> IndexResult<()> {
        if position >= self.window.len {
            return Err(IndexError::PositionOutOfBounds {
                position,
                length: self.window.len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roller::{RollUnit, TruncatingRoller};
    use crate::storage::engine::StoreContext;
    use crate::storage::spec::IndexSpec;
    use crate::timestamp::Scale;

    fn ts(s: i64) -> Timestamp {
        Timestamp::absolute(Scale::Seconds, s).unwrap()
    }

    fn interval(a: i64, b: i64) -> Interval {
        Interval::new(ts(a), ts(b)).unwrap()
    }

    /// Root view over items at 10, 20, ..., 10 * count
    fn view_of(count: i64) -> IndexView {
        let store = IndexStore::create(IndexSpec::in_core("view"), StoreContext::default()).unwrap();
        store.activate().unwrap();
        for i in 1..=count {
            store.add_item(IndexItem::with_bytes(ts(10 * i), vec![i as u8])).unwrap();
        }
        IndexView::new(Arc::new(store))
    }

    #[test]
    fn test_cursor_navigation() {
        let mut view = view_of(3);
        assert_eq!(view.position(), Position::TooLow);
        assert_eq!(view.forward(), Position::At(0));
        assert_eq!(view.forward(), Position::At(1));
        assert_eq!(view.forward(), Position::At(2));
        assert_eq!(view.forward(), Position::TooHigh);
        assert_eq!(view.forward(), Position::TooHigh);
        assert!(view.current().unwrap().is_none());

        assert_eq!(view.backward(), Position::At(2));
        view.set_position(0).unwrap();
        assert_eq!(view.backward(), Position::TooLow);
        assert!(matches!(
            view.set_position(3),
            Err(IndexError::PositionOutOfBounds { position: 3, length: 3 })
        ));
    }

    #[test]
    fn test_position_at_clamps() {
        let mut view = view_of(3);
        assert_eq!(
            view.position_at(ts(25), Selector::Data, Lifetime::Continuous).unwrap(),
            Position::At(1)
        );
        assert_eq!(
            view.position_at(ts(25), Selector::Data, Lifetime::Discrete).unwrap(),
            Position::At(2)
        );
        assert_eq!(
            view.position_at(ts(1), Selector::Data, Lifetime::Continuous).unwrap(),
            Position::At(0)
        );
        assert_eq!(
            view.position_at(ts(99), Selector::Data, Lifetime::Continuous).unwrap(),
            Position::At(2)
        );
        let item = view.current().unwrap().unwrap();
        assert_eq!(item.data_timestamp(), ts(30));

        let mut empty = view_of(0);
        assert_eq!(
            empty.position_at(ts(1), Selector::Data, Lifetime::Continuous).unwrap(),
            Position::TooHigh
        );
    }

    #[test]
    fn test_mark_exchange_region() {
        let mut view = view_of(5);
        view.set_position(3).unwrap();
        view.mark();
        view.set_position(1).unwrap();

        assert_eq!(view.region(), Some(Region { first: 1, last: 3 }));
        view.exchange();
        assert_eq!(view.position(), Position::At(3));
        assert_eq!(view.marked(), Position::At(1));
        assert_eq!(view.region(), Some(Region { first: 1, last: 3 }));
        assert_eq!(view.region().unwrap().len(), 3);

        let region = view.select_region().unwrap().unwrap();
        assert_eq!(region.bounds(), Some((1, 3)));

        view.mark();
        assert_eq!(view.region(), Some(Region { first: 3, last: 3 }));
        assert_eq!(view.region().unwrap().len(), 1);

        view.forward();
        view.forward();
        assert_eq!(view.region(), None);
    }

    #[test]
    fn test_select_by_time() {
        let view = view_of(10);

        let inside = view
            .select(interval(25, 65), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert_eq!(inside.bounds(), Some((2, 5)));
        assert!(inside.is_selection());
        assert_eq!(inside.parent_bounds(), Some((0, 9)));

        let straddle = view
            .select(interval(25, 65), Selector::Data, Overlap::Straddle, Lifetime::Continuous)
            .unwrap();
        assert_eq!(straddle.bounds(), Some((1, 5)));

        let discrete = view
            .select(interval(25, 65), Selector::Data, Overlap::Straddle, Lifetime::Discrete)
            .unwrap();
        assert_eq!(discrete.bounds(), Some((2, 5)));

        let exact = view
            .select(interval(30, 60), Selector::Index, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert_eq!(exact.bounds(), Some((2, 5)));
        assert_eq!(exact.first_time(Selector::Index).unwrap(), Some(ts(30)));
        assert_eq!(exact.last_time(Selector::Index).unwrap(), Some(ts(60)));
    }

    #[test]
    fn test_select_edges() {
        let view = view_of(5);

        let all = view
            .select(interval(0, 1000), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert_eq!(all.bounds(), Some((0, 4)));

        let before = view
            .select(interval(0, 5), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert!(before.is_empty());

        let after = view
            .select(interval(60, 90), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert!(after.is_empty());

        let gap = view
            .select(interval(21, 29), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        assert!(gap.is_empty());
        assert_eq!(gap.bounds(), None);
    }

    #[test]
    fn test_selection_composition() {
        let view = view_of(20);

        let outer = view
            .select(interval(40, 150), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        let nested = outer
            .select(interval(70, 300), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();
        let direct = view
            .select(interval(70, 150), Selector::Data, Overlap::Inside, Lifetime::Continuous)
            .unwrap();

        assert_eq!(nested.bounds(), direct.bounds());
        assert_eq!(nested.bounds(), Some((6, 14)));
        assert_eq!(nested.get_item(0).unwrap().position(), Some(6));
        assert_eq!(nested.parent_bounds(), outer.bounds());

        let by_position = outer.select_positions(3, 5).unwrap();
        assert_eq!(by_position.bounds(), Some((6, 8)));
        let inner = by_position.select_positions(1, 1).unwrap();
        assert_eq!(inner.bounds(), Some((7, 7)));
        assert!(by_position.select_positions(2, 3).is_err());
    }

    #[test]
    fn test_selection_is_read_only() {
        let view = view_of(3);
        let mut selection = view.select_positions(0, 1).unwrap();
        assert!(matches!(
            selection.add_item(IndexItem::with_bytes(ts(99), vec![0])),
            Err(IndexError::SelectionReadOnly)
        ));
        assert!(matches!(
            selection.add_reference(ts(99), &view, 0),
            Err(IndexError::SelectionReadOnly)
        ));
    }

    #[test]
    fn test_stable_windows() {
        let mut writer = view_of(2);
        let reader = writer.clone();

        writer.add_item(IndexItem::with_bytes(ts(30), vec![3])).unwrap();
        assert_eq!(writer.len(), 3);
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.store().len(), 3);

        let mut reader = reader;
        assert_eq!(reader.refresh(), 3);
        assert_eq!(reader.items().count(), 3);
    }

    #[test]
    fn test_select_rolled() {
        let store = IndexStore::create(IndexSpec::in_core("roll"), StoreContext::default()).unwrap();
        store.activate().unwrap();
        for s in [50, 59, 60, 61, 119, 120, 200] {
            store.add_item(IndexItem::with_bytes(ts(s), vec![0])).unwrap();
        }
        let view = IndexView::new(Arc::new(store));

        let roller = TruncatingRoller::new(RollUnit::Minute);
        let minute = view
            .select_rolled(ts(90), &roller, Selector::Data, Lifetime::Discrete)
            .unwrap();
        assert_eq!(minute.bounds(), Some((2, 4)));
    }

    #[test]
    fn test_out_of_order_index_refuses_data_positioning() {
        let store = IndexStore::create(IndexSpec::in_core("unordered"), StoreContext::default()).unwrap();
        store.activate().unwrap();
        store.add_item(IndexItem::with_bytes(ts(10), vec![0])).unwrap();
        store.add_item(IndexItem::with_bytes(ts(20), vec![0]).data_time(ts(5))).unwrap();
        let mut view = IndexView::new(Arc::new(store));

        assert!(matches!(
            view.position_at(ts(7), Selector::Data, Lifetime::Continuous),
            Err(IndexError::TimestampOutOfBounds(_))
        ));
        assert_eq!(
            view.position_at(ts(15), Selector::Index, Lifetime::Continuous).unwrap(),
            Position::At(0)
        );
    }
}
