//! Process-wide directory of open index stores
//!
//! Every store opened through the directory is registered once, keyed by URI
//! and by index id, and shared by all views over it. Each view owns one
//! handle count; when the last one is released the store is closed and its
//! entry removed.
//!
//! Opening is gated per URI: the first caller gets an [`OpenTicket`] and does
//! the actual open, concurrent callers for the same URI wait for it and then
//! attach to the registered store.

use crate::index::view::IndexView;
use crate::storage::engine::{IndexStore, StoreContext};
use crate::storage::error::{IndexError, IndexResult, StoreFault};
use crate::storage::spec::{IndexSpec, SpecDefaults};
use crate::storage::types::{IndexId, IndexItem, IndexReference};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Generational reference to a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    slot: u32,
    generation: u32,
}

/// Outcome of passing the open gate for a URI
#[derive(Debug)]
pub enum Gate<'a> {
    /// Caller must open the store and register it through the ticket
    Proceed(OpenTicket<'a>),
    /// Store is already registered; one handle count now belongs to the caller
    Attach(StoreHandle),
}

/// Exclusive right to open one URI; dropping it unblocks waiters
#[derive(Debug)]
pub struct OpenTicket<'a> {
    directory: &'a IndexDirectory,
    uri: String,
    done: bool,
}

impl OpenTicket<'_> {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Register `store` with one handle count and release the gate
    pub fn complete(mut self, store: IndexStore) -> IndexResult<StoreHandle> {
        let mut state = self.directory.state.lock();
        state.opening.remove(&self.uri);
        self.done = true;
        self.directory.opened.notify_all();

        if let Some(handle) = state.by_id.get(&store.id()).copied() {
            let existing = state.live(handle).map(|live| live.store.uri().to_string());
            return Err(IndexError::OpenFailed {
                uri: self.uri.clone(),
                source: StoreFault::Unsupported(format!(
                    "index {} is already open as {}",
                    store.id(),
                    existing.unwrap_or_default()
                )),
            });
        }

        let handle = state.insert(Arc::new(store), self.uri.clone());
        Ok(handle)
    }
}

impl Drop for OpenTicket<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.directory.release_gate(&self.uri);
        }
    }
}

#[derive(Debug)]
struct Live {
    store: Arc<IndexStore>,
    uri: String,
    refs: usize,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    live: Option<Live>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    entries: Vec<Entry>,
    free: Vec<u32>,
    by_uri: HashMap<String, StoreHandle>,
    by_id: HashMap<IndexId, StoreHandle>,
    /// URIs some caller is currently opening or closing
    opening: HashSet<String>,
    shut_down: bool,
}

impl DirectoryState {
    fn live(&self, handle: StoreHandle) -> Option<&Live> {
        self.entries
            .get(handle.slot as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.live.as_ref())
    }

    fn live_mut(&mut self, handle: StoreHandle) -> Option<&mut Live> {
        self.entries
            .get_mut(handle.slot as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.live.as_mut())
    }

    fn insert(&mut self, store: Arc<IndexStore>, uri: String) -> StoreHandle {
        let id = store.id();
        let live = Live {
            store,
            uri: uri.clone(),
            refs: 1,
        };

        let handle = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.entries[slot as usize];
                entry.live = Some(live);
                StoreHandle {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    live: Some(live),
                });
                StoreHandle {
                    slot: (self.entries.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        self.by_uri.insert(uri, handle);
        self.by_id.insert(id, handle);
        handle
    }

    fn remove(&mut self, handle: StoreHandle) -> Option<Live> {
        let entry = self.entries.get_mut(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let live = entry.live.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.by_uri.remove(&live.uri);
        self.by_id.remove(&live.store.id());
        Some(live)
    }

    /// Unregister `handle` and hold its URI's gate until the store is closed
    fn remove_for_close(&mut self, handle: StoreHandle) -> Option<Live> {
        let live = self.remove(handle)?;
        self.opening.insert(live.uri.clone());
        Some(live)
    }
}

/// Shared table of open stores
#[derive(Debug)]
pub struct IndexDirectory {
    context: StoreContext,
    defaults: SpecDefaults,
    /// How long to wait for another caller opening the same URI
    gate_timeout: Option<Duration>,
    state: Mutex<DirectoryState>,
    opened: Condvar,
}

impl IndexDirectory {
    pub fn new(context: StoreContext) -> Self {
        Self {
            context,
            defaults: SpecDefaults::default(),
            gate_timeout: None,
            state: Mutex::new(DirectoryState::default()),
            opened: Condvar::new(),
        }
    }

    /// Defaults applied when building specs from properties
    pub fn with_defaults(mut self, defaults: SpecDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Give up waiting on the open gate after `timeout`
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = Some(timeout);
        self
    }

    pub fn context(&self) -> &StoreContext {
        &self.context
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.state.lock().by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pass the open gate for `uri`.
    ///
    /// Blocks while another caller holds the ticket for the same URI.
    pub fn index_gate(&self, uri: &str) -> IndexResult<Gate<'_>> {
        let deadline = self.gate_timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if state.shut_down {
                return Err(IndexError::OpenFailed {
                    uri: uri.to_string(),
                    source: StoreFault::Unsupported("index directory is shut down".into()),
                });
            }

            if let Some(handle) = state.by_uri.get(uri).copied() {
                if let Some(live) = state.live_mut(handle) {
                    live.refs += 1;
                    return Ok(Gate::Attach(handle));
                }
            }

            if state.opening.insert(uri.to_string()) {
                return Ok(Gate::Proceed(OpenTicket {
                    directory: self,
                    uri: uri.to_string(),
                    done: false,
                }));
            }

            debug!(uri, "Waiting for concurrent open");
            match deadline {
                Some(deadline) => {
                    if self.opened.wait_until(&mut state, deadline).timed_out()
                        && state.opening.contains(uri)
                    {
                        warn!(uri, "Timed out waiting for concurrent open");
                        return Err(IndexError::OpenFailed {
                            uri: uri.to_string(),
                            source: StoreFault::Io(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "timed out waiting for another open of the same index",
                            )),
                        });
                    }
                }
                None => self.opened.wait(&mut state),
            }
        }
    }

    /// Create a new index and return a root view over it
    pub fn create(self: &Arc<Self>, spec: IndexSpec) -> IndexResult<IndexView> {
        let uri = spec.uri();
        match self.index_gate(&uri)? {
            Gate::Attach(handle) => {
                self.remove_handle(handle)?;
                Err(IndexError::CreateFailed {
                    uri,
                    source: StoreFault::Unsupported("index is already open".into()),
                })
            }
            Gate::Proceed(ticket) => {
                let store = IndexStore::create(spec, self.context.clone())?;
                let handle = ticket.complete(store)?;
                info!(uri = %uri, "Registered new index");
                self.view(handle)
            }
        }
    }

    /// Open an existing index, attaching if it is already registered
    pub fn open(self: &Arc<Self>, spec: IndexSpec) -> IndexResult<IndexView> {
        let uri = spec.uri();
        match self.index_gate(&uri)? {
            Gate::Attach(handle) => self.view(handle),
            Gate::Proceed(ticket) => {
                let store = IndexStore::open(spec, self.context.clone())?;
                let handle = ticket.complete(store)?;
                info!(uri = %uri, "Registered index");
                self.view(handle)
            }
        }
    }

    /// Open the index if its files exist, otherwise create it
    pub fn open_or_create(self: &Arc<Self>, spec: IndexSpec) -> IndexResult<IndexView> {
        let uri = spec.uri();
        match self.index_gate(&uri)? {
            Gate::Attach(handle) => self.view(handle),
            Gate::Proceed(ticket) => {
                let store = IndexStore::open_or_create(spec, self.context.clone())?;
                let handle = ticket.complete(store)?;
                self.view(handle)
            }
        }
    }

    pub fn create_from_properties(
        self: &Arc<Self>,
        properties: &HashMap<String, String>,
    ) -> IndexResult<IndexView> {
        self.create(IndexSpec::from_properties_with(properties, self.defaults)?)
    }

    pub fn open_from_properties(
        self: &Arc<Self>,
        properties: &HashMap<String, String>,
    ) -> IndexResult<IndexView> {
        self.open(IndexSpec::from_properties_with(properties, self.defaults)?)
    }

    /// Root view over a registered store, consuming one handle count
    fn view(self: &Arc<Self>, handle: StoreHandle) -> IndexResult<IndexView> {
        match self.store(handle) {
            Ok(store) => Ok(IndexView::registered(store, Arc::clone(self), handle)),
            Err(e) => {
                if let Err(close_err) = self.remove_handle(handle) {
                    warn!(error = %close_err, "Failed to release handle");
                }
                Err(e)
            }
        }
    }

    /// Root view over the registered store with `id`
    pub fn attach(self: &Arc<Self>, id: IndexId) -> IndexResult<IndexView> {
        let handle = {
            let mut state = self.state.lock();
            let handle = state.by_id.get(&id).copied().ok_or(IndexError::UnknownIndex(id))?;
            state.live_mut(handle).ok_or(IndexError::StaleHandle)?.refs += 1;
            handle
        };
        self.view(handle)
    }

    /// Store behind `handle`
    pub fn store(&self, handle: StoreHandle) -> IndexResult<Arc<IndexStore>> {
        self.state
            .lock()
            .live(handle)
            .map(|live| Arc::clone(&live.store))
            .ok_or(IndexError::StaleHandle)
    }

    pub fn lookup_uri(&self, uri: &str) -> Option<StoreHandle> {
        self.state.lock().by_uri.get(uri).copied()
    }

    pub fn lookup_id(&self, id: IndexId) -> Option<StoreHandle> {
        self.state.lock().by_id.get(&id).copied()
    }

    /// Current handle count of `handle`, zero once released
    pub fn ref_count(&self, handle: StoreHandle) -> usize {
        self.state.lock().live(handle).map_or(0, |live| live.refs)
    }

    pub fn add_handle(&self, handle: StoreHandle) -> IndexResult<()> {
        let mut state = self.state.lock();
        let live = state.live_mut(handle).ok_or(IndexError::StaleHandle)?;
        live.refs += 1;
        Ok(())
    }

    /// Release one handle count; the last release closes the store
    pub fn remove_handle(&self, handle: StoreHandle) -> IndexResult<()> {
        let released = {
            let mut state = self.state.lock();
            let live = state.live_mut(handle).ok_or(IndexError::StaleHandle)?;
            live.refs -= 1;
            if live.refs > 0 {
                return Ok(());
            }
            state.remove_for_close(handle)
        };

        if let Some(live) = released {
            debug!(uri = %live.uri, "Last handle released");
            let closed = live.store.close();
            self.release_gate(&live.uri);
            if let Err(e) = closed {
                error!(uri = %live.uri, error = %e, "Failed to close index");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Let waiters on `uri` through the open gate again
    fn release_gate(&self, uri: &str) {
        self.state.lock().opening.remove(uri);
        self.opened.notify_all();
    }

    /// Item that `reference` points at, in a registered store
    pub fn follow(&self, reference: &IndexReference) -> IndexResult<IndexItem> {
        let store = {
            let state = self.state.lock();
            let handle = state
                .by_id
                .get(&reference.index_id)
                .copied()
                .ok_or(IndexError::UnknownIndex(reference.index_id))?;
            state
                .live(handle)
                .map(|live| Arc::clone(&live.store))
                .ok_or(IndexError::StaleHandle)?
        };
        store.get_item(reference.position)
    }

    /// Commit and close every registered store.
    ///
    /// Failures are logged and do not stop the remaining stores from closing.
    /// Later opens through this directory fail.
    pub fn shutdown(&self) {
        let stores: Vec<Live> = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            let handles: Vec<StoreHandle> = state.by_uri.values().copied().collect();
            handles
                .into_iter()
                .filter_map(|h| state.remove_for_close(h))
                .collect()
        };
        self.opened.notify_all();

        let count = stores.len();
        for live in stores {
            if let Err(e) = live.store.commit() {
                error!(uri = %live.uri, error = %e, "Failed to commit index on shutdown");
            }
            if let Err(e) = live.store.close() {
                error!(uri = %live.uri, error = %e, "Failed to close index on shutdown");
            }
            self.release_gate(&live.uri);
        }
        info!(count, "Index directory shut down");
    }
}

impl Drop for IndexDirectory {
    fn drop(&mut self) {
        self.shutdown();
    }
}
