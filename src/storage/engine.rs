//! Index Store
//!
//! The store behind every index. One engine serves all four [`IndexKind`]s;
//! the kind only decides where payload bytes go:
//! - **incore**: nowhere, items live in the cache only
//! - **inline**: right after each record in the index file
//! - **external**: appended to a companion data file
//! - **shadow**: never written; items point into a data file owned elsewhere
//!
//! Write path: precondition checks → payload bytes → record → header
//! bookkeeping → cache. An item becomes visible only after all of it is
//! recorded.
//!
//! Read path: cache hit, or on a miss read the record and/or payload back
//! from storage into the cache slot at its position.
//!
//! All state sits behind one mutex; stores are shared as `Arc<IndexStore>`.

use crate::events::{EventSink, IndexEvent, NoopSink};
use crate::index::{locate, CacheStats, IndexCache, Lifetime, Location, Selector, SlotState};
use crate::registry::{DataTypeRegistry, TypeRegistry};
use crate::storage::error::{IndexError, IndexResult, StoreFault};
use crate::storage::header::{IndexHeader, IndexKind, HEADER_REGION};
use crate::storage::lock::WriteLock;
use crate::storage::record::{ItemRecord, PayloadKind, RECORD_SIZE};
use crate::storage::spec::{IndexSpec, LoadStyle};
use crate::storage::types::{
    DataHolder, DataReference, DataType, IndexId, IndexItem, IndexReference, Payload,
};
use crate::timestamp::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Collaborators shared by the stores of one process
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub registry: Arc<dyn TypeRegistry>,
    pub events: Arc<dyn EventSink>,
    /// fsync index and data files on commit
    pub sync_on_commit: bool,
}

impl Default for StoreContext {
    fn default() -> Self {
        Self {
            registry: Arc::new(DataTypeRegistry::builtin()),
            events: Arc::new(NoopSink),
            sync_on_commit: true,
        }
    }
}

/// Outcome of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Nothing changed since the last commit
    NothingToDo,
}

/// Open file handles of a file-backed store
#[derive(Debug)]
struct StoreFiles {
    index: File,
    index_path: PathBuf,
    data: Option<File>,
}

impl StoreFiles {
    /// File holding payload bytes for `kind`
    fn payload_file(&self, kind: IndexKind) -> Result<&File, StoreFault> {
        match kind {
            IndexKind::Inline => Ok(&self.index),
            _ => self
                .data
                .as_ref()
                .ok_or_else(|| StoreFault::Unsupported(format!("{} index has no data file", kind))),
        }
    }
}

/// Mutable state of a store
#[derive(Debug)]
struct StoreState {
    header: IndexHeader,
    cache: IndexCache,
    files: Option<StoreFiles>,
    lock: Option<WriteLock>,
    /// Record offsets of inline indexes, which vary with payload size
    offsets: Vec<u64>,
    default_type: DataType,
    activated: bool,
    closed: bool,
    dirty: bool,
}

impl StoreState {
    fn record_offset(&self, position: u64) -> u64 {
        match self.header.kind {
            IndexKind::Inline => self.offsets[position as usize],
            _ => self.header.first_offset + position * RECORD_SIZE as u64,
        }
    }

    fn files(&self) -> Result<&StoreFiles, StoreFault> {
        self.files
            .as_ref()
            .ok_or_else(|| StoreFault::Unsupported("index has no backing files".into()))
    }

    fn read_record(&self, position: u64) -> Result<ItemRecord, StoreFault> {
        let mut buf = [0u8; RECORD_SIZE];
        read_at(&self.files()?.index, self.record_offset(position), &mut buf)?;
        ItemRecord::from_bytes(&buf)
    }

    fn read_payload(&self, reference: DataReference) -> Result<DataHolder, StoreFault> {
        let file = self.files()?.payload_file(self.header.kind)?;
        let mut buf = vec![0u8; reference.size as usize];
        read_at(file, reference.offset, &mut buf)?;
        Ok(DataHolder::loaded(buf, reference))
    }

    /// Timestamp of the item at `position`, read from its record when the
    /// slot is empty. Does not populate the cache.
    fn timestamp_at(&self, position: u64, selector: Selector) -> Result<Timestamp, StoreFault> {
        if let Some(item) = self.cache.peek(position) {
            return Ok(item.timestamp(selector));
        }
        let record = self.read_record(position)?;
        Ok(match selector {
            Selector::Index => record.index_time,
            Selector::Data => record.data_time,
        })
    }

    /// Make sure the slot at `position` holds its item with payload loaded
    fn load(&mut self, position: u64) -> Result<(), StoreFault> {
        let mut missed = false;

        if self.cache.state(position) == SlotState::Missing {
            let record = self.read_record(position)?;
            let item = item_from_record(&self.header, record)?;
            self.cache
                .retrieve(position, item)
                .map_err(|e| StoreFault::Corruption(e.to_string()))?;
            trace!(index = %self.header.name, position, "Loaded item record");
            missed = true;
        }

        if let SlotState::Hollow(reference) = self.cache.state(position) {
            let holder = self.read_payload(reference)?;
            self.cache
                .fill(position, holder)
                .map_err(|e| StoreFault::Corruption(e.to_string()))?;
            trace!(index = %self.header.name, position, "Reloaded payload");
            missed = true;
        }

        if missed {
            self.cache.record_miss();
        }
        Ok(())
    }

    fn commit(&mut self, sync: bool) -> Result<CommitOutcome, StoreFault> {
        if !self.dirty {
            return Ok(CommitOutcome::NothingToDo);
        }

        if let Some(files) = &self.files {
            if let Some(data) = &files.data {
                if self.header.kind.writes_payload() && sync {
                    data.sync_data()?;
                }
            }
            write_at(&files.index, 0, &self.header.to_region()?)?;
            if sync {
                files.index.sync_data()?;
            }
        }

        self.dirty = false;
        Ok(CommitOutcome::Committed)
    }
}

/// Store for one index
#[derive(Debug)]
pub struct IndexStore {
    spec: IndexSpec,
    uri: String,
    id: IndexId,
    context: StoreContext,
    state: Mutex<StoreState>,
}

impl IndexStore {
    /// Create a new, empty index. The store must be activated before items
    /// can be added.
    pub fn create(spec: IndexSpec, context: StoreContext) -> IndexResult<Self> {
        spec.validate()?;
        if spec.read_only {
            return Err(IndexError::SpecificationInvalid(
                "cannot create a read-only index".into(),
            ));
        }

        let uri = spec.uri();
        let default_type = resolve_default_type(&spec, context.registry.as_ref())?;

        let mut header = IndexHeader::new(spec.name.clone(), spec.kind);
        header.options.description = spec.description.clone();
        header.options.extra = spec.extra.clone();
        if let Some(name) = context.registry.name_of(default_type) {
            header.options.data_types.insert(default_type.0, name);
        }

        let files = match spec.index_file() {
            Some(index_path) => {
                header.options.index_path = Some(index_path.display().to_string());
                header.options.data_path = spec.data_file().map(|p| p.display().to_string());

                Some(
                    create_files(&spec, &index_path, &header)
                        .map_err(|source| IndexError::CreateFailed {
                            uri: uri.clone(),
                            source,
                        })?,
                )
            }
            None => None,
        };

        let mut cache = IndexCache::new(spec.name.clone(), spec.policy.build());
        cache.restore(&header);

        let id = header.id;
        let store = Self::assemble(spec, uri, context, header, cache, files, Vec::new(), default_type);

        info!(index = %store.spec.name, id = %id, kind = %store.spec.kind, "Created index");
        store.emit(IndexEvent::Created {
            id,
            name: store.spec.name.clone(),
        });
        Ok(store)
    }

    /// Open an existing file-backed index
    pub fn open(spec: IndexSpec, context: StoreContext) -> IndexResult<Self> {
        spec.validate()?;
        let uri = spec.uri();

        let Some(index_path) = spec.index_file() else {
            return Err(IndexError::SpecificationInvalid(
                "an in-core index cannot be opened".into(),
            ));
        };

        let opened = open_files(&spec, &index_path).and_then(|(files, header)| {
            let offsets = if header.kind == IndexKind::Inline {
                scan_inline_offsets(&files.index, &header)?
            } else {
                Vec::new()
            };
            Ok((files, header, offsets))
        });
        let (files, header, offsets) = opened.map_err(|source| IndexError::OpenFailed {
            uri: uri.clone(),
            source,
        })?;

        let default_type = resolve_default_type(&spec, context.registry.as_ref())?;
        let mut cache = IndexCache::new(spec.name.clone(), spec.policy.build());
        cache.restore(&header);

        let load_style = spec.load_style;
        let id = header.id;
        let store = Self::assemble(spec, uri, context, header, cache, Some(files), offsets, default_type);

        store.preload(load_style).map_err(|source| IndexError::OpenFailed {
            uri: store.uri.clone(),
            source,
        })?;

        info!(
            index = %store.spec.name,
            id = %id,
            length = store.len(),
            load_style = %load_style,
            "Opened index"
        );
        store.emit(IndexEvent::Opened {
            id,
            name: store.spec.name.clone(),
        });
        Ok(store)
    }

    /// Open `spec`'s index if its file exists, create it otherwise
    pub fn open_or_create(spec: IndexSpec, context: StoreContext) -> IndexResult<Self> {
        match spec.index_file() {
            Some(path) if path.exists() => Self::open(spec, context),
            _ => Self::create(spec, context),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        spec: IndexSpec,
        uri: String,
        context: StoreContext,
        header: IndexHeader,
        cache: IndexCache,
        files: Option<StoreFiles>,
        offsets: Vec<u64>,
        default_type: DataType,
    ) -> Self {
        Self {
            id: header.id,
            spec,
            uri,
            context,
            state: Mutex::new(StoreState {
                header,
                cache,
                files,
                lock: None,
                offsets,
                default_type,
                activated: false,
                closed: false,
                dirty: false,
            }),
        }
    }

    /// Populate the cache according to `style`
    fn preload(&self, style: LoadStyle) -> Result<(), StoreFault> {
        if style == LoadStyle::None {
            return Ok(());
        }

        let mut state = self.state.lock();
        for position in 0..state.header.length {
            let record = state.read_record(position)?;
            let item = item_from_record(&state.header, record)?;
            state
                .cache
                .retrieve(position, item)
                .map_err(|e| StoreFault::Corruption(e.to_string()))?;

            if style == LoadStyle::All {
                if let SlotState::Hollow(reference) = state.cache.state(position) {
                    let holder = state.read_payload(reference)?;
                    state
                        .cache
                        .fill(position, holder)
                        .map_err(|e| StoreFault::Corruption(e.to_string()))?;
                }
                state.cache.preloaded(position);
            }
        }

        state.cache.reset_stats();
        debug!(index = %self.spec.name, items = state.header.length, style = %style, "Preloaded index");
        Ok(())
    }

    fn emit(&self, event: IndexEvent) {
        self.context.events.on_event(&event);
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn kind(&self) -> IndexKind {
        self.state.lock().header.kind
    }

    /// Number of items ever appended
    pub fn len(&self) -> u64 {
        self.state.lock().header.length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the header
    pub fn header(&self) -> IndexHeader {
        self.state.lock().header.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().header.terminated
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_activated(&self) -> bool {
        self.state.lock().activated
    }

    pub fn is_read_only(&self) -> bool {
        self.spec.read_only
    }

    /// Whether data timestamps have never gone backwards
    pub fn in_time_order(&self) -> bool {
        self.state.lock().header.in_time_order
    }

    /// Data type given to items appended without one
    pub fn default_data_type(&self) -> DataType {
        self.state.lock().default_type
    }

    pub fn first(&self, selector: Selector) -> Option<Timestamp> {
        self.state.lock().header.first(selector)
    }

    pub fn last(&self, selector: Selector) -> Option<Timestamp> {
        self.state.lock().header.last(selector)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().cache.stats()
    }

    /// Make the store writable.
    ///
    /// File-backed stores take the exclusive advisory lock on their index
    /// file. Activating an already active store does nothing.
    pub fn activate(&self) -> IndexResult<()> {
        let mut state = self.state.lock();
        let name = &self.spec.name;

        if state.header.terminated {
            return Err(IndexError::Terminated(name.clone()));
        }
        if state.closed {
            return Err(IndexError::Closed(name.clone()));
        }
        if self.spec.read_only {
            return Err(IndexError::ReadOnly(name.clone()));
        }
        if state.activated {
            return Ok(());
        }

        if let Some(files) = &state.files {
            let lock = WriteLock::try_acquire(&files.index_path)
                .map_err(|e| IndexError::OpenFailed {
                    uri: self.uri.clone(),
                    source: e.into(),
                })?
                .ok_or_else(|| IndexError::WriteLocked(name.clone()))?;
            state.lock = Some(lock);
        }

        state.activated = true;
        info!(index = %name, "Activated index");
        Ok(())
    }

    /// Append an item; returns the new length
    pub fn add_item(&self, item: IndexItem) -> IndexResult<u64> {
        self.append(item, None)
    }

    /// Append an item pointing at `position` of another index
    pub fn add_reference(
        &self,
        index_time: Timestamp,
        target: IndexId,
        target_uri: &str,
        position: u64,
    ) -> IndexResult<u64> {
        let item = IndexItem::new(
            index_time,
            Payload::IndexRef(IndexReference {
                index_id: target,
                position,
            }),
        )
        .data_type(DataType::INDEX_REFERENCE);
        self.append(item, Some(target_uri))
    }

    fn append(&self, mut item: IndexItem, target_uri: Option<&str>) -> IndexResult<u64> {
        let mut state = self.state.lock();
        let name = &self.spec.name;

        if state.header.terminated {
            return Err(IndexError::Terminated(name.clone()));
        }
        if state.closed {
            return Err(IndexError::Closed(name.clone()));
        }
        if !state.activated {
            return Err(IndexError::NotActivated(name.clone()));
        }
        // Index time is non-decreasing
        if let Some(last) = state.header.last_time {
            if item.index_timestamp() < last {
                return Err(IndexError::TimestampOutOfBounds(format!(
                    "index time {} is before the last index time {} of {}",
                    item.index_timestamp(),
                    last,
                    name
                )));
            }
        }

        let position = state.header.length;
        let written = write_item(&mut state, &item, target_uri).map_err(|source| {
            IndexError::AddItemFailed {
                index: name.clone(),
                source,
            }
        })?;

        if let (Some(origin), Payload::Resident(holder)) = (written.origin, item.payload_mut()) {
            *holder = holder.clone().with_origin(origin);
        }

        let type_name = self.context.registry.name_of(item.kind());
        let size = item.payload().size();
        let st = &mut *state;
        st.header.record_append(
            item.index_timestamp(),
            item.data_timestamp(),
            size,
            item.kind(),
            type_name.as_deref(),
        );
        st.header.end_offset += written.index_bytes;
        st.header.data_end_offset += written.data_bytes;
        if st.header.kind == IndexKind::Inline {
            if let Some(offset) = written.record_offset {
                st.offsets.push(offset);
            }
        }

        let length = st.cache.add_item(item);
        st.dirty = true;
        drop(state);

        trace!(index = %name, position, "Added item");
        self.emit(IndexEvent::ItemAdded {
            id: self.id,
            position,
        });
        Ok(length)
    }

    /// Item at `position`, loading it from storage if needed
    pub fn get_item(&self, position: u64) -> IndexResult<IndexItem> {
        let mut state = self.state.lock();
        let name = &self.spec.name;

        if state.closed {
            return Err(IndexError::Closed(name.clone()));
        }
        if position >= state.header.length {
            return Err(IndexError::PositionOutOfBounds {
                position,
                length: state.header.length,
            });
        }

        state
            .load(position)
            .map_err(|source| IndexError::GetItemFailed {
                index: name.clone(),
                position,
                source,
            })?;

        let item = state.cache.get_item(position)?.ok_or_else(|| IndexError::GetItemFailed {
            index: name.clone(),
            position,
            source: StoreFault::Corruption("slot empty after load".into()),
        })?;
        drop(state);

        self.emit(IndexEvent::ItemAccessed {
            id: self.id,
            position,
        });
        Ok(item)
    }

    /// Number of reference items per referenced index
    pub fn reference_counts(&self) -> IndexResult<HashMap<IndexId, u64>> {
        let mut counts = HashMap::new();
        for position in 0..self.len() {
            if let Payload::IndexRef(reference) = self.get_item(position)?.payload() {
                *counts.entry(reference.index_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Read payload bytes at `reference` into a fresh holder
    pub fn read_data(&self, reference: DataReference) -> Result<DataHolder, StoreFault> {
        self.state.lock().read_payload(reference)
    }

    /// Resolve `timestamp` to a position, see [`locate`]
    pub fn locate(
        &self,
        timestamp: Timestamp,
        selector: Selector,
        lifetime: Lifetime,
    ) -> IndexResult<Location> {
        let state = self.state.lock();
        let bounds = state.header.first(selector).zip(state.header.last(selector));

        locate(state.header.length, bounds, timestamp, lifetime, |position| {
            state
                .timestamp_at(position, selector)
                .map_err(|source| IndexError::GetItemFailed {
                    index: self.spec.name.clone(),
                    position,
                    source,
                })
        })
    }

    /// True iff `first <= timestamp <= last` under `selector`
    pub fn contains(&self, timestamp: Timestamp, selector: Selector) -> bool {
        let state = self.state.lock();
        match state.header.first(selector).zip(state.header.last(selector)) {
            Some((first, last)) => first <= timestamp && timestamp <= last,
            None => false,
        }
    }

    /// Hollow the item at `position`; returns whether bytes were released
    pub fn hollow(&self, position: u64) -> IndexResult<bool> {
        let mut state = self.state.lock();
        if position >= state.header.length {
            return Err(IndexError::PositionOutOfBounds {
                position,
                length: state.header.length,
            });
        }
        if state.cache.state(position) == SlotState::Missing {
            return Ok(false);
        }
        state.cache.hollow(position)
    }

    /// Hollow every resident item; returns how many were hollowed
    pub fn hollow_all(&self) -> u64 {
        let hollowed = self.state.lock().cache.hollow_all();
        debug!(index = %self.spec.name, hollowed, "Hollowed all items");
        hollowed
    }

    /// Flush pending writes and persist the header
    pub fn commit(&self) -> IndexResult<CommitOutcome> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IndexError::Closed(self.spec.name.clone()));
        }

        let outcome = state
            .commit(self.context.sync_on_commit)
            .map_err(|source| IndexError::CommitFailed {
                index: self.spec.name.clone(),
                source,
            })?;

        if outcome == CommitOutcome::Committed {
            let length = state.header.length;
            drop(state);
            debug!(index = %self.spec.name, length, "Committed index");
            self.emit(IndexEvent::Committed {
                id: self.id,
                name: self.spec.name.clone(),
                length,
            });
        }
        Ok(outcome)
    }

    /// Commit if needed and release files and the write lock.
    ///
    /// Closing a closed store does nothing.
    pub fn close(&self) -> IndexResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }

        let committed = state
            .commit(self.context.sync_on_commit)
            .map_err(|source| IndexError::CloseFailed {
                index: self.spec.name.clone(),
                source,
            })?;

        state.lock = None;
        state.files = None;
        state.activated = false;
        state.closed = true;
        drop(state);

        if committed == CommitOutcome::Committed {
            debug!(index = %self.spec.name, "Committed index on close");
        }
        info!(index = %self.spec.name, "Closed index");
        self.emit(IndexEvent::Closed {
            id: self.id,
            name: self.spec.name.clone(),
        });
        Ok(())
    }

    /// Mark the index permanently read-only and persist the header.
    ///
    /// Terminating twice does nothing.
    pub fn terminate(&self) -> IndexResult<()> {
        let mut state = self.state.lock();
        let name = &self.spec.name;

        if state.header.terminated {
            return Ok(());
        }
        if self.spec.read_only {
            return Err(IndexError::ReadOnly(name.clone()));
        }
        if state.closed {
            return Err(IndexError::Closed(name.clone()));
        }

        state.header.terminated = true;
        state.header.terminated_at = Some(Timestamp::now());
        state.dirty = true;
        state
            .commit(self.context.sync_on_commit)
            .map_err(|source| IndexError::CommitFailed {
                index: name.clone(),
                source,
            })?;

        info!(index = %name, length = state.header.length, "Terminated index");
        Ok(())
    }
}

impl Drop for IndexStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(index = %self.spec.name, error = %e, "Failed to close index on drop");
        }
    }
}

/// Where an append put its bytes
#[derive(Debug, Default)]
struct Written {
    record_offset: Option<u64>,
    /// Storage location of resident payload bytes
    origin: Option<DataReference>,
    index_bytes: u64,
    data_bytes: u64,
}

/// Write the record and payload of `item` at the current end of storage
fn write_item(
    state: &mut StoreState,
    item: &IndexItem,
    target_uri: Option<&str>,
) -> Result<Written, StoreFault> {
    let kind = state.header.kind;

    if let Payload::IndexRef(reference) = item.payload() {
        let options = &state.header.options;
        let known = options.find_reference(reference.index_id);
        let slot = known.unwrap_or_else(|| options.next_reference_slot());

        let written = if kind.is_file_backed() {
            let record = ItemRecord::for_item(item, PayloadKind::IndexRef, slot, reference.position);
            let offset = state.header.end_offset;
            write_at(&state.files()?.index, offset, &record.to_bytes())?;
            Written {
                record_offset: Some(offset),
                index_bytes: RECORD_SIZE as u64,
                ..Written::default()
            }
        } else {
            Written::default()
        };

        // The slot is only claimed once the record is written
        if known.is_none() {
            state
                .header
                .options
                .reference_slot(reference.index_id, target_uri.unwrap_or_default());
        }
        return Ok(written);
    }

    match (kind, item.payload()) {
        (IndexKind::InCore, Payload::Resident(_)) => Ok(Written::default()),

        (IndexKind::Inline, Payload::Resident(holder)) => {
            let record_offset = state.header.end_offset;
            let payload_offset = record_offset + RECORD_SIZE as u64;
            let size = payload_size(holder)?;
            let record = ItemRecord::for_item(item, PayloadKind::Inline, size, payload_offset);

            let mut buf = Vec::with_capacity(RECORD_SIZE + holder.len());
            buf.extend_from_slice(&record.to_bytes());
            buf.extend_from_slice(holder.bytes());
            write_at(&state.files()?.index, record_offset, &buf)?;

            Ok(Written {
                record_offset: Some(record_offset),
                origin: Some(DataReference::new(payload_offset, size)),
                index_bytes: buf.len() as u64,
                data_bytes: 0,
            })
        }

        (IndexKind::External, Payload::Resident(holder)) => {
            let data_offset = state.header.data_end_offset;
            let size = payload_size(holder)?;
            let files = state.files()?;
            write_at(files.payload_file(kind)?, data_offset, holder.bytes())?;

            let record = ItemRecord::for_item(item, PayloadKind::DataFile, size, data_offset);
            let record_offset = state.header.end_offset;
            write_at(&files.index, record_offset, &record.to_bytes())?;

            Ok(Written {
                record_offset: Some(record_offset),
                origin: Some(DataReference::new(data_offset, size)),
                index_bytes: RECORD_SIZE as u64,
                data_bytes: size as u64,
            })
        }

        (IndexKind::External | IndexKind::Shadow, Payload::FileRef(reference)) => {
            let record =
                ItemRecord::for_item(item, PayloadKind::DataFile, reference.size, reference.offset);
            let record_offset = state.header.end_offset;
            write_at(&state.files()?.index, record_offset, &record.to_bytes())?;

            Ok(Written {
                record_offset: Some(record_offset),
                index_bytes: RECORD_SIZE as u64,
                ..Written::default()
            })
        }

        (IndexKind::Shadow, Payload::Resident(_)) => Err(StoreFault::Unsupported(
            "shadow indexes do not store payload bytes".into(),
        )),

        (_, Payload::FileRef(_)) => Err(StoreFault::Unsupported(format!(
            "{} index cannot hold payload references",
            kind
        ))),

        (_, Payload::IndexRef(_)) => Ok(Written::default()),
    }
}

fn payload_size(holder: &DataHolder) -> Result<u32, StoreFault> {
    u32::try_from(holder.len())
        .map_err(|_| StoreFault::Unsupported(format!("payload of {} bytes", holder.len())))
}

fn item_from_record(header: &IndexHeader, record: ItemRecord) -> Result<IndexItem, StoreFault> {
    record.into_item(|slot| {
        header
            .options
            .referenced
            .get(&slot)
            .map(|r| r.id)
            .ok_or_else(|| StoreFault::Corruption(format!("Unknown reference slot {}", slot)))
    })
}

fn resolve_default_type(spec: &IndexSpec, registry: &dyn TypeRegistry) -> IndexResult<DataType> {
    match &spec.data_type {
        Some(name) => registry.resolve_by_name(name).ok_or_else(|| {
            IndexError::SpecificationInvalid(format!("unknown data type '{}'", name))
        }),
        None => Ok(DataType::default()),
    }
}

fn create_files(spec: &IndexSpec, index_path: &Path, header: &IndexHeader) -> Result<StoreFiles, StoreFault> {
    if let Some(parent) = index_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let index = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(index_path)?;
    write_at(&index, 0, &header.to_region()?)?;
    index.sync_data()?;

    let data = match (spec.kind, spec.data_file()) {
        (IndexKind::External, Some(path)) => Some(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)?,
        ),
        (IndexKind::Shadow, Some(path)) => Some(File::open(path)?),
        _ => None,
    };

    Ok(StoreFiles {
        index,
        index_path: index_path.to_path_buf(),
        data,
    })
}

fn open_files(spec: &IndexSpec, index_path: &Path) -> Result<(StoreFiles, IndexHeader), StoreFault> {
    let index = OpenOptions::new()
        .read(true)
        .write(!spec.read_only)
        .open(index_path)?;

    let mut region = vec![0u8; HEADER_REGION as usize];
    read_at(&index, 0, &mut region)?;
    let header = IndexHeader::from_region(&region)?;

    if header.kind != spec.kind {
        debug!(index = %spec.name, stored = %header.kind, "Using index kind from header");
    }

    let file_len = index.metadata()?.len();
    if file_len < header.end_offset {
        return Err(StoreFault::Corruption(format!(
            "Index file is {} bytes, header expects {}",
            file_len, header.end_offset
        )));
    }
    if file_len > header.end_offset {
        warn!(
            index = %spec.name,
            ignored = file_len - header.end_offset,
            "Ignoring bytes past the committed end of the index"
        );
    }

    let data_path = spec
        .data_path
        .clone()
        .or_else(|| header.options.data_path.as_ref().map(PathBuf::from))
        .or_else(|| spec.data_file());

    let data = match (header.kind, data_path) {
        (IndexKind::External, Some(path)) => Some(
            OpenOptions::new()
                .read(true)
                .write(!spec.read_only)
                .open(path)?,
        ),
        (IndexKind::Shadow, Some(path)) => Some(File::open(path)?),
        (IndexKind::External | IndexKind::Shadow, None) => {
            return Err(StoreFault::Unsupported(format!(
                "{} index has no data file path",
                header.kind
            )))
        }
        _ => None,
    };

    Ok((
        StoreFiles {
            index,
            index_path: index_path.to_path_buf(),
            data,
        },
        header,
    ))
}

/// Walk the records of an inline index, returning each record's offset
fn scan_inline_offsets(index: &File, header: &IndexHeader) -> Result<Vec<u64>, StoreFault> {
    let mut offsets = Vec::with_capacity(header.length as usize);
    let mut offset = header.first_offset;
    let mut buf = [0u8; RECORD_SIZE];

    for _ in 0..header.length {
        read_at(index, offset, &mut buf)?;
        let record = ItemRecord::from_bytes(&buf)?;
        offsets.push(offset);
        offset += RECORD_SIZE as u64 + record.inline_len();
    }

    if offset != header.end_offset {
        return Err(StoreFault::Corruption(format!(
            "Records end at {}, header says {}",
            offset, header.end_offset
        )));
    }
    Ok(offsets)
}

fn write_at(mut file: &File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

fn read_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}
