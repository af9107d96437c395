//! Generation-tracked, append-only storage for small `u32` arrays.
//!
//! Arrays live in buffers of atomic words and are addressed by an [`EntryRef`]
//! (buffer id + offset). An array is written once, before its handle is
//! published with release semantics, and is never changed afterwards except
//! for single elements stored with release semantics (level arrays hold link
//! array handles that get replaced this way).
//!
//! Removing an array only puts it on hold. Held arrays are tagged with a
//! generation by [`ArrayStore::assign_generation`] and become reusable once
//! [`ArrayStore::reclaim_memory`] is told that no reader can still observe that
//! generation. Compaction evacuates the most fragmented buffers; a buffer is
//! dropped from the directory once everything in it has been reclaimed.
//!
//! Readers load the buffer directory through [`ArcSwap`], so a stale handle can
//! at worst observe stale data, never freed memory.

use crate::config;
use crate::generation::Generation;
use crate::hnsw::compaction::CompactionStrategy;
use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const OFFSET_BITS: u32 = 20;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;
const WORD_BYTES: usize = std::mem::size_of::<u32>();

/// Arena-relative handle to an array. `EntryRef::INVALID` means "no array".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EntryRef(u32);

impl EntryRef {
    pub const INVALID: EntryRef = EntryRef(0);

    fn new(buffer_id: u32, offset: u32) -> Self {
        debug_assert!(offset <= OFFSET_MASK);
        debug_assert!((buffer_id as usize) < config::ARRAY_STORE_MAX_BUFFERS);
        EntryRef((buffer_id << OFFSET_BITS) | offset)
    }

    pub fn from_raw(raw: u32) -> Self {
        EntryRef(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn valid(self) -> bool {
        self.0 != 0
    }

    pub fn buffer_id(self) -> u32 {
        self.0 >> OFFSET_BITS
    }

    pub fn offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }
}

/// An [`EntryRef`] slot published with release/acquire semantics.
#[derive(Debug, Default)]
pub struct AtomicEntryRef(AtomicU32);

impl AtomicEntryRef {
    #[inline]
    pub fn load_acquire(&self) -> EntryRef {
        EntryRef(self.0.load(Ordering::Acquire))
    }

    /// Only for the writer thread, which never races with itself.
    #[inline]
    pub fn load_relaxed(&self) -> EntryRef {
        EntryRef(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store_release(&self, entry: EntryRef) {
        self.0.store(entry.0, Ordering::Release);
    }
}

#[derive(Debug)]
struct Buffer {
    words: Box<[AtomicU32]>,
}

impl Buffer {
    fn new(capacity: u32) -> Self {
        Self {
            words: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

type BufferDirectory = Vec<Option<Arc<Buffer>>>;

/// Read view of one array. Keeps the buffer directory it was resolved
/// against alive for as long as the view exists.
pub struct ArrayRef {
    buffers: Guard<Arc<BufferDirectory>>,
    buffer_id: usize,
    start: usize,
    len: usize,
}

impl ArrayRef {
    fn new(buffers: Guard<Arc<BufferDirectory>>, entry: EntryRef) -> Self {
        let buffer_id = entry.buffer_id() as usize;
        let mut start = 0;
        let mut len = 0;
        if entry.valid() {
            if let Some(Some(buffer)) = buffers.get(buffer_id) {
                let offset = entry.offset() as usize;
                if offset < buffer.words.len() {
                    let stored = buffer.words[offset].load(Ordering::Relaxed) as usize;
                    start = offset + 1;
                    len = stored.min(buffer.words.len() - start);
                }
            }
        }
        Self {
            buffers,
            buffer_id,
            start,
            len,
        }
    }

    fn words(&self) -> &[AtomicU32] {
        if self.len == 0 {
            return &[];
        }
        match self.buffers.get(self.buffer_id) {
            Some(Some(buffer)) => &buffer.words[self.start..self.start + self.len],
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element `index`, for arrays whose elements are plain values.
    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        self.words()[index].load(Ordering::Relaxed)
    }

    /// Element `index`, for arrays whose elements are handles published
    /// with [`ArrayStore::set_element_release`].
    #[inline]
    pub fn load_acquire(&self, index: usize) -> u32 {
        self.words()[index].load(Ordering::Acquire)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words().iter().map(|w| w.load(Ordering::Relaxed))
    }

    pub fn contains(&self, value: u32) -> bool {
        self.iter().any(|v| v == value)
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

impl std::fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Memory accounting of an arena, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub allocated_bytes: usize,
    pub used_bytes: usize,
    pub dead_bytes: usize,
    pub on_hold_bytes: usize,
}

impl MemoryUsage {
    pub fn merge(&mut self, other: &MemoryUsage) {
        self.allocated_bytes += other.allocated_bytes;
        self.used_bytes += other.used_bytes;
        self.dead_bytes += other.dead_bytes;
        self.on_hold_bytes += other.on_hold_bytes;
    }
}

/// Address space accounting of an arena, counted in arrays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AddressSpace {
    pub used: usize,
    pub dead: usize,
    pub limit: usize,
}

/// Buffers selected for evacuation by one compaction pass.
#[derive(Debug, Default)]
pub struct CompactingBuffers {
    buffer_ids: HashSet<u32>,
}

impl CompactingBuffers {
    /// True if `entry` lives in a buffer being evacuated.
    pub fn contains(&self, entry: EntryRef) -> bool {
        entry.valid() && self.buffer_ids.contains(&entry.buffer_id())
    }

    pub fn len(&self) -> usize {
        self.buffer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferState {
    capacity: u32,
    /// Words handed out, including the reserved word of buffer 0.
    used: u32,
    /// Words reclaimed, including the reserved word of buffer 0.
    dead: u32,
    /// Words removed but not yet reclaimed.
    hold: u32,
    reserved: u32,
    used_arrays: u32,
    dead_arrays: u32,
    compacting: bool,
}

impl BufferState {
    fn dead_array_words(&self) -> u32 {
        self.dead - self.reserved
    }
}

#[derive(Debug)]
struct HeldArray {
    entry: EntryRef,
    words: u32,
    generation: Generation,
}

#[derive(Debug, Default)]
struct StoreWriter {
    states: Vec<Option<BufferState>>,
    active: Option<u32>,
    next_capacity: u32,
    /// Reclaimed arrays keyed by size in words (length word included).
    free_lists: HashMap<u32, Vec<EntryRef>>,
    pending_hold: Vec<(EntryRef, u32)>,
    hold: VecDeque<HeldArray>,
}

impl StoreWriter {
    fn state_mut(&mut self, buffer_id: u32) -> &mut BufferState {
        self.states[buffer_id as usize]
            .as_mut()
            .expect("live entry refers to an open buffer")
    }
}

/// Append-only arena of `u32` arrays with deferred reclamation.
///
/// All mutating methods belong to the single writer thread; [`get`](Self::get)
/// may be called from any thread.
pub struct ArrayStore {
    name: &'static str,
    buffers: ArcSwap<BufferDirectory>,
    writer: Mutex<StoreWriter>,
}

impl ArrayStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            buffers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(StoreWriter {
                next_capacity: config::ARRAY_STORE_INITIAL_BUFFER_WORDS,
                ..Default::default()
            }),
        }
    }

    /// Resolve a handle. Invalid or unknown handles give an empty array.
    pub fn get(&self, entry: EntryRef) -> ArrayRef {
        ArrayRef::new(self.buffers.load(), entry)
    }

    /// Store a copy of `elems` and return its handle. The handle is not
    /// visible to readers until the caller publishes it.
    pub fn add(&self, elems: &[u32]) -> EntryRef {
        if elems.is_empty() {
            return EntryRef::INVALID;
        }
        let words = elems.len() as u32 + 1;
        let entry = {
            let mut writer = self.writer.lock();
            self.alloc(&mut writer, words)
        };
        let buffers = self.buffers.load();
        let buffer = buffers[entry.buffer_id() as usize]
            .as_ref()
            .expect("allocated buffer is in the directory");
        let base = entry.offset() as usize;
        buffer.words[base].store(elems.len() as u32, Ordering::Relaxed);
        for (slot, &value) in buffer.words[base + 1..base + 1 + elems.len()]
            .iter()
            .zip(elems)
        {
            slot.store(value, Ordering::Relaxed);
        }
        entry
    }

    /// Replace element `index` of an array, publishing with release semantics.
    pub fn set_element_release(&self, entry: EntryRef, index: usize, value: u32) {
        let array = self.get(entry);
        assert!(
            index < array.len(),
            "{}: element {index} out of range for array of {}",
            self.name,
            array.len()
        );
        array.words()[index].store(value, Ordering::Release);
    }

    /// Retire an array. Its storage is reused only after reclamation.
    pub fn remove(&self, entry: EntryRef) {
        if !entry.valid() {
            return;
        }
        let words = self.get(entry).len() as u32 + 1;
        let mut writer = self.writer.lock();
        writer.state_mut(entry.buffer_id()).hold += words;
        writer.pending_hold.push((entry, words));
    }

    /// Tag everything retired since the previous call with `current_gen`.
    pub fn assign_generation(&self, current_gen: Generation) {
        let mut guard = self.writer.lock();
        let writer = &mut *guard;
        for (entry, words) in writer.pending_hold.drain(..) {
            writer.hold.push_back(HeldArray {
                entry,
                words,
                generation: current_gen,
            });
        }
    }

    /// Reclaim arrays retired before `oldest_used_gen`.
    pub fn reclaim_memory(&self, oldest_used_gen: Generation) {
        let mut guard = self.writer.lock();
        let writer = &mut *guard;
        while writer
            .hold
            .front()
            .is_some_and(|held| held.generation < oldest_used_gen)
        {
            let Some(held) = writer.hold.pop_front() else {
                break;
            };
            let state = writer.state_mut(held.entry.buffer_id());
            state.hold -= held.words;
            state.dead += held.words;
            state.dead_arrays += 1;
            if !state.compacting {
                writer
                    .free_lists
                    .entry(held.words)
                    .or_default()
                    .push(held.entry);
            }
        }
        self.free_drained_buffers(writer);
    }

    fn alloc(&self, writer: &mut StoreWriter, words: u32) -> EntryRef {
        if let Some(entry) = writer.free_lists.get_mut(&words).and_then(Vec::pop) {
            let state = writer.state_mut(entry.buffer_id());
            state.dead -= words;
            state.dead_arrays -= 1;
            return entry;
        }
        let fits = writer.active.filter(|&id| {
            writer.states[id as usize]
                .as_ref()
                .is_some_and(|s| s.capacity - s.used >= words)
        });
        let buffer_id = match fits {
            Some(id) => id,
            None => self.open_buffer(writer, words),
        };
        let state = writer.state_mut(buffer_id);
        let offset = state.used;
        state.used += words;
        state.used_arrays += 1;
        EntryRef::new(buffer_id, offset)
    }

    fn open_buffer(&self, writer: &mut StoreWriter, min_words: u32) -> u32 {
        assert!(
            min_words < config::ARRAY_STORE_MAX_BUFFER_WORDS,
            "{}: array of {min_words} words does not fit in a buffer",
            self.name
        );
        let capacity = writer.next_capacity.max(min_words + 1);
        writer.next_capacity = writer
            .next_capacity
            .saturating_mul(2)
            .min(config::ARRAY_STORE_MAX_BUFFER_WORDS);

        let buffer_id = match writer.states.iter().position(Option::is_none) {
            Some(id) => id,
            None => {
                assert!(
                    writer.states.len() < config::ARRAY_STORE_MAX_BUFFERS,
                    "{}: array store address space exhausted",
                    self.name
                );
                writer.states.push(None);
                writer.states.len() - 1
            }
        };
        // Offset 0 of buffer 0 would alias EntryRef::INVALID
        let reserved = u32::from(buffer_id == 0);
        writer.states[buffer_id] = Some(BufferState {
            capacity,
            used: reserved,
            dead: reserved,
            reserved,
            ..Default::default()
        });
        writer.active = Some(buffer_id as u32);

        let mut directory: BufferDirectory = (**self.buffers.load()).clone();
        if directory.len() <= buffer_id {
            directory.resize(buffer_id + 1, None);
        }
        directory[buffer_id] = Some(Arc::new(Buffer::new(capacity)));
        self.buffers.store(Arc::new(directory));
        tracing::debug!(
            store = self.name,
            buffer_id,
            capacity,
            "opened array store buffer"
        );
        buffer_id as u32
    }

    fn free_drained_buffers(&self, writer: &mut StoreWriter) {
        let drained: Vec<usize> = writer
            .states
            .iter()
            .enumerate()
            .filter_map(|(id, state)| match state {
                Some(s) if s.compacting && s.hold == 0 && s.dead == s.used => Some(id),
                _ => None,
            })
            .collect();
        if drained.is_empty() {
            return;
        }
        let mut directory: BufferDirectory = (**self.buffers.load()).clone();
        for id in drained {
            writer.states[id] = None;
            directory[id] = None;
            tracing::debug!(store = self.name, buffer_id = id, "freed compacted buffer");
        }
        self.buffers.store(Arc::new(directory));
    }

    /// Select the most fragmented buffers and stop allocating from them.
    /// Live arrays in them must then be moved with
    /// [`move_on_compact`](Self::move_on_compact).
    pub fn start_compact_worst_buffers(&self, strategy: &CompactionStrategy) -> CompactingBuffers {
        let mut guard = self.writer.lock();
        let writer = &mut *guard;
        let open = writer.states.iter().flatten().count();
        let max_buffers = ((open as f64 * strategy.active_buffers_ratio).ceil() as usize).max(1);

        let mut worst: Vec<(u32, f64)> = writer
            .states
            .iter()
            .enumerate()
            .filter_map(|(id, state)| {
                let s = state.as_ref()?;
                (!s.compacting && s.dead_array_words() > 0)
                    .then(|| (id as u32, s.dead as f64 / s.used as f64))
            })
            .collect();
        worst.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        worst.truncate(max_buffers);

        let buffer_ids: HashSet<u32> = worst.iter().map(|&(id, _)| id).collect();
        for &id in &buffer_ids {
            writer.state_mut(id).compacting = true;
            if writer.active == Some(id) {
                writer.active = None;
            }
        }
        for list in writer.free_lists.values_mut() {
            list.retain(|entry| !buffer_ids.contains(&entry.buffer_id()));
        }
        if !buffer_ids.is_empty() {
            tracing::debug!(
                store = self.name,
                buffers = buffer_ids.len(),
                "compacting worst buffers"
            );
        }
        CompactingBuffers { buffer_ids }
    }

    /// Copy an array out of a compacting buffer and retire the original.
    pub fn move_on_compact(&self, entry: EntryRef) -> EntryRef {
        let elems = self.get(entry).to_vec();
        let moved = self.add(&elems);
        self.remove(entry);
        moved
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let writer = self.writer.lock();
        let mut usage = MemoryUsage::default();
        for state in writer.states.iter().flatten() {
            usage.allocated_bytes += state.capacity as usize * WORD_BYTES;
            usage.used_bytes += state.used as usize * WORD_BYTES;
            usage.dead_bytes += state.dead_array_words() as usize * WORD_BYTES;
            usage.on_hold_bytes += state.hold as usize * WORD_BYTES;
        }
        usage
    }

    pub fn address_space(&self) -> AddressSpace {
        let writer = self.writer.lock();
        let mut space = AddressSpace {
            limit: config::ARRAY_STORE_MAX_BUFFERS * config::ARRAY_STORE_MAX_BUFFER_WORDS as usize
                / 2,
            ..Default::default()
        };
        for state in writer.states.iter().flatten() {
            space.used += state.used_arrays as usize;
            space.dead += state.dead_arrays as usize;
        }
        space
    }

    /// Number of buffers currently in the directory.
    pub fn buffer_count(&self) -> usize {
        self.buffers.load().iter().flatten().count()
    }
}

impl std::fmt::Debug for ArrayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStore")
            .field("name", &self.name)
            .field("buffers", &self.buffer_count())
            .field("memory_usage", &self.memory_usage())
            .finish()
    }
}
