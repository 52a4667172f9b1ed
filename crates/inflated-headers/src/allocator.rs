//! Chunked slot allocator for inflated headers.
//!
//! Slots live in fixed-capacity chunks that are appended to a chunk directory
//! and never removed or moved, so a slot reference stays valid for the
//! allocator's lifetime no matter how many chunks are added later. A slot is
//! addressed by a 32-bit [`SlotIndex`]:
//!
//! ```text
//! index = chunk_number * chunk_capacity + offset
//! ```
//!
//! # Allocation order
//!
//! 1. Pop the free chain (rebuilt by every reclamation pass).
//! 2. Take the next never-issued slot of the newest chunk.
//! 3. Append a chunk and issue its first slot.
//!
//! Appending more chunks than the configured budget, or getting within one
//! chunk of the index ceiling, raises `needs_collection`. The index is handed
//! out regardless; the caller is never blocked on a collection.

use std::fmt;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::config::HeaderConfig;
use crate::header::InflatedHeader;

type Chunk = Box<[InflatedHeader]>;

/// Index of a slot in the inflated header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(u32);

impl SlotIndex {
    /// Wrap a raw index, e.g. one read back from an inline header.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw index stored in the inline header.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of [`ChunkedAllocator::allocate_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedIndex {
    /// The issued slot. Always usable.
    pub index: SlotIndex,
    /// The table grew past its budget and a full collection should be
    /// scheduled.
    pub needs_collection: bool,
}

struct FreeState {
    /// Free chain. Popped from the back.
    free: Vec<u32>,
    /// Next index never issued since the last rebuild.
    next_fresh: u64,
    /// Total slots across all chunks.
    capacity: u64,
    in_use: usize,
    /// Chunks appended since the last reclamation or collection signal.
    chunks_since_signal: usize,
}

/// Growable table of inflated header slots.
///
/// One instance is constructed by its owner and shared by reference; there is
/// no process-wide table.
pub struct ChunkedAllocator {
    config: HeaderConfig,
    chunks: RwLock<Vec<Chunk>>,
    state: Mutex<FreeState>,
}

impl ChunkedAllocator {
    /// Create an empty allocator. No chunk is allocated until the first slot
    /// is requested.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid (see [`HeaderConfig::validate`]).
    #[must_use]
    pub fn new(config: HeaderConfig) -> Self {
        config.validate();
        Self {
            config,
            chunks: RwLock::new(Vec::new()),
            state: Mutex::new(FreeState {
                free: Vec::new(),
                next_fresh: 0,
                capacity: 0,
                in_use: 0,
                chunks_since_signal: 0,
            }),
        }
    }

    /// The configuration this allocator was built with.
    #[must_use]
    pub const fn config(&self) -> &HeaderConfig {
        &self.config
    }

    /// Issue a slot index.
    ///
    /// # Panics
    ///
    /// Panics if the free chain is empty and the next fresh index would reach
    /// `max_slots`. The inline header cannot address such a slot, so this is
    /// not recoverable. Allocator state is left untouched.
    pub fn allocate_index(&self) -> AllocatedIndex {
        let mut state = self.state.lock();

        if let Some(raw) = state.free.pop() {
            state.in_use += 1;
            return AllocatedIndex {
                index: SlotIndex(raw),
                needs_collection: false,
            };
        }

        let index = state.next_fresh;
        if index >= self.config.max_slots {
            index_space_exhausted(index, self.config.max_slots);
        }

        let needs_collection = if index == state.capacity {
            self.append_chunk(&mut state)
        } else {
            false
        };

        state.next_fresh = index + 1;
        state.in_use += 1;

        // `max_slots` never exceeds 2^32, so the index fits.
        #[allow(clippy::cast_possible_truncation)]
        let index = SlotIndex(index as u32);
        AllocatedIndex {
            index,
            needs_collection,
        }
    }

    /// Append a chunk and report whether a collection should be requested.
    fn append_chunk(&self, state: &mut FreeState) -> bool {
        let chunk: Chunk = (0..self.config.chunk_capacity)
            .map(|_| InflatedHeader::new())
            .collect();
        self.chunks.write().push(chunk);

        state.capacity += self.config.chunk_capacity as u64;
        state.chunks_since_signal += 1;

        let headroom = self.config.max_slots.saturating_sub(state.capacity);
        let over_budget = state.chunks_since_signal > self.config.chunks_per_collection;
        if over_budget || headroom < self.config.chunk_capacity as u64 {
            state.chunks_since_signal = 0;
            true
        } else {
            false
        }
    }

    /// Look up an issued slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` lies outside every chunk, which cannot happen for an
    /// index returned by this allocator.
    #[must_use]
    pub fn from_index(&self, index: SlotIndex) -> &InflatedHeader {
        self.get(index)
            .unwrap_or_else(|| panic!("slot index {index} lies outside every chunk"))
    }

    /// Look up a slot, returning `None` if `index` lies outside every chunk.
    #[must_use]
    pub fn get(&self, index: SlotIndex) -> Option<&InflatedHeader> {
        let chunk_number = index.as_usize() / self.config.chunk_capacity;
        let offset = index.as_usize() % self.config.chunk_capacity;

        let chunks = self.chunks.read();
        let slot: *const InflatedHeader = chunks.get(chunk_number)?.get(offset)?;
        // SAFETY: Chunks are boxed slices that are never removed, replaced or
        // resized while `self` is alive. Growing the directory only moves the
        // boxes, not the slots they own.
        Some(unsafe { &*slot })
    }

    /// Lock the allocator for a reclamation pass.
    ///
    /// Allocation blocks until the returned scope is dropped.
    pub fn reclaim_scope(&self) -> ReclaimScope<'_> {
        let state = self.state.lock();
        let chunks = self.chunks.read();
        ReclaimScope {
            config: &self.config,
            state,
            chunks,
        }
    }

    /// Rebuild the free chain over every clear slot.
    ///
    /// `chunk_liveness[n]` tells whether chunk `n` kept at least one live
    /// slot. See [`ReclaimScope::rebuild_freelist`].
    ///
    /// # Panics
    ///
    /// Panics if `chunk_liveness` does not have one entry per chunk.
    pub fn rebuild_freelist(&self, chunk_liveness: &[bool]) {
        self.reclaim_scope().rebuild_freelist(chunk_liveness);
    }

    /// Number of slots handed out and not reclaimed.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Number of slots waiting on the free chain.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Number of chunks appended so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Total slots across all chunks.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.state.lock().capacity
    }
}

impl fmt::Debug for ChunkedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChunkedAllocator")
            .field("config", &self.config)
            .field("capacity", &state.capacity)
            .field("in_use", &state.in_use)
            .field("free", &state.free.len())
            .finish_non_exhaustive()
    }
}

/// Exclusive view of the allocator held for one reclamation pass.
pub struct ReclaimScope<'a> {
    config: &'a HeaderConfig,
    state: MutexGuard<'a, FreeState>,
    chunks: RwLockReadGuard<'a, Vec<Chunk>>,
}

impl ReclaimScope<'_> {
    /// Every chunk, in index order.
    pub fn chunks(&self) -> impl ExactSizeIterator<Item = &[InflatedHeader]> + '_ {
        self.chunks.iter().map(|chunk| &**chunk)
    }

    /// Slots in use when the scope was taken, until the chain is rebuilt.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.in_use
    }

    /// Rebuild the free chain over every clear slot below the index ceiling,
    /// and reset the in-use count to the number of slots that are not clear.
    ///
    /// Slots still carrying an owner, payload or mark are never chained,
    /// whatever `chunk_liveness` says; the flags only order the chain.
    /// Holes in chunks that kept live slots are handed out before slots of
    /// fully empty chunks, lowest index first.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_liveness` does not have one entry per chunk.
    pub fn rebuild_freelist(&mut self, chunk_liveness: &[bool]) {
        assert_eq!(
            chunk_liveness.len(),
            self.chunks.len(),
            "chunk liveness must cover every chunk"
        );

        let chunk_capacity = self.config.chunk_capacity as u64;
        let max_slots = self.config.max_slots;
        let state = &mut *self.state;
        state.free.clear();
        let mut live = 0;

        // The chain pops from the back: push empty chunks first.
        for keep_first in [false, true] {
            for (n, chunk) in self.chunks.iter().enumerate().rev() {
                if chunk_liveness[n] != keep_first {
                    continue;
                }
                let base = n as u64 * chunk_capacity;
                for (offset, slot) in chunk.iter().enumerate().rev() {
                    let index = base + offset as u64;
                    if !slot.is_clear() {
                        live += 1;
                    } else if index < max_slots {
                        #[allow(clippy::cast_possible_truncation)]
                        state.free.push(index as u32);
                    }
                }
            }
        }

        state.in_use = live;
        state.next_fresh = state.capacity;
        state.chunks_since_signal = 0;
    }
}

#[cold]
#[inline(never)]
fn index_space_exhausted(index: u64, max_slots: u64) -> ! {
    crate::tracing::internal::log_index_space_exhausted(index, max_slots);
    panic!(
        "inflated header table exhausted: index {index} reaches the ceiling of \
         {max_slots} slots an inline header can address"
    );
}
