//! The inflated header registry.
//!
//! [`InflatedHeaders`] sits between the object-header inflation path and the
//! collector. It hands out slots from its [`ChunkedAllocator`], forwards
//! capacity pressure to a [`CollectionScheduler`], and runs the reclamation
//! pass at the end of every full collection.

use std::mem::size_of;
use std::sync::atomic::{fence, Ordering};

use crate::allocator::{AllocatedIndex, ChunkedAllocator, SlotIndex};
use crate::collector::{CollectionRequests, CollectionScheduler, HeaderMetrics, HEADERS_REASON};
use crate::config::HeaderConfig;
use crate::diagnostics::Diagnostics;
use crate::header::{InflatedHeader, MarkStamp, ObjectId};
use crate::safepoint::StoppedWorld;

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Slots stamped by the trace.
    pub live: usize,
    /// Slots that were in use before the pass and are free after it.
    pub reclaimed: usize,
    /// Chunks scanned.
    pub chunks: usize,
    /// Chunks left without a single live slot.
    pub empty_chunks: usize,
}

/// Side table of inflated object headers.
///
/// # Example
///
/// ```
/// use inflated_headers::{HeaderConfig, InflatedHeaders, MarkStamp, ObjectId};
///
/// let headers = InflatedHeaders::with_request_queue(HeaderConfig::default());
/// let (header, index) = headers.allocate(ObjectId::new(7).unwrap());
/// assert_eq!(header.owner(), ObjectId::new(7));
///
/// // The collector's trace stamps reachable headers...
/// let mark = MarkStamp::FIRST;
/// headers.from_index(index).mark(mark);
///
/// // ...and the epilogue frees everything else.
/// let stats = headers.deallocate_headers(mark);
/// assert_eq!(stats.live, 1);
/// assert_eq!(headers.diagnostics().snapshot().objects, 1);
/// ```
#[derive(Debug)]
pub struct InflatedHeaders<S = CollectionRequests> {
    allocator: ChunkedAllocator,
    scheduler: S,
    diagnostics: Diagnostics,
    metrics: HeaderMetrics,
}

impl InflatedHeaders<CollectionRequests> {
    /// Create a table that queues its collection requests in a
    /// [`CollectionRequests`] mailbox, reachable through
    /// [`scheduler`](Self::scheduler).
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn with_request_queue(config: HeaderConfig) -> Self {
        Self::new(config, CollectionRequests::new())
    }
}

impl<S: CollectionScheduler> InflatedHeaders<S> {
    /// Create an empty table.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn new(config: HeaderConfig, scheduler: S) -> Self {
        Self::with_allocator(ChunkedAllocator::new(config), scheduler)
    }

    /// Wrap an existing allocator.
    #[must_use]
    pub fn with_allocator(allocator: ChunkedAllocator, scheduler: S) -> Self {
        Self {
            allocator,
            scheduler,
            diagnostics: Diagnostics::new(),
            metrics: HeaderMetrics::default(),
        }
    }

    /// Hand out a slot for `owner`.
    ///
    /// The returned index is what the caller installs in the object's inline
    /// header. The slot is fully initialised before it is returned, so any
    /// thread that later reads the index sees a complete record.
    ///
    /// When the table has grown past its budget a full collection is
    /// requested; the slot is handed out without waiting for it.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit index space is exhausted.
    pub fn allocate(&self, owner: ObjectId) -> (&InflatedHeader, SlotIndex) {
        let AllocatedIndex {
            index,
            needs_collection,
        } = self.allocator.allocate_index();
        let header = self.allocator.from_index(index);

        if needs_collection {
            self.diagnostics.record_collection_request();
            self.scheduler.schedule_full_collection(HEADERS_REASON, &self.metrics.headers_set);
        }

        header.set_owner(owner);
        fence(Ordering::SeqCst);
        (header, index)
    }

    /// Resolve an index read from an inline header.
    ///
    /// # Panics
    ///
    /// Panics if `index` lies outside every chunk of this table.
    #[must_use]
    pub fn from_index(&self, index: SlotIndex) -> &InflatedHeader {
        self.allocator.from_index(index)
    }

    /// Resolve an index, returning `None` if it lies outside every chunk.
    #[must_use]
    pub fn get(&self, index: SlotIndex) -> Option<&InflatedHeader> {
        self.allocator.get(index)
    }

    /// Reclaim every slot not stamped with `mark`.
    ///
    /// Called once per full collection, after the trace, while no mutator is
    /// allocating. Allocation calls that do race it block until it returns.
    pub fn deallocate_headers(&self, mark: MarkStamp) -> ReclaimStats {
        let _span = crate::tracing::internal::span_reclaim(mark);

        let mut scope = self.allocator.reclaim_scope();
        let in_use_before = scope.in_use();
        let mut chunk_liveness = Vec::with_capacity(scope.chunks().len());
        let mut live = 0;

        for chunk in scope.chunks() {
            let mut chunk_live = false;
            for header in chunk {
                if header.marked_p(mark) {
                    chunk_live = true;
                    live += 1;
                } else {
                    header.clear();
                }
            }
            chunk_liveness.push(chunk_live);
        }

        scope.rebuild_freelist(&chunk_liveness);
        drop(scope);

        self.diagnostics.record_reclaim(live, size_of::<InflatedHeader>());

        let stats = ReclaimStats {
            live,
            reclaimed: in_use_before.saturating_sub(live),
            chunks: chunk_liveness.len(),
            empty_chunks: chunk_liveness.iter().filter(|live| !**live).count(),
        };
        crate::tracing::internal::log_reclaim(&stats);
        stats
    }

    /// Run [`deallocate_headers`](Self::deallocate_headers) while the world
    /// is stopped.
    pub fn collect_at_safepoint(
        &self,
        _world: &StoppedWorld<'_>,
        mark: MarkStamp,
    ) -> ReclaimStats {
        self.deallocate_headers(mark)
    }

    /// Slots handed out and not reclaimed.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.allocator.in_use()
    }

    /// The underlying allocator.
    #[must_use]
    pub const fn allocator(&self) -> &ChunkedAllocator {
        &self.allocator
    }

    /// The scheduler collection requests go to.
    #[must_use]
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Diagnostics counters for the telemetry reporter.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Counters bumped on behalf of the collector.
    #[must_use]
    pub const fn metrics(&self) -> &HeaderMetrics {
        &self.metrics
    }
}
