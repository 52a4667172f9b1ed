//! A side table of inflated object headers for a tracing garbage collector.
//!
//! Most heap objects get by with a single inline header word. When an object
//! needs a monitor, or an identity hash too large for the inline bits, its
//! header is *inflated*: the inline word is replaced by a 32-bit index into
//! this table.
//!
//! `inflated-headers` provides:
//!
//! - **[`InflatedHeader`]**: one slot record holding monitor state, a cached
//!   identity hash, or forwarding data, plus the collector's mark stamp
//! - **[`ChunkedAllocator`]**: O(1) slot allocation from fixed-size chunks
//!   that never move, so indices and references stay stable while the table
//!   grows
//! - **[`InflatedHeaders`]**: the registry that forwards capacity pressure to
//!   the collector and reclaims unmarked slots at the end of each full
//!   collection
//! - **[`Diagnostics`]**: counters that are only logged when they change
//!
//! # Quick Start
//!
//! ```
//! use inflated_headers::{HeaderConfig, InflatedHeaders, MarkClock, ObjectId, ThreadToken};
//!
//! let headers = InflatedHeaders::with_request_queue(HeaderConfig::default());
//! let clock = MarkClock::new();
//!
//! // Inflate the header of object 42 to lock it.
//! let (header, index) = headers.allocate(ObjectId::new(42).unwrap());
//! header.lock(ThreadToken(1));
//! let inline_word = index.get();
//!
//! // Full collection: the trace stamps the slot, the epilogue reclaims.
//! let mark = clock.advance();
//! headers.from_index(inflated_headers::SlotIndex::new(inline_word)).mark(mark);
//! let stats = headers.deallocate_headers(mark);
//! assert_eq!(stats.live, 1);
//! ```
//!
//! # Thread Safety
//!
//! Allocation may be called from many threads at once. Reclamation must only
//! run while mutators are parked; [`Safepoint`] provides that barrier.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod allocator;
mod collector;
mod config;
mod diagnostics;
mod header;
mod registry;
mod safepoint;
mod tracing;

pub use allocator::{AllocatedIndex, ChunkedAllocator, ReclaimScope, SlotIndex};
pub use collector::{
    CollectionRequest, CollectionRequests, CollectionScheduler, HeaderMetrics, MarkClock,
    MetricCounter, HEADERS_REASON,
};
pub use config::{
    HeaderConfig, DEFAULT_CHUNKS_PER_COLLECTION, DEFAULT_CHUNK_CAPACITY, MAX_ADDRESSABLE_SLOTS,
};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use header::{
    HeaderPayload, IdentityHash, InflatedHeader, LockOutcome, LockRecord, MarkStamp, ObjectId,
    ThreadToken, UnlockOutcome, WaitQueueHandle,
};
pub use registry::{InflatedHeaders, ReclaimStats};
pub use safepoint::{MutatorGuard, Safepoint, StoppedWorld};
