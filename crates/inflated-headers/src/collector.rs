//! Interfaces shared with the collector.
//!
//! The table never runs a collection itself. When it runs short of slots it
//! hands a request to a [`CollectionScheduler`] and carries on; the collector
//! later stops the world, traces, and calls back into
//! [`InflatedHeaders::deallocate_headers`](crate::InflatedHeaders::deallocate_headers)
//! with the stamp of that trace.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use crossbeam::utils::CachePadded;

use crate::header::MarkStamp;

/// Reason attached to requests raised by header allocation.
pub const HEADERS_REASON: &str = "Inflated headers";

/// Relaxed event counter on its own cache line.
#[derive(Debug, Default)]
pub struct MetricCounter(CachePadded<AtomicU64>);

impl MetricCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one.
    #[inline]
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Collector-visible counters owned by a header table.
#[derive(Debug, Default)]
pub struct HeaderMetrics {
    /// Collections requested because the header table ran short.
    pub headers_set: MetricCounter,
}

/// Receiver of full-collection requests.
///
/// Implementations must not block the caller and must not run the
/// collection synchronously: requests are made while a mutator is in the
/// middle of inflating a header.
pub trait CollectionScheduler: Send + Sync {
    /// Ask for a full collection to run at some later point and bump
    /// `counter` to record the request.
    fn schedule_full_collection(&self, reason: &'static str, counter: &MetricCounter);
}

impl<S: CollectionScheduler + ?Sized> CollectionScheduler for Arc<S> {
    fn schedule_full_collection(&self, reason: &'static str, counter: &MetricCounter) {
        (**self).schedule_full_collection(reason, counter);
    }
}

/// A pending full-collection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionRequest {
    /// Why the collection was requested.
    pub reason: &'static str,
    /// Order in which the request was submitted, starting at zero.
    pub sequence: u64,
}

/// Lock-free mailbox of collection requests.
///
/// Mutators push, the collector drains. One full collection satisfies every
/// request pending when it starts, so collectors usually [`drain`](Self::drain)
/// and run once.
#[derive(Debug, Default)]
pub struct CollectionRequests {
    queue: SegQueue<CollectionRequest>,
    submitted: AtomicU64,
}

impl CollectionRequests {
    /// Create an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest pending request.
    #[must_use]
    pub fn take_pending(&self) -> Option<CollectionRequest> {
        self.queue.pop()
    }

    /// Take every pending request, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<CollectionRequest> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Number of requests waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether any request is waiting.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Requests submitted since creation.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl CollectionScheduler for CollectionRequests {
    fn schedule_full_collection(&self, reason: &'static str, counter: &MetricCounter) {
        counter.increment();
        let sequence = self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.push(CollectionRequest { reason, sequence });
        crate::tracing::internal::log_collection_requested(reason, sequence);
    }
}

/// Source of successive mark stamps, one per full collection.
#[derive(Debug, Default)]
pub struct MarkClock {
    current: AtomicU32,
}

impl MarkClock {
    /// Create a clock that has not started a collection yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: AtomicU32::new(0),
        }
    }

    /// Start the next collection and return its stamp. Never zero.
    pub fn advance(&self) -> MarkStamp {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let next = MarkStamp::new(current).map_or(MarkStamp::FIRST, MarkStamp::next);
            match self.current.compare_exchange_weak(
                current,
                next.get(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Stamp of the most recent collection, if one has started.
    #[must_use]
    pub fn current(&self) -> Option<MarkStamp> {
        MarkStamp::new(self.current.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_are_queued_in_order() {
        let requests = CollectionRequests::new();
        let counter = MetricCounter::new();
        requests.schedule_full_collection(HEADERS_REASON, &counter);
        requests.schedule_full_collection("other", &counter);

        assert_eq!(counter.get(), 2);
        assert_eq!(requests.pending(), 2);
        let drained = requests.drain();
        assert_eq!(drained[0].reason, HEADERS_REASON);
        assert_eq!(drained[1].sequence, 1);
        assert!(!requests.is_pending());
        assert_eq!(requests.submitted(), 2);
    }

    #[test]
    fn test_arc_scheduler_forwards() {
        let requests = Arc::new(CollectionRequests::new());
        let counter = MetricCounter::new();
        let scheduler: Arc<CollectionRequests> = Arc::clone(&requests);
        scheduler.schedule_full_collection(HEADERS_REASON, &counter);
        assert_eq!(requests.take_pending().map(|r| r.sequence), Some(0));
    }

    #[test]
    fn test_mark_clock_never_yields_zero() {
        let clock = MarkClock::new();
        assert_eq!(clock.current(), None);
        assert_eq!(clock.advance(), MarkStamp::FIRST);
        assert_eq!(clock.advance().get(), 2);

        clock.current.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(clock.advance(), MarkStamp::FIRST);
        assert_eq!(clock.current(), Some(MarkStamp::FIRST));
    }
}
