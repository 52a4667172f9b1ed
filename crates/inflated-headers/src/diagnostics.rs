//! Change-gated counters for the inflated header table.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Live slots found by the last reclamation pass.
    pub objects: usize,
    /// Bytes held by those live slots.
    pub bytes: usize,
    /// Allocations that requested a full collection.
    pub collections: usize,
}

/// Counters describing the header table, read by a periodic reporter.
///
/// [`log`](Self::log) only emits when something changed since the previous
/// emission, so a steady-state process stays quiet.
#[derive(Debug, Default)]
pub struct Diagnostics {
    objects: AtomicUsize,
    bytes: AtomicUsize,
    collections: AtomicUsize,
    modified: AtomicBool,
}

impl Diagnostics {
    /// Create zeroed, unmodified diagnostics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            objects: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
            modified: AtomicBool::new(false),
        }
    }

    pub(crate) fn record_collection_request(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.modified.store(true, Ordering::Release);
    }

    pub(crate) fn record_reclaim(&self, live: usize, slot_size: usize) {
        self.objects.store(live, Ordering::Relaxed);
        self.bytes.store(live * slot_size, Ordering::Relaxed);
        self.modified.store(true, Ordering::Release);
    }

    /// Read the counters without touching the modified flag.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            objects: self.objects.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
        }
    }

    /// Whether the counters changed since the last emission.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Emit the counters if they changed since the previous call.
    ///
    /// Returns the emitted snapshot, or `None` when nothing was emitted.
    pub fn log(&self) -> Option<DiagnosticsSnapshot> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return None;
        }
        let snapshot = self.snapshot();
        crate::tracing::internal::log_diagnostics(&snapshot);
        Some(snapshot)
    }
}
