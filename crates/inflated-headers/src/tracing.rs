//! Header table tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for allocation pressure, reclamation and diagnostics.
//! Without it every helper compiles to nothing.

#[cfg(feature = "tracing")]
pub mod internal {
    use tracing::{span, Level};

    use crate::diagnostics::DiagnosticsSnapshot;
    use crate::header::MarkStamp;
    use crate::registry::ReclaimStats;

    /// Span covering one reclamation pass.
    pub fn span_reclaim(mark: MarkStamp) -> span::EnteredSpan {
        span!(Level::DEBUG, "deallocate_headers", mark = mark.get()).entered()
    }

    /// Log the outcome of a reclamation pass.
    pub fn log_reclaim(stats: &ReclaimStats) {
        tracing::debug!(
            live = stats.live,
            reclaimed = stats.reclaimed,
            chunks = stats.chunks,
            empty_chunks = stats.empty_chunks,
            "reclaim_end"
        );
    }

    /// Log a full-collection request raised by allocation pressure.
    pub fn log_collection_requested(reason: &str, sequence: u64) {
        tracing::debug!(reason, sequence, "collection_requested");
    }

    /// Log the fatal exhaustion of the index space.
    pub fn log_index_space_exhausted(index: u64, max_slots: u64) {
        tracing::error!(index, max_slots, "inflated header index space exhausted");
    }

    /// Emit the diagnostics counters.
    pub fn log_diagnostics(snapshot: &DiagnosticsSnapshot) {
        tracing::info!(
            target: "inflated_headers::diagnostics",
            objects = snapshot.objects,
            bytes = snapshot.bytes,
            collections = snapshot.collections,
            "inflated headers: diagnostics"
        );
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use crate::diagnostics::DiagnosticsSnapshot;
    use crate::header::MarkStamp;
    use crate::registry::ReclaimStats;

    /// Stub function when tracing is disabled.
    pub const fn span_reclaim(_mark: MarkStamp) {}

    /// Stub function when tracing is disabled.
    pub const fn log_reclaim(_stats: &ReclaimStats) {}

    /// Stub function when tracing is disabled.
    pub const fn log_collection_requested(_reason: &str, _sequence: u64) {}

    /// Stub function when tracing is disabled.
    pub const fn log_index_space_exhausted(_index: u64, _max_slots: u64) {}

    /// Stub function when tracing is disabled.
    pub const fn log_diagnostics(_snapshot: &DiagnosticsSnapshot) {}
}
