//! Stop-the-world barrier between mutators and the collector.
//!
//! Reclamation assumes no allocation is in flight. Mutators hold a
//! [`MutatorGuard`] while they inflate headers; the collector takes a
//! [`StoppedWorld`], which waits for every guard to be released and keeps new
//! ones out until it is dropped.
//!
//! # Example
//!
//! ```
//! use inflated_headers::{HeaderConfig, InflatedHeaders, MarkClock, ObjectId, Safepoint};
//!
//! let headers = InflatedHeaders::with_request_queue(HeaderConfig::default());
//! let safepoint = Safepoint::new();
//! let clock = MarkClock::new();
//!
//! let (header, _index) = {
//!     let _mutator = safepoint.enter();
//!     headers.allocate(ObjectId::new(1).unwrap())
//! };
//!
//! let mark = clock.advance();
//! header.mark(mark);
//!
//! let world = safepoint.stop_the_world();
//! let stats = headers.collect_at_safepoint(&world, mark);
//! assert_eq!(stats.live, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The barrier itself. One per VM instance.
#[derive(Debug, Default)]
pub struct Safepoint {
    gate: RwLock<()>,
    stops: AtomicU64,
}

impl Safepoint {
    /// Create a barrier with no mutator inside.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gate: RwLock::new(()),
            stops: AtomicU64::new(0),
        }
    }

    /// Enter a mutator critical section. Blocks while the world is stopped.
    ///
    /// Not reentrant: a thread must not call `enter` or `stop_the_world`
    /// while it already holds a guard.
    pub fn enter(&self) -> MutatorGuard<'_> {
        MutatorGuard {
            _guard: self.gate.read(),
        }
    }

    /// Enter a mutator critical section unless the world is stopped.
    pub fn try_enter(&self) -> Option<MutatorGuard<'_>> {
        self.gate
            .try_read()
            .map(|guard| MutatorGuard { _guard: guard })
    }

    /// Park every mutator. Returns once no [`MutatorGuard`] is alive.
    pub fn stop_the_world(&self) -> StoppedWorld<'_> {
        let guard = self.gate.write();
        let epoch = self.stops.fetch_add(1, Ordering::Relaxed) + 1;
        StoppedWorld {
            _guard: guard,
            epoch,
        }
    }

    /// Number of times the world has been stopped.
    #[must_use]
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }
}

/// Proof that the holder is a mutator inside its critical section.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct MutatorGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Proof that every mutator is parked.
#[must_use = "mutators resume when the guard is dropped"]
pub struct StoppedWorld<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    epoch: u64,
}

impl StoppedWorld<'_> {
    /// Ordinal of this stop, starting at 1.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}
