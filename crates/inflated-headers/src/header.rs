//! The inflated header slot record.
//!
//! An [`InflatedHeader`] holds the metadata that no longer fits in an object's
//! inline header word: monitor state, a cached identity hash, or forwarding
//! data. Exactly one interpretation is active at a time ([`HeaderPayload`]).
//!
//! A slot never points back at its object. Liveness is decided only by the
//! mark stamp written during the collector's trace.

use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Stamp value stored in a slot that has not been marked since it was cleared.
const UNMARKED: u32 = 0;

/// Owner value stored in a slot that is not handed out.
const NO_OWNER: u64 = 0;

// ============================================================================
// Identity types
// ============================================================================

/// A collector generation used to mark reachable slots.
///
/// Stamps are never zero, so a pristine slot is unmarked under every stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkStamp(NonZeroU32);

impl MarkStamp {
    /// The first generation a [`MarkClock`](crate::MarkClock) hands out.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Create a stamp from a raw generation value. Returns `None` for zero.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The raw generation value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The generation after this one, skipping zero on wrap-around.
    #[must_use]
    pub const fn next(self) -> Self {
        match NonZeroU32::new(self.0.get().wrapping_add(1)) {
            Some(v) => Self(v),
            None => Self::FIRST,
        }
    }
}

impl fmt::Display for MarkStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mark#{}", self.0)
    }
}

/// Opaque identity token of the object owning a slot.
///
/// This is an identity, not a reference: the table never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU64);

impl ObjectId {
    /// Create an identity token. Returns `None` for zero.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The raw token.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl From<NonZeroU64> for ObjectId {
    fn from(raw: NonZeroU64) -> Self {
        Self(raw)
    }
}

/// Identity of a thread taking an object's monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(pub u64);

/// Cached identity hash of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityHash(pub u32);

/// Handle of the wait queue parked threads sleep on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitQueueHandle(pub u64);

// ============================================================================
// Payload
// ============================================================================

/// Monitor bookkeeping of an inflated header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    /// Thread holding the monitor, if any.
    pub owner: Option<ThreadToken>,
    /// Number of nested acquisitions by `owner`.
    pub recursion: u32,
    /// Queue of threads waiting on the monitor.
    pub wait_queue: Option<WaitQueueHandle>,
}

impl LockRecord {
    const fn held_by(owner: ThreadToken) -> Self {
        Self {
            owner: Some(owner),
            recursion: 1,
            wait_queue: None,
        }
    }
}

/// The single active interpretation of a slot's extended metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderPayload {
    /// Pristine free state.
    #[default]
    Vacant,
    /// Only an identity hash is cached.
    Hashed(IdentityHash),
    /// Monitor state, optionally alongside a cached identity hash.
    Monitor {
        /// Lock owner, depth and waiters.
        lock: LockRecord,
        /// Identity hash cached before or during locking.
        hash: Option<IdentityHash>,
    },
    /// The object was forwarded to another identity.
    Forwarded(ObjectId),
}

/// Result of [`InflatedHeader::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The monitor was free and is now held once.
    Acquired,
    /// The caller already held the monitor; the new depth is returned.
    Reentered(u32),
    /// Another thread holds the monitor.
    Contended(ThreadToken),
    /// The slot carries forwarding data and cannot be locked.
    Forwarded(ObjectId),
}

/// Result of [`InflatedHeader::unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The last nested acquisition was released.
    Released,
    /// The caller still holds the monitor at the returned depth.
    StillHeld(u32),
    /// The caller does not hold the monitor.
    NotOwner,
}

// ============================================================================
// InflatedHeader
// ============================================================================

/// One slot of the inflated header table.
pub struct InflatedHeader {
    mark: AtomicU32,
    owner: AtomicU64,
    payload: Mutex<HeaderPayload>,
}

impl InflatedHeader {
    /// Create a pristine slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: AtomicU32::new(UNMARKED),
            owner: AtomicU64::new(NO_OWNER),
            payload: Mutex::new(HeaderPayload::Vacant),
        }
    }

    /// Whether this slot was stamped with `stamp` by the current trace.
    #[inline]
    #[must_use]
    pub fn marked_p(&self, stamp: MarkStamp) -> bool {
        self.mark.load(Ordering::Acquire) == stamp.get()
    }

    /// Stamp this slot as reachable in generation `stamp`.
    #[inline]
    pub fn mark(&self, stamp: MarkStamp) {
        self.mark.store(stamp.get(), Ordering::Release);
    }

    /// Whether this slot carries no mark at all.
    #[inline]
    pub(crate) fn is_unmarked(&self) -> bool {
        self.mark.load(Ordering::Acquire) == UNMARKED
    }

    /// Reset to the pristine free state, dropping lock, hash and forwarding
    /// content. Calling it again has no further effect.
    pub fn clear(&self) {
        *self.payload.lock() = HeaderPayload::Vacant;
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.mark.store(UNMARKED, Ordering::Release);
    }

    /// Whether the slot is in the pristine free state.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.is_unmarked()
            && self.owner.load(Ordering::Acquire) == NO_OWNER
            && *self.payload.lock() == HeaderPayload::Vacant
    }

    /// Record the identity of the object this slot was handed out to.
    #[inline]
    pub(crate) fn set_owner(&self, owner: ObjectId) {
        self.owner.store(owner.get(), Ordering::Release);
    }

    /// Identity of the object this slot was handed out to.
    #[must_use]
    pub fn owner(&self) -> Option<ObjectId> {
        ObjectId::new(self.owner.load(Ordering::Acquire))
    }

    /// Copy of the active payload.
    #[must_use]
    pub fn payload(&self) -> HeaderPayload {
        *self.payload.lock()
    }

    /// Cached identity hash, if one was installed.
    #[must_use]
    pub fn identity_hash(&self) -> Option<IdentityHash> {
        match *self.payload.lock() {
            HeaderPayload::Hashed(hash) => Some(hash),
            HeaderPayload::Monitor { hash, .. } => hash,
            HeaderPayload::Vacant | HeaderPayload::Forwarded(_) => None,
        }
    }

    /// Install `hash` unless a hash is already cached, returning the hash that
    /// is in effect. Returns `None` if the slot holds forwarding data.
    pub fn set_identity_hash(&self, hash: IdentityHash) -> Option<IdentityHash> {
        let mut payload = self.payload.lock();
        match &mut *payload {
            HeaderPayload::Vacant => {
                *payload = HeaderPayload::Hashed(hash);
                Some(hash)
            }
            HeaderPayload::Hashed(existing) => Some(*existing),
            HeaderPayload::Monitor { hash: cached, .. } => Some(*cached.get_or_insert(hash)),
            HeaderPayload::Forwarded(_) => None,
        }
    }

    /// Take the monitor for `thread`.
    pub fn lock(&self, thread: ThreadToken) -> LockOutcome {
        let mut payload = self.payload.lock();
        match &mut *payload {
            HeaderPayload::Vacant => {
                *payload = HeaderPayload::Monitor {
                    lock: LockRecord::held_by(thread),
                    hash: None,
                };
                LockOutcome::Acquired
            }
            HeaderPayload::Hashed(hash) => {
                let hash = Some(*hash);
                *payload = HeaderPayload::Monitor {
                    lock: LockRecord::held_by(thread),
                    hash,
                };
                LockOutcome::Acquired
            }
            HeaderPayload::Monitor { lock, .. } => match lock.owner {
                None => {
                    lock.owner = Some(thread);
                    lock.recursion = 1;
                    LockOutcome::Acquired
                }
                Some(owner) if owner == thread => {
                    lock.recursion = lock
                        .recursion
                        .checked_add(1)
                        .expect("monitor recursion overflow");
                    LockOutcome::Reentered(lock.recursion)
                }
                Some(owner) => LockOutcome::Contended(owner),
            },
            HeaderPayload::Forwarded(to) => LockOutcome::Forwarded(*to),
        }
    }

    /// Release one acquisition of the monitor held by `thread`.
    ///
    /// When the last acquisition is released and nobody waits on the
    /// monitor, the payload falls back to the cached hash (or to vacant).
    pub fn unlock(&self, thread: ThreadToken) -> UnlockOutcome {
        let mut payload = self.payload.lock();
        let HeaderPayload::Monitor { lock, hash } = &mut *payload else {
            return UnlockOutcome::NotOwner;
        };
        if lock.owner != Some(thread) {
            return UnlockOutcome::NotOwner;
        }

        lock.recursion -= 1;
        if lock.recursion > 0 {
            return UnlockOutcome::StillHeld(lock.recursion);
        }

        lock.owner = None;
        if lock.wait_queue.is_none() {
            *payload = hash.map_or(HeaderPayload::Vacant, HeaderPayload::Hashed);
        }
        UnlockOutcome::Released
    }

    /// Thread currently holding the monitor.
    #[must_use]
    pub fn lock_owner(&self) -> Option<ThreadToken> {
        match *self.payload.lock() {
            HeaderPayload::Monitor { lock, .. } => lock.owner,
            _ => None,
        }
    }

    /// Attach a wait queue to the monitor. Returns `false` if the slot does
    /// not currently carry monitor state.
    pub fn set_wait_queue(&self, queue: Option<WaitQueueHandle>) -> bool {
        let mut payload = self.payload.lock();
        let HeaderPayload::Monitor { lock, hash } = &mut *payload else {
            return false;
        };
        lock.wait_queue = queue;
        if queue.is_none() && lock.owner.is_none() {
            *payload = hash.map_or(HeaderPayload::Vacant, HeaderPayload::Hashed);
        }
        true
    }

    /// Replace the payload with forwarding data, returning what it displaced.
    pub fn forward(&self, to: ObjectId) -> HeaderPayload {
        std::mem::replace(&mut *self.payload.lock(), HeaderPayload::Forwarded(to))
    }

    /// Forwarding target, if the slot carries forwarding data.
    #[must_use]
    pub fn forwarded_to(&self) -> Option<ObjectId> {
        match *self.payload.lock() {
            HeaderPayload::Forwarded(to) => Some(to),
            _ => None,
        }
    }
}

impl Default for InflatedHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InflatedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflatedHeader")
            .field("mark", &self.mark.load(Ordering::Relaxed))
            .field("owner", &self.owner())
            .field("payload", &self.payload())
            .finish()
    }
}
