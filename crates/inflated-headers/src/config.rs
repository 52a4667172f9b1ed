//! Sizing knobs for the inflated header table.

/// Slots per chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1024;

/// Chunk appends tolerated between collections before one is requested.
pub const DEFAULT_CHUNKS_PER_COLLECTION: usize = 16;

/// Number of distinct slot indices an inline header can address.
pub const MAX_ADDRESSABLE_SLOTS: u64 = 1 << 32;

/// Configuration of a [`ChunkedAllocator`](crate::ChunkedAllocator).
///
/// # Example
///
/// ```
/// use inflated_headers::HeaderConfig;
///
/// let config = HeaderConfig {
///     chunk_capacity: 4,
///     chunks_per_collection: 2,
///     ..HeaderConfig::default()
/// };
/// assert_eq!(config.collection_threshold(), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderConfig {
    /// Number of slot records in every chunk.
    pub chunk_capacity: usize,
    /// How many chunks may be appended after a reclamation (or after the
    /// previous request) before allocation asks for a full collection.
    pub chunks_per_collection: usize,
    /// Hard ceiling on issued slot indices. Issuing index `max_slots` is fatal.
    pub max_slots: u64,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            chunks_per_collection: DEFAULT_CHUNKS_PER_COLLECTION,
            max_slots: MAX_ADDRESSABLE_SLOTS,
        }
    }
}

impl HeaderConfig {
    /// Number of slots that can be issued before the first collection request.
    #[must_use]
    pub const fn collection_threshold(&self) -> usize {
        self.chunk_capacity.saturating_mul(self.chunks_per_collection)
    }

    /// Check the configuration for values the allocator cannot work with.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_capacity` or `chunks_per_collection` is zero, if
    /// `max_slots` is zero, or if `max_slots` exceeds [`MAX_ADDRESSABLE_SLOTS`].
    pub fn validate(&self) {
        assert!(self.chunk_capacity > 0, "chunk_capacity must be non-zero");
        assert!(
            self.chunks_per_collection > 0,
            "chunks_per_collection must be non-zero"
        );
        assert!(self.max_slots > 0, "max_slots must be non-zero");
        assert!(
            self.max_slots <= MAX_ADDRESSABLE_SLOTS,
            "max_slots ({}) exceeds the 32-bit index space",
            self.max_slots
        );
    }
}
