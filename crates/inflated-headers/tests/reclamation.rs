//! Integration tests for allocation and mark-driven reclamation.

use std::collections::HashSet;

use inflated_headers::{
    HeaderConfig, IdentityHash, InflatedHeaders, MarkClock, MarkStamp, ObjectId, SlotIndex,
    ThreadToken,
};

fn owner(raw: u64) -> ObjectId {
    ObjectId::new(raw).unwrap()
}

fn small_table(chunk_capacity: usize, chunks_per_collection: usize) -> InflatedHeaders {
    InflatedHeaders::with_request_queue(HeaderConfig {
        chunk_capacity,
        chunks_per_collection,
        ..HeaderConfig::default()
    })
}

/// Three slots, the trace stamps the first and last.
#[test]
fn test_unmarked_slot_is_reclaimed() {
    let headers = small_table(16, 4);
    let clock = MarkClock::new();

    let (h0, i0) = headers.allocate(owner(1));
    let (h1, i1) = headers.allocate(owner(2));
    let (h2, i2) = headers.allocate(owner(3));
    h0.lock(ThreadToken(1));
    h1.set_identity_hash(IdentityHash(0x1111));
    h2.set_identity_hash(IdentityHash(0x2222));

    let e1 = clock.advance();
    h0.mark(e1);
    h2.mark(e1);

    let stats = headers.deallocate_headers(e1);
    assert_eq!(stats.live, 2);
    assert_eq!(headers.diagnostics().snapshot().objects, 2);

    let slot1 = headers.from_index(i1);
    assert!(slot1.is_clear());
    assert!(!slot1.marked_p(e1));
    assert_eq!(slot1.identity_hash(), None);

    let slot0 = headers.from_index(i0);
    let slot2 = headers.from_index(i2);
    assert!(slot0.marked_p(e1));
    assert!(slot2.marked_p(e1));
    assert_eq!(slot0.lock_owner(), Some(ThreadToken(1)));
    assert_eq!(slot0.owner(), Some(owner(1)));
    assert_eq!(slot2.identity_hash(), Some(IdentityHash(0x2222)));
}

/// Two chunks of four slots, nine allocations.
#[test]
fn test_ninth_allocation_requests_one_collection() {
    let headers = small_table(4, 2);

    let mut indices = HashSet::new();
    for raw in 1..=9 {
        let (header, index) = headers.allocate(owner(raw));
        assert_eq!(header.owner(), Some(owner(raw)));
        assert!(indices.insert(index));
    }

    let ninth = SlotIndex::new(8);
    assert!(indices.contains(&ninth));
    assert_eq!(headers.from_index(ninth).owner(), Some(owner(9)));

    assert_eq!(headers.diagnostics().snapshot().collections, 1);
    assert_eq!(headers.metrics().headers_set.get(), 1);
    assert_eq!(headers.scheduler().pending(), 1);
}

/// The index ceiling cannot be crossed.
#[test]
#[should_panic(expected = "inflated header table exhausted")]
fn test_allocation_past_ceiling_is_fatal() {
    let headers = InflatedHeaders::with_request_queue(HeaderConfig {
        chunk_capacity: 4,
        chunks_per_collection: 1,
        max_slots: 8,
    });
    for raw in 1..=8 {
        headers.allocate(owner(raw));
    }
    headers.allocate(owner(9));
}

#[test]
fn test_ceiling_reached_after_reclamation_reuses_free_slots() {
    let headers = InflatedHeaders::with_request_queue(HeaderConfig {
        chunk_capacity: 4,
        chunks_per_collection: 1,
        max_slots: 8,
    });
    for raw in 1..=8 {
        headers.allocate(owner(raw));
    }
    // Nothing survives, so all eight indices become reusable.
    headers.deallocate_headers(MarkStamp::FIRST);
    let reused: HashSet<SlotIndex> = (1..=8).map(|raw| headers.allocate(owner(raw)).1).collect();
    assert_eq!(reused.len(), 8);
}

#[test]
fn test_live_indices_stay_unique_across_cycles() {
    let headers = small_table(8, 2);
    let clock = MarkClock::new();
    let mut live: Vec<SlotIndex> = Vec::new();
    let mut next_owner = 1;

    for cycle in 0..5 {
        for _ in 0..20 {
            let (_, index) = headers.allocate(owner(next_owner));
            next_owner += 1;
            live.push(index);
        }

        let distinct: HashSet<SlotIndex> = live.iter().copied().collect();
        assert_eq!(distinct.len(), live.len(), "duplicate index in cycle {cycle}");

        // Keep every third slot alive.
        let mark = clock.advance();
        live = live.into_iter().step_by(3).collect();
        for index in &live {
            headers.from_index(*index).mark(mark);
        }
        let stats = headers.deallocate_headers(mark);
        assert_eq!(stats.live, live.len());
        assert_eq!(headers.in_use(), live.len());
    }
}

#[test]
fn test_marked_slot_keeps_identity_across_reclamation() {
    let headers = small_table(4, 2);
    let clock = MarkClock::new();
    let (header, index) = headers.allocate(owner(5));
    let before: *const _ = header;

    for _ in 0..3 {
        for raw in 100..110 {
            headers.allocate(owner(raw));
        }
        let mark = clock.advance();
        headers.from_index(index).mark(mark);
        headers.deallocate_headers(mark);
        assert!(std::ptr::eq(before, headers.from_index(index)));
        assert_eq!(headers.from_index(index).owner(), Some(owner(5)));
    }
}

#[test]
fn test_empty_chunks_are_reused_before_growth() {
    let headers = small_table(4, 100);
    for raw in 1..=12 {
        headers.allocate(owner(raw));
    }
    let stats = headers.deallocate_headers(MarkStamp::FIRST);
    assert_eq!(stats.live, 0);
    assert_eq!(stats.reclaimed, 12);
    assert_eq!(stats.empty_chunks, 3);

    for raw in 1..=12 {
        headers.allocate(owner(raw));
    }
    assert_eq!(headers.allocator().chunk_count(), 3);
}

#[test]
fn test_custom_scheduler_receives_reason() {
    use inflated_headers::{CollectionScheduler, MetricCounter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
    }

    impl CollectionScheduler for Recording {
        fn schedule_full_collection(&self, reason: &'static str, counter: &MetricCounter) {
            assert_eq!(reason, inflated_headers::HEADERS_REASON);
            counter.increment();
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    let headers = InflatedHeaders::new(
        HeaderConfig {
            chunk_capacity: 1,
            chunks_per_collection: 1,
            ..HeaderConfig::default()
        },
        Recording::default(),
    );
    for raw in 1..=5 {
        headers.allocate(owner(raw));
    }
    // Appends 2 and 4 exceed the one-chunk budget.
    assert_eq!(headers.scheduler().calls.load(Ordering::Relaxed), 2);
    assert_eq!(headers.metrics().headers_set.get(), 2);
}
