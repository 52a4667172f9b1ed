//! Multi-threaded allocation tests.

use std::collections::HashSet;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use inflated_headers::{
    HeaderConfig, InflatedHeader, InflatedHeaders, MarkClock, ObjectId, Safepoint, SlotIndex,
};
use parking_lot::Mutex;

const THREADS: usize = 8;
const PER_THREAD: usize = 2_000;

fn owner(raw: u64) -> ObjectId {
    ObjectId::new(raw).unwrap()
}

#[test]
fn test_concurrent_allocations_are_distinct() {
    let headers = Arc::new(InflatedHeaders::with_request_queue(HeaderConfig {
        chunk_capacity: 64,
        chunks_per_collection: 4,
        ..HeaderConfig::default()
    }));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let headers = Arc::clone(&headers);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|k| {
                        let id = owner((t * PER_THREAD + k + 1) as u64);
                        let (header, index) = headers.allocate(id);
                        assert_eq!(header.owner(), Some(id));
                        index
                    })
                    .collect::<Vec<SlotIndex>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for index in handle.join().unwrap() {
            assert!(all.insert(index), "index {index} issued twice");
        }
    }

    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(headers.in_use(), THREADS * PER_THREAD);

    // Every slot still names the owner it was issued to.
    let owners: HashSet<u64> = all
        .iter()
        .map(|index| headers.from_index(*index).owner().unwrap().get())
        .collect();
    assert_eq!(owners.len(), THREADS * PER_THREAD);

    let requested = headers.metrics().headers_set.get();
    assert_eq!(headers.diagnostics().snapshot().collections as u64, requested);
    assert_eq!(headers.scheduler().submitted(), requested);

    // A trace that reaches every slot leaves diagnostics counting all of them.
    let mark = MarkClock::new().advance();
    for index in &all {
        headers.from_index(*index).mark(mark);
    }
    let stats = headers.deallocate_headers(mark);
    assert_eq!(stats.live, THREADS * PER_THREAD);
    assert_eq!(stats.reclaimed, 0);
    let snapshot = headers.diagnostics().snapshot();
    assert_eq!(snapshot.objects, THREADS * PER_THREAD);
    assert_eq!(snapshot.bytes, THREADS * PER_THREAD * size_of::<InflatedHeader>());
}

/// Mutators allocate under the safepoint while a collector thread answers
/// collection requests. Every surviving index must stay unique and resolvable.
#[test]
fn test_collector_cycles_between_mutators() {
    let headers = Arc::new(InflatedHeaders::with_request_queue(HeaderConfig {
        chunk_capacity: 16,
        chunks_per_collection: 2,
        ..HeaderConfig::default()
    }));
    let safepoint = Arc::new(Safepoint::new());
    let roots: Arc<Mutex<Vec<SlotIndex>>> = Arc::new(Mutex::new(Vec::new()));
    let next_owner = Arc::new(AtomicU64::new(1));
    let done = Arc::new(AtomicBool::new(false));

    let collector = thread::spawn({
        let headers = Arc::clone(&headers);
        let safepoint = Arc::clone(&safepoint);
        let roots = Arc::clone(&roots);
        let done = Arc::clone(&done);
        move || {
            let clock = MarkClock::new();
            let mut cycles = 0;
            while !done.load(Ordering::Acquire) || headers.scheduler().is_pending() {
                if headers.scheduler().drain().is_empty() {
                    thread::yield_now();
                    continue;
                }
                let world = safepoint.stop_the_world();
                let mark = clock.advance();
                let mut roots = roots.lock();
                // Half of the roots die every cycle.
                let keep = roots.len() / 2;
                roots.truncate(keep);
                for index in roots.iter() {
                    headers.from_index(*index).mark(mark);
                }
                let stats = headers.collect_at_safepoint(&world, mark);
                assert_eq!(stats.live, roots.len());
                cycles += 1;
            }
            cycles
        }
    });

    let mutators: Vec<_> = (0..4)
        .map(|_| {
            let headers = Arc::clone(&headers);
            let safepoint = Arc::clone(&safepoint);
            let roots = Arc::clone(&roots);
            let next_owner = Arc::clone(&next_owner);
            thread::spawn(move || {
                for _ in 0..500 {
                    let _mutator = safepoint.enter();
                    let id = owner(next_owner.fetch_add(1, Ordering::Relaxed));
                    let (_, index) = headers.allocate(id);
                    roots.lock().push(index);
                }
            })
        })
        .collect();

    for mutator in mutators {
        mutator.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let cycles = collector.join().unwrap();
    assert!(cycles >= 1);

    let roots = roots.lock();
    let distinct: HashSet<SlotIndex> = roots.iter().copied().collect();
    assert_eq!(distinct.len(), roots.len());
    for index in roots.iter() {
        assert!(headers.from_index(*index).owner().is_some());
    }
}
