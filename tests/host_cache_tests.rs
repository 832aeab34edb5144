//! Integration tests for the pinned host staging cache
//!
//! Everything here runs against the mock platform, so these tests exercise
//! the registry/free-list/marker machinery without a GPU present.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use stageforge::memory::testing::{ManualMarker, MockPinnedAllocator};
use stageforge::HostMemoryCache;

type TestCache = HostMemoryCache<MockPinnedAllocator, ManualMarker>;

fn new_cache() -> (MockPinnedAllocator, TestCache) {
    let platform = MockPinnedAllocator::new();
    (platform.clone(), HostMemoryCache::new(platform))
}

#[test]
fn concurrent_churn_never_hands_out_a_block_twice() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 200;

    let (_, cache) = new_cache();
    let cache = Arc::new(cache);
    let outstanding: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            let outstanding = Arc::clone(&outstanding);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    let size = 64 + (thread_id * 7 + i) % 512;
                    let ptr = cache.allocate(size).expect("allocation failed");
                    {
                        let mut held = outstanding.lock().unwrap();
                        assert!(
                            held.insert(ptr as usize),
                            "address {:p} handed out while still outstanding",
                            ptr
                        );
                    }
                    if i % 3 == 0 {
                        cache
                            .record_usage(ptr, ManualMarker::completed())
                            .expect("record failed");
                    }
                    {
                        let mut held = outstanding.lock().unwrap();
                        assert!(held.remove(&(ptr as usize)));
                    }
                    cache.release(ptr).expect("release failed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let stats = cache.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.pending_markers, 0);
}

#[test]
fn steady_state_churn_stops_hitting_the_platform() {
    const THREADS: usize = 4;
    const ITERATIONS: usize = 100;

    let (platform, cache) = new_cache();
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    let ptr = cache.allocate(4096).expect("allocation failed");
                    cache.release(ptr).expect("release failed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    // Each thread holds at most one block and releases are marker-free, so a
    // free-list miss implies every registered block is currently held by
    // another thread. The platform can never be asked for more blocks than
    // there are threads.
    assert!(
        platform.alloc_calls() <= THREADS,
        "expected at most {} fresh allocations, platform saw {}",
        THREADS,
        platform.alloc_calls()
    );
}

#[test]
fn live_allocations_never_overlap() {
    let (_, cache) = new_cache();
    let sizes = [16usize, 200, 64, 4096, 10, 1024, 64];
    let mut live: Vec<(usize, usize)> = Vec::new();
    for &size in &sizes {
        let addr = cache.allocate(size).expect("allocation failed") as usize;
        live.push((addr, size));
    }
    for (i, &(a_addr, a_size)) in live.iter().enumerate() {
        for &(b_addr, b_size) in live.iter().skip(i + 1) {
            let disjoint = a_addr + a_size <= b_addr || b_addr + b_size <= a_addr;
            assert!(
                disjoint,
                "blocks [{:#x}, +{}) and [{:#x}, +{}) overlap",
                a_addr, a_size, b_addr, b_size
            );
        }
    }
}

#[test]
fn drop_returns_every_region_to_the_platform() {
    let platform = MockPinnedAllocator::new();
    {
        let cache: TestCache = HostMemoryCache::new(platform.clone());
        let a = cache.allocate(64).unwrap();
        let b = cache.allocate(128).unwrap();
        let _held = cache.allocate(256).unwrap();
        cache.release(a).unwrap();
        cache.record_usage(b, ManualMarker::new()).unwrap();
        cache.release(b).unwrap();
        assert_eq!(platform.live_regions(), 3);
    }
    // Teardown frees free, pending, and still-allocated blocks alike.
    assert_eq!(platform.live_regions(), 0);
    assert_eq!(platform.live_bytes(), 0);
}

#[test]
fn purge_then_refill_goes_back_to_the_platform() -> anyhow::Result<()> {
    let (platform, cache) = new_cache();
    let ptr = cache.allocate(2048)?;
    cache.release(ptr)?;
    assert_eq!(cache.purge_all()?, 2048);
    assert_eq!(platform.live_regions(), 0);

    // The cache is empty again, so the next request is a fresh allocation.
    let fresh = cache.allocate(2048)?;
    assert_eq!(platform.alloc_calls(), 2);
    assert!(cache.is_managed(fresh));
    Ok(())
}

#[test]
fn contract_violation_poisons_the_pool() {
    let (_, cache) = new_cache();
    let ptr = cache.allocate(32).unwrap();
    cache.release(ptr).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        cache.release(ptr).ok();
    }));
    assert!(result.is_err(), "double release must panic");

    // The violation happened under the pool lock; the pool is done for.
    assert!(matches!(
        cache.allocate(32),
        Err(stageforge::HostCacheError::LockPoisoned(_))
    ));
    assert!(!cache.is_managed(ptr));
}
