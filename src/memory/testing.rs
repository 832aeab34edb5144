//! Test support for the host staging cache
//!
//! GPU-free stand-ins for the two platform seams: a bump-pointer fake pinned
//! address space and a hand-completed marker. Shared by unit tests,
//! integration tests, and benches, so this module is always compiled.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::host_cache::{CacheResult, CompletionMarker, HostCacheError, PinnedAllocator};

/// Fake pinned address space starts well away from null.
const MOCK_BASE_ADDR: usize = 0x1000;

/// Regions are carved at this granularity so consecutive fake addresses
/// never touch.
const MOCK_ALIGN: usize = 64;

#[derive(Debug)]
struct MockState {
    next_addr: AtomicUsize,
    alloc_calls: AtomicUsize,
    fail_next: AtomicBool,
    /// addr -> size of every region currently handed out and not yet freed
    live: Mutex<HashMap<usize, usize>>,
}

/// Bump-pointer fake of the platform pinned allocator.
///
/// Addresses are never dereferenced by the cache, so no real memory backs
/// them. Cloning shares state, letting a test keep a handle for assertions
/// after moving the allocator into a cache.
#[derive(Debug, Clone)]
pub struct MockPinnedAllocator {
    state: Arc<MockState>,
}

impl MockPinnedAllocator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                next_addr: AtomicUsize::new(MOCK_BASE_ADDR),
                alloc_calls: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make the next `alloc_pinned` call report an out-of-memory condition.
    pub fn fail_next_alloc(&self) {
        self.state.fail_next.store(true, Ordering::Release);
    }

    /// How many times `alloc_pinned` has been called (including failures)
    pub fn alloc_calls(&self) -> usize {
        self.state.alloc_calls.load(Ordering::Acquire)
    }

    /// Regions allocated and not yet freed
    pub fn live_regions(&self) -> usize {
        self.state.live.lock().expect("mock lock poisoned").len()
    }

    /// Bytes allocated and not yet freed
    pub fn live_bytes(&self) -> usize {
        self.state
            .live
            .lock()
            .expect("mock lock poisoned")
            .values()
            .sum()
    }
}

impl Default for MockPinnedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PinnedAllocator for MockPinnedAllocator {
    fn alloc_pinned(&self, size: usize) -> CacheResult<*mut c_void> {
        self.state.alloc_calls.fetch_add(1, Ordering::AcqRel);
        if self.state.fail_next.swap(false, Ordering::AcqRel) {
            return Err(HostCacheError::PinnedAllocationFailed(format!(
                "simulated out of pinned memory for {} bytes",
                size
            )));
        }
        let span = (size + MOCK_ALIGN - 1) & !(MOCK_ALIGN - 1);
        let addr = self.state.next_addr.fetch_add(span, Ordering::AcqRel);
        self.state
            .live
            .lock()
            .expect("mock lock poisoned")
            .insert(addr, size);
        Ok(addr as *mut c_void)
    }

    fn free_pinned(&self, ptr: *mut c_void, size: usize) {
        let removed = self
            .state
            .live
            .lock()
            .expect("mock lock poisoned")
            .remove(&(ptr as usize));
        match removed {
            Some(live_size) => assert_eq!(
                live_size, size,
                "mock free size mismatch at {:p}: allocated {}, freed {}",
                ptr, live_size, size
            ),
            None => panic!("mock free of unknown or already freed region {:p}", ptr),
        }
    }
}

/// Completion marker a test flips by hand.
///
/// Clones share the flag: keep one clone, hand the other to the cache, and
/// call [`complete`](Self::complete) to simulate the device finishing.
#[derive(Debug, Clone, Default)]
pub struct ManualMarker {
    done: Arc<AtomicBool>,
}

impl ManualMarker {
    /// A marker whose device work is still in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// A marker whose device work already finished
    pub fn completed() -> Self {
        let marker = Self::new();
        marker.complete();
        marker
    }

    /// Simulate the device operation finishing.
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl CompletionMarker for ManualMarker {
    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}
