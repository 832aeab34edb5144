//! Caching allocator for pinned (page-locked) host staging memory
//!
//! Pinned allocations go through the OS and driver to lock pages, which makes
//! them far more expensive than pageable allocations. This cache never returns
//! a freed block to the platform (except through [`HostMemoryCache::purge_all`]);
//! released blocks are parked in a size-ordered free list and handed back out
//! to later requests.
//!
//! The hard part is reuse safety: a block may still be referenced by
//! asynchronous device work when the caller releases it. Every submitted
//! operation that touches a block is recorded as an opaque completion marker
//! on that block; the block re-enters the free list only once its marker
//! queue has drained.
//!
//! # Per-block state machine
//!
//! ```text
//! FRESH -> ALLOCATED <-> FREE_PENDING -> FREE_AVAILABLE -> ALLOCATED -> ...
//! ```
//!
//! `FREE_AVAILABLE` is the only state the free-list search can yield.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::Mutex;

use thiserror::Error;

/// Errors from the host staging cache
#[derive(Error, Debug, Clone)]
pub enum HostCacheError {
    #[error("staging allocation size cannot be zero")]
    ZeroSizeRequest,
    #[error("pinned memory allocation failed: {0}")]
    PinnedAllocationFailed(String),
    #[error("internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for HostCacheError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        HostCacheError::LockPoisoned(err.to_string())
    }
}

/// Host staging cache result type
pub type CacheResult<T> = Result<T, HostCacheError>;

/// Platform primitive that produces and reclaims pinned host memory.
///
/// The cache calls these with its internal lock released, so implementations
/// may take as long as the OS needs to lock or unlock pages.
pub trait PinnedAllocator {
    /// Allocate `size` bytes of page-locked host memory.
    fn alloc_pinned(&self, size: usize) -> CacheResult<*mut c_void>;

    /// Return a region previously obtained from [`alloc_pinned`](Self::alloc_pinned).
    fn free_pinned(&self, ptr: *mut c_void, size: usize);
}

/// Opaque handle for a submitted asynchronous device operation.
///
/// The only capability the cache needs is a non-blocking status probe.
/// Markers on one block complete in submission order, so the cache only ever
/// polls the oldest marker of each block.
pub trait CompletionMarker {
    /// Non-blocking check; must never wait for the device.
    fn is_complete(&self) -> bool;
}

/// Free-list ordering key.
///
/// Derived `Ord` compares size first, then address. The address tie-break
/// keeps iteration deterministic and lets equally sized blocks coexist in
/// the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BlockKey {
    size: usize,
    addr: usize,
}

impl BlockKey {
    fn new(size: usize, addr: usize) -> Self {
        Self { size, addr }
    }

    /// Lower bound for a best-fit lookup: the smallest key any block of at
    /// least `size` bytes can sort at.
    fn search_floor(size: usize) -> Self {
        Self { size, addr: 0 }
    }
}

/// Registry payload for one pinned region
#[derive(Debug)]
struct BlockState<M> {
    size: usize,
    allocated: bool,
    /// FIFO of outstanding device operations touching this block
    pending: VecDeque<M>,
}

/// Registry and free-list index, mutated together under one lock.
///
/// Invariant: a key is in `available` iff the matching registry entry has
/// `allocated == false` and an empty marker queue.
#[derive(Debug)]
struct CacheInner<M> {
    blocks: HashMap<usize, BlockState<M>>,
    available: BTreeSet<BlockKey>,
}

impl<M> CacheInner<M> {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            available: BTreeSet::new(),
        }
    }
}

/// Point-in-time counters for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Blocks currently known to the registry (any state)
    pub registered_blocks: usize,
    /// Total bytes across all registered blocks
    pub registered_bytes: usize,
    /// Blocks eligible for reuse
    pub available_blocks: usize,
    /// Blocks currently handed out to callers
    pub allocated_blocks: usize,
    /// Blocks withheld from reuse by outstanding markers
    pub pending_blocks: usize,
    /// Outstanding markers across all blocks
    pub pending_markers: usize,
}

/// Caching pool of pinned host staging blocks.
///
/// All public operations serialize on a single internal lock guarding the
/// block registry and the free-list index jointly; the platform allocation
/// primitives run with the lock released. Nothing here ever blocks on device
/// completion: markers are polled, never waited on, and polling happens
/// opportunistically inside [`release`](Self::release) and
/// [`purge_all`](Self::purge_all).
///
/// The process-wide instance lives behind
/// [`staging_pool`](crate::memory::staging_pool); tests construct isolated
/// instances over a mock platform.
pub struct HostMemoryCache<P: PinnedAllocator, M> {
    platform: P,
    inner: Mutex<CacheInner<M>>,
}

impl<P: PinnedAllocator, M: CompletionMarker> HostMemoryCache<P, M> {
    /// Create an empty cache over the given platform allocator.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            inner: Mutex::new(CacheInner::new()),
        }
    }

    /// Allocate `size` bytes of pinned host memory.
    ///
    /// Searches the free list for the smallest cached block of at least
    /// `size` bytes (ties broken by lowest address). On a miss the platform
    /// allocator is asked for a fresh region of exactly `size` bytes; there
    /// is no retry and no eviction on platform failure.
    ///
    /// The returned block may be larger than requested when it came from the
    /// free list.
    ///
    /// # Errors
    /// - [`HostCacheError::ZeroSizeRequest`] when `size == 0`
    /// - [`HostCacheError::PinnedAllocationFailed`] when the platform cannot
    ///   satisfy a fresh allocation
    pub fn allocate(&self, size: usize) -> CacheResult<*mut c_void> {
        if size == 0 {
            return Err(HostCacheError::ZeroSizeRequest);
        }

        {
            let mut inner = self.inner.lock()?;
            let hit = inner
                .available
                .range(BlockKey::search_floor(size)..)
                .next()
                .copied();
            if let Some(key) = hit {
                inner.available.remove(&key);
                let state = match inner.blocks.get_mut(&key.addr) {
                    Some(state) => state,
                    None => panic!(
                        "staging registry out of sync: free-listed block {:#x} has no registry entry",
                        key.addr
                    ),
                };
                debug_assert!(state.pending.is_empty());
                state.allocated = true;
                tracing::trace!(
                    "reusing cached pinned block: {} bytes at {:#x} for a {} byte request",
                    key.size,
                    key.addr,
                    size
                );
                return Ok(key.addr as *mut c_void);
            }
        }

        // Miss: page-locking happens outside the critical section.
        let ptr = self.platform.alloc_pinned(size).map_err(|err| {
            tracing::warn!("fresh pinned allocation of {} bytes failed: {}", size, err);
            err
        })?;
        let addr = ptr as usize;

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => {
                self.platform.free_pinned(ptr, size);
                return Err(poison.into());
            }
        };
        let prior = inner.blocks.insert(
            addr,
            BlockState {
                size,
                allocated: true,
                pending: VecDeque::new(),
            },
        );
        if prior.is_some() {
            panic!(
                "platform returned pinned address {:#x} that is already registered",
                addr
            );
        }
        tracing::debug!("registered fresh pinned block: {} bytes at {:#x}", size, addr);
        Ok(ptr)
    }

    /// Return an allocated block to the pool.
    ///
    /// Runs an opportunistic drain pass over all pending markers first, then
    /// flips the block to unallocated. The block re-enters the free list
    /// immediately if its marker queue is empty, otherwise it stays
    /// registry-resident but unavailable until a later drain observes the
    /// last marker complete.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not managed by this pool or is not currently
    /// allocated. Both indicate broken ownership tracking in the caller, and
    /// continuing could hand memory still referenced by the device to a new
    /// owner.
    pub fn release(&self, ptr: *mut c_void) -> CacheResult<()> {
        let addr = ptr as usize;
        let mut inner = self.inner.lock()?;
        Self::drain_pending(&mut inner);

        let CacheInner { blocks, available } = &mut *inner;
        let state = match blocks.get_mut(&addr) {
            Some(state) => state,
            None => panic!("release of pointer {:p} that is not managed by the staging pool", ptr),
        };
        if !state.allocated {
            panic!("double release of staging pointer {:p}", ptr);
        }
        state.allocated = false;

        if state.pending.is_empty() {
            available.insert(BlockKey::new(state.size, addr));
            tracing::trace!("released pinned block at {:#x}, immediately reusable", addr);
        } else {
            tracing::trace!(
                "released pinned block at {:#x}, held pending ({} markers outstanding)",
                addr,
                state.pending.len()
            );
        }
        Ok(())
    }

    /// Attach a completion marker to a managed block.
    ///
    /// Call this whenever an asynchronous device operation that reads or
    /// writes the block is submitted. Works on allocated and released blocks
    /// alike; a marker may land on a block that has already been released
    /// (mid-release race), in which case the block is pulled back out of the
    /// free list until the marker drains.
    ///
    /// A marker for a pointer this pool does not manage is logged and
    /// dropped.
    pub fn record_usage(&self, ptr: *mut c_void, marker: M) -> CacheResult<()> {
        let addr = ptr as usize;
        let mut inner = self.inner.lock()?;
        let CacheInner { blocks, available } = &mut *inner;
        match blocks.get_mut(&addr) {
            Some(state) => {
                if !state.allocated && state.pending.is_empty() {
                    available.remove(&BlockKey::new(state.size, addr));
                }
                state.pending.push_back(marker);
            }
            None => {
                tracing::warn!(
                    "usage marker recorded for pointer {:p} not managed by the staging pool, ignoring",
                    ptr
                );
            }
        }
        Ok(())
    }

    /// Whether `ptr` names a block registered with this pool, allocated or
    /// not. The surrounding runtime uses this to route frees: managed
    /// pointers must come back through [`release`](Self::release).
    pub fn is_managed(&self, ptr: *mut c_void) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.blocks.contains_key(&(ptr as usize)))
            .unwrap_or(false)
    }

    /// Return every reuse-eligible block to the platform allocator.
    ///
    /// Blocks that are still allocated, or that hold pending markers, are
    /// left untouched. Never called automatically; this is manual cache
    /// pressure relief only. Calling it again with no intervening traffic is
    /// a no-op.
    ///
    /// Returns the number of bytes handed back to the platform.
    pub fn purge_all(&self) -> CacheResult<usize> {
        let reclaimed: Vec<BlockKey> = {
            let mut inner = self.inner.lock()?;
            Self::drain_pending(&mut inner);
            let keys: Vec<BlockKey> = inner.available.iter().copied().collect();
            for key in &keys {
                inner.blocks.remove(&key.addr);
            }
            inner.available.clear();
            keys
        };

        // Page-unlocking happens outside the critical section.
        let mut freed = 0usize;
        for key in &reclaimed {
            self.platform.free_pinned(key.addr as *mut c_void, key.size);
            freed += key.size;
        }
        if !reclaimed.is_empty() {
            tracing::debug!(
                "purged {} cached pinned blocks ({} bytes)",
                reclaimed.len(),
                freed
            );
        }
        Ok(freed)
    }

    /// Snapshot of registry counters
    pub fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats::default();
        };
        let mut stats = CacheStats {
            registered_blocks: inner.blocks.len(),
            available_blocks: inner.available.len(),
            ..CacheStats::default()
        };
        for state in inner.blocks.values() {
            stats.registered_bytes += state.size;
            if state.allocated {
                stats.allocated_blocks += 1;
            } else if !state.pending.is_empty() {
                stats.pending_blocks += 1;
            }
            stats.pending_markers += state.pending.len();
        }
        stats
    }

    /// Poll outstanding markers and promote fully drained blocks.
    ///
    /// Markers on one block complete in submission order, so only the head
    /// of each queue is polled; an incomplete head ends that block's scan.
    fn drain_pending(inner: &mut CacheInner<M>) {
        let CacheInner { blocks, available } = inner;
        for (&addr, state) in blocks.iter_mut() {
            if state.pending.is_empty() {
                continue;
            }
            while let Some(front) = state.pending.front() {
                if !front.is_complete() {
                    break;
                }
                state.pending.pop_front();
            }
            if state.pending.is_empty() && !state.allocated {
                available.insert(BlockKey::new(state.size, addr));
                tracing::trace!("pinned block at {:#x} drained, back in the free list", addr);
            }
        }
    }
}

impl<P: PinnedAllocator, M> Drop for HostMemoryCache<P, M> {
    /// Full teardown: every registered region goes back to the platform.
    ///
    /// A pool dropped while blocks are still allocated or pending means its
    /// callers' ownership tracking is off; that is logged rather than
    /// papered over.
    fn drop(&mut self) {
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        let busy = inner
            .blocks
            .values()
            .filter(|state| state.allocated || !state.pending.is_empty())
            .count();
        if busy > 0 {
            tracing::warn!(
                "staging pool dropped with {} blocks still allocated or pending device completion",
                busy
            );
        }
        for (&addr, state) in inner.blocks.iter() {
            self.platform.free_pinned(addr as *mut c_void, state.size);
        }
        inner.blocks.clear();
        inner.available.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{ManualMarker, MockPinnedAllocator};

    type TestCache = HostMemoryCache<MockPinnedAllocator, ManualMarker>;

    fn cache() -> (MockPinnedAllocator, TestCache) {
        let platform = MockPinnedAllocator::new();
        (platform.clone(), HostMemoryCache::new(platform))
    }

    #[test]
    fn test_zero_size_allocation_fails() {
        let (_, cache) = cache();
        assert!(matches!(
            cache.allocate(0),
            Err(HostCacheError::ZeroSizeRequest)
        ));
    }

    #[test]
    fn test_fresh_allocation_registers_block() {
        let (platform, cache) = cache();
        let ptr = cache.allocate(4096).expect("fresh allocation failed");
        assert!(cache.is_managed(ptr));
        assert_eq!(platform.alloc_calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.registered_blocks, 1);
        assert_eq!(stats.registered_bytes, 4096);
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.available_blocks, 0);
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let (platform, cache) = cache();
        platform.fail_next_alloc();
        assert!(matches!(
            cache.allocate(1 << 20),
            Err(HostCacheError::PinnedAllocationFailed(_))
        ));
        assert_eq!(cache.stats().registered_blocks, 0);

        // The failure is not sticky.
        let ptr = cache.allocate(64).expect("allocation after OOM failed");
        assert!(cache.is_managed(ptr));
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_block() {
        let (_, cache) = cache();
        let b10 = cache.allocate(10).unwrap();
        let b50 = cache.allocate(50).unwrap();
        let b100 = cache.allocate(100).unwrap();
        cache.release(b10).unwrap();
        cache.release(b50).unwrap();
        cache.release(b100).unwrap();

        let got = cache.allocate(40).expect("best-fit allocation failed");
        assert_eq!(got, b50, "request of 40 must reuse the 50 byte block");
    }

    #[test]
    fn test_tie_break_prefers_lowest_address() {
        let (_, cache) = cache();
        let first = cache.allocate(256).unwrap();
        let second = cache.allocate(256).unwrap();
        assert!((first as usize) < (second as usize));
        cache.release(second).unwrap();
        cache.release(first).unwrap();

        assert_eq!(cache.allocate(256).unwrap(), first);
        assert_eq!(cache.allocate(256).unwrap(), second);
    }

    #[test]
    fn test_release_reuses_exact_block_without_fresh_allocation() {
        let (platform, cache) = cache();
        let big = cache.allocate(100).unwrap();
        cache.release(big).unwrap();

        // Smaller request, best fit lands on the cached 100 byte block.
        let again = cache.allocate(50).unwrap();
        assert_eq!(again, big);
        assert_eq!(platform.alloc_calls(), 1);
    }

    #[test]
    #[should_panic(expected = "not managed")]
    fn test_release_unknown_pointer_panics() {
        let (_, cache) = cache();
        cache.release(0xdead_beef_usize as *mut std::ffi::c_void).ok();
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_double_release_panics() {
        let (_, cache) = cache();
        let ptr = cache.allocate(32).unwrap();
        cache.release(ptr).unwrap();
        cache.release(ptr).ok();
    }

    #[test]
    fn test_pending_marker_blocks_reuse_until_drained() {
        let (platform, cache) = cache();

        let a = cache.allocate(64).unwrap();
        let marker = ManualMarker::new();
        cache.record_usage(a, marker.clone()).unwrap();
        cache.release(a).unwrap();

        // Registered but not reusable while the marker is outstanding.
        assert!(cache.is_managed(a));
        assert_eq!(cache.stats().pending_blocks, 1);
        let b = cache.allocate(64).unwrap();
        assert_ne!(a, b, "pending block must not be handed out");
        assert_eq!(platform.alloc_calls(), 2);

        // Completion alone changes nothing until a drain pass runs.
        marker.complete();
        cache.release(b).unwrap();

        let again = cache.allocate(64).unwrap();
        assert_eq!(again, a, "drained block reused, lowest address first");
    }

    #[test]
    fn test_marker_on_released_block_pulls_it_from_free_list() {
        let (platform, cache) = cache();
        let a = cache.allocate(128).unwrap();
        cache.release(a).unwrap();
        assert_eq!(cache.stats().available_blocks, 1);

        // Marker lands after the release (mid-release race).
        let marker = ManualMarker::new();
        cache.record_usage(a, marker.clone()).unwrap();
        assert_eq!(cache.stats().available_blocks, 0);
        assert_eq!(cache.stats().pending_blocks, 1);

        let b = cache.allocate(128).unwrap();
        assert_ne!(a, b);
        assert_eq!(platform.alloc_calls(), 2);

        marker.complete();
        cache.release(b).unwrap();
        assert_eq!(cache.allocate(128).unwrap(), a);
    }

    #[test]
    fn test_drain_stops_at_first_incomplete_marker() {
        let (_, cache) = cache();
        let a = cache.allocate(64).unwrap();

        let first = ManualMarker::new();
        let second = ManualMarker::new();
        second.complete();
        cache.record_usage(a, first.clone()).unwrap();
        cache.record_usage(a, second).unwrap();
        cache.release(a).unwrap();

        // Head of the queue is incomplete, so the completed second marker
        // must not have been popped.
        assert_eq!(cache.stats().pending_markers, 2);

        first.complete();
        let dummy = cache.allocate(8).unwrap();
        cache.release(dummy).unwrap();
        assert_eq!(cache.stats().pending_markers, 0);
        assert_eq!(cache.stats().pending_blocks, 0);
    }

    #[test]
    fn test_record_usage_unknown_pointer_ignored() {
        let (_, cache) = cache();
        let before = cache.stats();
        cache
            .record_usage(0x42_usize as *mut std::ffi::c_void, ManualMarker::new())
            .unwrap();
        assert_eq!(cache.stats(), before);
    }

    #[test]
    fn test_is_managed_foreign_pointer() {
        let (_, cache) = cache();
        let ptr = cache.allocate(16).unwrap();
        assert!(cache.is_managed(ptr));
        assert!(!cache.is_managed(0x1_usize as *mut std::ffi::c_void));
    }

    #[test]
    fn test_purge_frees_only_available_blocks() {
        let (platform, cache) = cache();

        let held = cache.allocate(100).unwrap();
        let pending = cache.allocate(200).unwrap();
        let marker = ManualMarker::new();
        cache.record_usage(pending, marker).unwrap();
        cache.release(pending).unwrap();
        let free = cache.allocate(300).unwrap();
        cache.release(free).unwrap();

        let freed = cache.purge_all().unwrap();
        assert_eq!(freed, 300);
        assert!(!cache.is_managed(free));
        assert!(cache.is_managed(held));
        assert!(cache.is_managed(pending));
        assert_eq!(platform.live_regions(), 2);
    }

    #[test]
    fn test_purge_idempotent() {
        let (_, cache) = cache();
        let a = cache.allocate(512).unwrap();
        cache.release(a).unwrap();

        assert_eq!(cache.purge_all().unwrap(), 512);
        let after_first = cache.stats();
        assert_eq!(cache.purge_all().unwrap(), 0);
        assert_eq!(cache.stats(), after_first);
    }

    #[test]
    fn test_registered_bytes_only_grow_without_purge() {
        let (_, cache) = cache();
        let a = cache.allocate(64).unwrap();
        let b = cache.allocate(128).unwrap();
        cache.release(a).unwrap();
        cache.release(b).unwrap();
        // Churn that hits the free list must not shrink the footprint.
        let c = cache.allocate(60).unwrap();
        cache.release(c).unwrap();
        assert_eq!(cache.stats().registered_bytes, 192);
    }
}
