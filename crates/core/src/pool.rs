//! Fixed-Size Pool Allocator with 32-bit Handles
//!
//! A `Pool` hands out fixed-size elements identified by compact 32-bit
//! handles instead of pointers. Virtual address space is reserved up
//! front in large regions; pages are committed as spans of elements are
//! claimed. Allocation is optimized for per-thread throughput:
//!
//! 1. pop from the thread-local free list, else
//! 2. bump-allocate from the thread's reserved span, else
//! 3. adopt a shared free list donated by another thread, else
//! 4. reserve a fresh span from the global region state (one CAS).
//!
//! Freed handles go to the thread-local free list; when that list
//! reaches a span's worth of elements it is donated to the shared
//! queue for other threads.
//!
//! ## Handle encoding
//!
//! ```text
//! handle = (index << REGION_BITS) | region
//! ```
//!
//! Handle 0 is null: region ids and element indexes both start at 1,
//! which also keeps combined handle hashes collision-free.
//!
//! Pools are process-lifetime objects. Dropping one leaks its regions;
//! create pools as statics (`Lazy<Pool>`).

use crossbeam::queue::SegQueue;
use std::cell::RefCell;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

/// Sentinel state while a thread reserves a new region.
const LOCKED_STATE: u32 = u32::MAX;

/// Default number of elements claimed per span reservation.
pub const ELEMS_PER_SPAN: u32 = 16384;

/// Upper bound on `region_bits`; the region-starts array is fixed size.
const MAX_REGION_BITS: u32 = 8;
const MAX_REGIONS: usize = 1 << MAX_REGION_BITS;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Per-thread allocation state for every pool in the process,
    // indexed by pool id.
    static POOL_TLS: RefCell<Vec<PerThread>> = const { RefCell::new(Vec::new()) };
}

/// A reference to one element in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(pub u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Free list threaded through element storage: the first four bytes of
/// a freed element hold the handle of the next free element.
#[derive(Default, Clone, Copy)]
struct FreeList {
    head: Handle,
    size: usize,
}

#[derive(Default, Clone, Copy)]
struct Span {
    region: u32,
    begin_index: u32,
    end_index: u32,
}

impl Span {
    #[inline]
    fn is_empty(&self) -> bool {
        self.begin_index == self.end_index
    }

    #[inline]
    fn alloc(&mut self, region_bits: u32) -> Handle {
        let h = Handle((self.begin_index << region_bits) | self.region);
        self.begin_index += 1;
        h
    }
}

#[derive(Default, Clone, Copy)]
struct PerThread {
    free: FreeList,
    span: Span,
}

/// Fixed-size-element slab allocator returning 32-bit handles.
pub struct Pool {
    id: usize,
    name: &'static str,
    elem_size: usize,
    region_bits: u32,
    elems_per_span: u32,
    // Packed (index << region_bits) | region; LOCKED_STATE while a
    // region is being reserved.
    state: AtomicU32,
    region_starts: Vec<AtomicPtr<u8>>,
    shared_free_lists: SegQueue<FreeList>,
}

// Safety: region pointers are only published once (under the locked
// state) and element slots are handed to exactly one owner at a time.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Create a pool of `elem_size`-byte elements.
    ///
    /// `region_bits` determines the number of regions (`2^region_bits`)
    /// and the capacity of each (`2^(32-region_bits)` elements).
    ///
    /// # Panics
    ///
    /// If `elem_size < 4` (free lists thread a handle through element
    /// storage) or `region_bits` is out of range.
    pub fn new(name: &'static str, elem_size: usize, region_bits: u32) -> Pool {
        assert!(
            elem_size >= std::mem::size_of::<u32>(),
            "pool element size must hold a handle"
        );
        assert!(region_bits >= 1 && region_bits <= MAX_REGION_BITS);
        let mut region_starts = Vec::with_capacity(MAX_REGIONS + 1);
        for _ in 0..=MAX_REGIONS {
            region_starts.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        Pool {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            elem_size,
            region_bits,
            elems_per_span: ELEMS_PER_SPAN,
            state: AtomicU32::new(0),
            region_starts,
            shared_free_lists: SegQueue::new(),
        }
    }

    #[inline]
    fn num_regions(&self) -> u32 {
        1 << self.region_bits
    }

    #[inline]
    fn max_index(&self) -> u32 {
        ((1u64 << (32 - self.region_bits)) - 1) as u32
    }

    #[inline]
    fn elems_per_region(&self) -> u64 {
        1u64 << (32 - self.region_bits)
    }

    /// Resolve a handle to its element storage.
    ///
    /// The handle must have been produced by `allocate` on this pool
    /// and not yet freed.
    #[inline]
    pub fn get_ptr(&self, h: Handle) -> *mut u8 {
        debug_assert!(!h.is_null());
        let region = (h.0 & (self.num_regions() - 1)) as usize;
        let index = (h.0 >> self.region_bits) as usize;
        let base = self.region_starts[region].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "handle into unreserved region");
        unsafe { base.add(index * self.elem_size) }
    }

    /// Allocate one element, returning its handle. The storage is
    /// uninitialized.
    pub fn allocate(&self) -> Handle {
        POOL_TLS.with(|tls| {
            let mut tls = tls.borrow_mut();
            if tls.len() <= self.id {
                tls.resize_with(self.id + 1, PerThread::default);
            }
            let t = &mut tls[self.id];

            if !t.free.head.is_null() {
                return self.pop_free(&mut t.free);
            }
            if !t.span.is_empty() {
                return t.span.alloc(self.region_bits);
            }
            if let Some(list) = self.shared_free_lists.pop() {
                t.free = list;
                return self.pop_free(&mut t.free);
            }
            self.reserve_span(&mut t.span);
            t.span.alloc(self.region_bits)
        })
    }

    /// Return an element to the pool. The caller must not touch the
    /// storage afterwards.
    pub fn free(&self, h: Handle) {
        debug_assert!(!h.is_null());
        POOL_TLS.with(|tls| {
            let mut tls = tls.borrow_mut();
            if tls.len() <= self.id {
                tls.resize_with(self.id + 1, PerThread::default);
            }
            let t = &mut tls[self.id];
            self.push_free(&mut t.free, h);
            if t.free.size >= self.elems_per_span as usize {
                self.shared_free_lists.push(t.free);
                t.free = FreeList::default();
            }
        })
    }

    #[inline]
    fn pop_free(&self, list: &mut FreeList) -> Handle {
        let h = list.head;
        let p = self.get_ptr(h) as *const u32;
        // Safety: freed elements store the next free handle in their
        // first four bytes; see push_free.
        list.head = Handle(unsafe { p.read() });
        list.size -= 1;
        h
    }

    #[inline]
    fn push_free(&self, list: &mut FreeList, h: Handle) {
        let p = self.get_ptr(h) as *mut u32;
        unsafe { p.write(list.head.0) };
        list.head = h;
        list.size += 1;
    }

    // Claim up to elems_per_span elements from the current region,
    // transitioning through the locked state when a region boundary is
    // crossed.
    fn reserve_span(&self, out: &mut Span) {
        // First-ever reservation initializes region 1. Indexes start at
        // 1 so handle 0 stays null.
        if self.state.load(Ordering::Relaxed) == 0
            && self
                .state
                .compare_exchange(0, LOCKED_STATE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let bytes = self.elems_per_region() as usize * self.elem_size;
            self.region_starts[1].store(vm::reserve(bytes, self.name), Ordering::Release);
            self.state
                .store(Self::pack(1, 1, self.region_bits), Ordering::Release);
        }

        let mut state;
        let new_state;
        loop {
            state = self.state.load(Ordering::Relaxed);
            if state == LOCKED_STATE || state == 0 {
                std::thread::yield_now();
                continue;
            }
            let (region, index) = Self::unpack(state, self.region_bits);
            let avail = self.max_index() - index + 1;
            let proposed = if avail <= self.elems_per_span {
                LOCKED_STATE
            } else {
                Self::pack(region, index + self.elems_per_span, self.region_bits)
            };
            if self
                .state
                .compare_exchange_weak(state, proposed, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                new_state = proposed;
                break;
            }
        }

        let (region, begin_index) = Self::unpack(state, self.region_bits);
        let end_index;
        if new_state == LOCKED_STATE {
            // We took the lock; reserve the next region and unlock.
            let next_region = region + 1;
            if next_region > self.num_regions() {
                panic!("pool '{}' exhausted all {} regions", self.name, self.num_regions());
            }
            let bytes = self.elems_per_region() as usize * self.elem_size;
            self.region_starts[next_region as usize]
                .store(vm::reserve(bytes, self.name), Ordering::Release);
            self.state
                .store(Self::pack(next_region, 1, self.region_bits), Ordering::Release);
            end_index = self.max_index();
        } else {
            let (_, next_index) = Self::unpack(new_state, self.region_bits);
            end_index = next_index;
        }

        out.region = region;
        out.begin_index = begin_index;
        out.end_index = end_index;

        // Commit the span's pages read/write before use.
        let start = self.get_ptr(Handle((begin_index << self.region_bits) | region));
        let len = (end_index - begin_index) as usize * self.elem_size;
        vm::commit(start, len);
    }

    #[inline]
    fn pack(region: u32, index: u32, region_bits: u32) -> u32 {
        (index << region_bits) | region
    }

    #[inline]
    fn unpack(state: u32, region_bits: u32) -> (u32, u32) {
        (state & ((1 << region_bits) - 1), state >> region_bits)
    }
}

/// Virtual-memory helpers: reserve a large range without committing
/// it, then commit page ranges as spans are claimed.
mod vm {
    #[cfg(unix)]
    pub fn reserve(bytes: usize, name: &str) -> *mut u8 {
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            panic!("pool '{name}': failed to reserve {bytes} bytes of address space");
        }
        p as *mut u8
    }

    #[cfg(unix)]
    pub fn commit(start: *mut u8, len: usize) {
        if len == 0 {
            return;
        }
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let addr = start as usize;
        let aligned = addr & !(page - 1);
        let span = addr + len - aligned;
        let rc = unsafe {
            libc::mprotect(
                aligned as *mut libc::c_void,
                span,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            panic!("pool commit failed: mprotect returned {rc}");
        }
    }

    // Without virtual-memory reservation, commit the whole region
    // eagerly as zeroed heap memory.
    #[cfg(not(unix))]
    pub fn reserve(bytes: usize, name: &str) -> *mut u8 {
        let layout = std::alloc::Layout::from_size_align(bytes, 16).expect("bad region layout");
        let p = unsafe { std::alloc::alloc_zeroed(layout) };
        if p.is_null() {
            panic!("pool '{name}': failed to allocate {bytes} bytes");
        }
        p
    }

    #[cfg(not(unix))]
    pub fn commit(_start: *mut u8, _len: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::collections::HashSet;

    static SMALL_POOL: Lazy<Pool> = Lazy::new(|| Pool::new("test-small", 16, 8));

    #[test]
    fn test_null_handle() {
        assert!(Handle::NULL.is_null());
        assert!(!Handle(1).is_null());
    }

    #[test]
    fn test_allocate_returns_distinct_handles() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let h = SMALL_POOL.allocate();
            assert!(!h.is_null());
            assert!(seen.insert(h), "duplicate live handle {h:?}");
        }
        for h in seen {
            SMALL_POOL.free(h);
        }
    }

    #[test]
    fn test_free_then_reuse() {
        let h = SMALL_POOL.allocate();
        let p = SMALL_POOL.get_ptr(h);
        unsafe { p.write_bytes(0xAB, 16) };
        SMALL_POOL.free(h);
        // The thread-local free list serves the most recent free first.
        let h2 = SMALL_POOL.allocate();
        assert_eq!(h, h2);
        SMALL_POOL.free(h2);
    }

    #[test]
    fn test_storage_is_writable_and_stable() {
        let a = SMALL_POOL.allocate();
        let b = SMALL_POOL.allocate();
        unsafe {
            (SMALL_POOL.get_ptr(a) as *mut u64).write(0x1111);
            (SMALL_POOL.get_ptr(b) as *mut u64).write(0x2222);
            assert_eq!((SMALL_POOL.get_ptr(a) as *const u64).read(), 0x1111);
            assert_eq!((SMALL_POOL.get_ptr(b) as *const u64).read(), 0x2222);
        }
        SMALL_POOL.free(a);
        SMALL_POOL.free(b);
    }

    #[test]
    fn test_random_alloc_free_churn() {
        use rand::{Rng, SeedableRng, rngs::StdRng};
        static POOL: Lazy<Pool> = Lazy::new(|| Pool::new("test-churn", 16, 8));
        let mut rng = StdRng::seed_from_u64(42);
        let mut live: Vec<Handle> = Vec::new();
        for _ in 0..50_000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let h = POOL.allocate();
                unsafe { (POOL.get_ptr(h) as *mut u32).write(h.0) };
                live.push(h);
            } else {
                let i = rng.gen_range(0..live.len());
                let h = live.swap_remove(i);
                // Storage content survives until the free.
                assert_eq!(unsafe { (POOL.get_ptr(h) as *const u32).read() }, h.0);
                POOL.free(h);
            }
        }
        for h in live {
            POOL.free(h);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_concurrent_allocation_yields_unique_handles() {
        static POOL: Lazy<Pool> = Lazy::new(|| Pool::new("test-concurrent", 8, 8));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let mut out = Vec::with_capacity(5000);
                    for _ in 0..5000 {
                        out.push(POOL.allocate());
                    }
                    out
                })
            })
            .collect();
        let mut all = HashSet::new();
        for t in threads {
            for h in t.join().unwrap() {
                assert!(all.insert(h), "handle {h:?} issued twice");
            }
        }
        assert_eq!(all.len(), 20000);
    }

    #[test]
    fn test_spans_cross_into_new_regions() {
        // Region bits 8 on a tiny element still exercises the packing
        // math; verify indexes never collide with the null handle.
        static POOL: Lazy<Pool> = Lazy::new(|| Pool::new("test-region", 8, 8));
        for _ in 0..3 {
            let h = POOL.allocate();
            assert_ne!(h, Handle::NULL);
            POOL.free(h);
        }
    }
}
