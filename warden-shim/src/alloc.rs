//! The shim's global allocator.
//!
//! After the strict filter engages, the only syscalls left are `read`,
//! `write`, `exit`, and `rt_sigreturn` — glibc's heap would try to extend
//! the program break via `brk`/`mmap` on the first allocation past what's
//! already mapped and get the thread killed. [`bootstrap`](crate::bootstrap)
//! claims a large virtual region with `sbrk` before lockdown; this
//! allocator then serves every request purely out of that region, no
//! syscalls involved. It never reclaims memory — a bump allocator is the
//! simplest backing store that satisfies the no-syscalls-after-lockdown
//! constraint, and the spec treats the allocator's internal algorithm as
//! out of scope.

#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout};
use std::cell::UnsafeCell;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Used for any allocation before [`BumpAllocator::reserve`] has run —
/// static initializers, and the bootstrap constructor's own locals.
const FALLBACK_SIZE: usize = 1024 * 1024;

struct Fallback(UnsafeCell<[u8; FALLBACK_SIZE]>);
// SAFETY: the whole shim runs under the single-thread precondition
// verified by `bootstrap::checked_thread_count`.
unsafe impl Sync for Fallback {}

static FALLBACK: Fallback = Fallback(UnsafeCell::new([0u8; FALLBACK_SIZE]));

/// A bump allocator over a region claimed once via `sbrk`, falling back to
/// a static buffer until that region is reserved.
pub struct BumpAllocator {
    region: AtomicPtr<u8>,
    limit: AtomicUsize,
    cursor: AtomicUsize,
}

impl BumpAllocator {
    pub const fn new() -> Self {
        Self {
            region: AtomicPtr::new(std::ptr::null_mut()),
            limit: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Points the allocator at `base..base+len` and resets the cursor.
    /// Called once by bootstrap right after `sbrk` hands back the region.
    pub fn reserve(&self, base: *mut u8, len: usize) {
        self.region.store(base, Ordering::SeqCst);
        self.limit.store(len, Ordering::SeqCst);
        self.cursor.store(0, Ordering::SeqCst);
    }

    fn active_region(&self) -> (*mut u8, usize) {
        let base = self.region.load(Ordering::SeqCst);
        if base.is_null() {
            (FALLBACK.0.get().cast::<u8>(), FALLBACK_SIZE)
        } else {
            (base, self.limit.load(Ordering::SeqCst))
        }
    }
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `GlobalAlloc` requires `Sync`; every call happens on the single
// thread the strict filter protects.
unsafe impl Sync for BumpAllocator {}

// SAFETY: `alloc`/`dealloc` never dereference pointers outside the region
// returned by `active_region`, whose length is tracked alongside it.
unsafe impl GlobalAlloc for BumpAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let (base, limit) = self.active_region();
        let align = layout.align().max(1);
        loop {
            let current = self.cursor.load(Ordering::SeqCst);
            let aligned = current.next_multiple_of(align);
            let Some(next) = aligned.checked_add(layout.size()) else {
                return std::ptr::null_mut();
            };
            if next > limit {
                return std::ptr::null_mut();
            }
            if self
                .cursor
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // SAFETY: `aligned + layout.size() <= limit`, within `base`'s region.
                return unsafe { base.add(aligned) };
            }
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // Bump allocators don't reclaim; the reserved region is sized to
        // outlive the sandboxed process.
    }
}

/// Raw `sbrk(2)` via direct syscall-free libc call — still permitted
/// before the strict filter engages.
pub fn sbrk(increment: isize) -> *mut c_void {
    // SAFETY: `sbrk` takes no pointers; glibc still exposes it pre-lockdown.
    unsafe { libc::sbrk(increment) }
}
