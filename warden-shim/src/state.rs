//! Process-wide state the shim needs after its constructor returns.
//!
//! Everything here is a plain static guarded only by the single-thread
//! precondition — there is never a second thread to race with.

#![allow(unsafe_code)]

use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::alloc::BumpAllocator;

#[global_allocator]
static ALLOCATOR: BumpAllocator = BumpAllocator::new();

pub fn allocator() -> &'static BumpAllocator {
    &ALLOCATOR
}

/// The child's end of the request pipe (write) and reply pipe (read).
static REQUEST_FD: AtomicI32 = AtomicI32::new(-1);
static REPLY_FD: AtomicI32 = AtomicI32::new(-1);
static IN_SECCOMP: AtomicBool = AtomicBool::new(false);

pub fn set_pipes(request_fd: i32, reply_fd: i32) {
    REQUEST_FD.store(request_fd, Ordering::SeqCst);
    REPLY_FD.store(reply_fd, Ordering::SeqCst);
}

pub fn request_fd() -> i32 {
    REQUEST_FD.load(Ordering::SeqCst)
}

pub fn reply_fd() -> i32 {
    REPLY_FD.load(Ordering::SeqCst)
}

pub fn mark_in_seccomp() {
    IN_SECCOMP.store(true, Ordering::SeqCst);
}

pub fn in_seccomp() -> bool {
    IN_SECCOMP.load(Ordering::SeqCst)
}

/// Values pre-touched before lockdown because computing them afterward
/// would need a syscall the strict filter forbids.
pub struct BootstrapCache {
    pub clk_tck: i64,
    pub cwd: String,
    pub exe_path: String,
}

static mut CACHE: Option<BootstrapCache> = None;

pub fn install_cache(cache: BootstrapCache) {
    // SAFETY: called exactly once from bootstrap, before any other thread
    // could exist (threads are a hard precondition violation anyway).
    unsafe {
        (&raw mut CACHE).write(Some(cache));
    }
}

pub fn cache() -> &'static BootstrapCache {
    // SAFETY: `install_cache` runs before any caller can observe this.
    unsafe { (*(&raw const CACHE)).as_ref().expect("bootstrap cache not installed") }
}

/// Thread-local storage emulation: the sandboxed process is single-threaded
/// by precondition, so a small shared array stands in for per-thread slots.
const TLS_SLOTS: usize = 16;
static mut TLS: [*mut c_void; TLS_SLOTS] = [std::ptr::null_mut(); TLS_SLOTS];

pub fn tls_get(key: usize) -> *mut c_void {
    if key >= TLS_SLOTS {
        return std::ptr::null_mut();
    }
    // SAFETY: single-threaded, `key` is bounds-checked above.
    unsafe { (*(&raw const TLS))[key] }
}

pub fn tls_set(key: usize, value: *mut c_void) -> bool {
    if key >= TLS_SLOTS {
        return false;
    }
    // SAFETY: single-threaded, `key` is bounds-checked above.
    unsafe {
        (*(&raw mut TLS))[key] = value;
    }
    true
}
