//! One-time constructor logic that must run before the target's entry
//! point, in a single-threaded process, with the strict filter not yet
//! engaged.
//!
//! Anything that would perform a disallowed syscall after lockdown has to
//! happen here instead: resolving symbols, growing the heap, caching
//! locale/cwd/exe-path data the stub surface answers from memory later.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use warden_proto::Request;

use crate::{alloc, ipc, state};

/// Matches `MAX_VIRTUAL_MEM` in the original sandbox's heap-reservation
/// step: the virtual region the bump allocator is bounded to.
const MAX_VIRTUAL_MEM: isize = 500 * 1024 * 1024;

const PR_SET_SECCOMP: c_int = 22;
const SECCOMP_MODE_STRICT: libc::c_ulong = 1;

fn fatal(msg: &str) -> ! {
    crate::log::display("FATAL", msg);
    // SAFETY: `SYS_exit` takes only an integer status.
    unsafe {
        libc::syscall(libc::SYS_exit, 1);
    }
    unreachable!("SYS_exit does not return")
}

/// Reads `/proc/self/status`'s `Threads:` field. The kernel strict filter
/// only protects the thread that enters it, so a second thread would be an
/// escape hatch — bootstrap refuses to proceed if this isn't exactly 1.
fn thread_count() -> i64 {
    let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|rest| rest.trim().parse().ok())
        .unwrap_or(-1)
}

fn parse_pipe_env(name: &str) -> Option<i32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

extern "C" fn on_exit_handler(_status: c_int, _arg: *mut c_void) {
    // The C runtime's normal teardown path is not guaranteed syscall-free;
    // go straight to `_exit` instead.
    // SAFETY: `SYS_exit` takes only an integer status.
    unsafe {
        libc::syscall(libc::SYS_exit, 0);
    }
}

/// Forces libc's one-time `/proc/meminfo` read inside `qsort`'s merge-sort
/// fallback, which would otherwise happen lazily on the target's first
/// real sort call, after lockdown.
fn pretouch_qsort() {
    extern "C" fn cmp(a: *const c_void, b: *const c_void) -> c_int {
        // SAFETY: both point at `i32`s from the array below.
        unsafe { (*a.cast::<i32>()).cmp(&*b.cast::<i32>()) as c_int }
    }
    let mut dummy = [3i32, 1, 2];
    // SAFETY: `dummy` is a valid 3-element array, `cmp` has the right signature.
    unsafe {
        libc::qsort(
            dummy.as_mut_ptr().cast(),
            dummy.len(),
            std::mem::size_of::<i32>(),
            cmp,
        );
    }
}

fn cached_cwd() -> String {
    std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn cached_exe_path() -> String {
    std::fs::read_link("/proc/self/exe")
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn cached_clk_tck() -> i64 {
    // SAFETY: `sysconf` with a recognized name has no precondition.
    unsafe { libc::sysconf(libc::_SC_CLK_TCK) }
}

fn maybe_wait() {
    if let Ok(secs) = std::env::var("WAIT") {
        if let Ok(secs) = secs.parse::<u32>() {
            // SAFETY: plain libc call, no pointers.
            unsafe {
                libc::sleep(secs);
            }
        }
    }
}

/// Pre-loads the shared objects and symbols a statically-unknown target
/// may later look up via `dlopen`/`dlsym`, driven by env vars instead of a
/// hard-coded per-target list — this shim wraps whatever binary is named
/// on the command line, not one fixed interpreter.
fn resolve_symbol_tables() {
    let Ok(libs) = std::env::var("WARDEN_PRELOAD_LIBS") else {
        return;
    };
    for lib_name in libs.split(':').filter(|s| !s.is_empty()) {
        let Ok(cpath) = CString::new(lib_name) else {
            continue;
        };
        // SAFETY: `cpath` is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW) };
        crate::dlhook::register_lib(lib_name, handle);
    }
    if let Ok(syms) = std::env::var("WARDEN_PRELOAD_SYMS") {
        for pair in syms.split(':').filter(|s| !s.is_empty()) {
            let Some((lib_name, sym_name)) = pair.split_once("::") else {
                continue;
            };
            let Some(handle) = crate::dlhook::lib_handle(lib_name) else {
                continue;
            };
            let Ok(csym) = CString::new(sym_name) else {
                continue;
            };
            // SAFETY: `handle` came from a successful `dlopen` above, `csym` is valid.
            let ptr = unsafe { libc::dlsym(handle, csym.as_ptr()) };
            crate::dlhook::register_sym(lib_name, sym_name, ptr);
        }
    }
}

/// Runs once, before the target's own entry point.
extern "C" fn init() {
    // Step 1: the supervisor already set `FD_CLOEXEC` on its own ends, so
    // unlike the original sandbox's comma-encoded sibling-fd trick, these
    // env vars carry a plain fd number each.
    let Some(pipe_in) = parse_pipe_env("PIPE_IN") else {
        fatal("PIPE_IN not set");
    };
    let Some(pipe_out) = parse_pipe_env("PIPE_OUT") else {
        fatal("PIPE_OUT not set");
    };
    state::set_pipes(pipe_out, pipe_in);

    // Step 2.
    if thread_count() != 1 {
        fatal("thread count is not 1");
    }

    // Step 3.
    // SAFETY: `on_exit_handler` matches glibc's expected signature.
    unsafe {
        libc::on_exit(on_exit_handler, std::ptr::null_mut());
    }

    // Step 4: remember the current break, then claim the reserved region.
    let before = alloc::sbrk(0);
    let region = alloc::sbrk(MAX_VIRTUAL_MEM);
    if region == usize::MAX as *mut c_void || before == usize::MAX as *mut c_void {
        fatal("failed to reserve heap region");
    }
    #[allow(clippy::cast_sign_loss)]
    state::allocator().reserve(region.cast(), MAX_VIRTUAL_MEM as usize);

    // Step 5.
    pretouch_qsort();
    let clk_tck = cached_clk_tck();
    let cwd = cached_cwd();
    let exe_path = cached_exe_path();
    // SAFETY: forces the one-time load of the current locale's data.
    unsafe {
        libc::localeconv();
    }
    state::install_cache(state::BootstrapCache {
        clk_tck,
        cwd,
        exe_path,
    });
    maybe_wait();
    resolve_symbol_tables();

    // Step 6.
    if std::env::var("DISABLE_SECCOMP").is_ok() {
        crate::log::display("INFO", "seccomp disabled via DISABLE_SECCOMP");
    } else {
        // SAFETY: `prctl` with these arguments has no pointer preconditions.
        let rc = unsafe { libc::prctl(PR_SET_SECCOMP, SECCOMP_MODE_STRICT, 0, 0, 0) };
        if rc != 0 {
            fatal("failed to engage strict-mode seccomp");
        }
        crate::log::display("INFO", "strict-mode seccomp engaged");
    }
    ipc::notify(Request::HasSwitchedToSeccomp);
    state::mark_in_seccomp();

    // Step 7.
    crate::dlhook::install();
}

#[used]
#[unsafe(link_section = ".init_array")]
static INIT_ARRAY_ENTRY: extern "C" fn() = init;

/// Helper shared with [`crate::dlhook`] for building a `*const c_char`
/// from a Rust string slice that must outlive the call.
pub fn with_cstr<R>(s: &str, f: impl FnOnce(*const c_char) -> R) -> Option<R> {
    CString::new(s).ok().map(|c| f(c.as_ptr()))
}

/// An atomic-pointer slot, used by the fixed-capacity tables in
/// [`crate::dlhook`].
pub type AtomicHandle = AtomicPtr<c_void>;

pub fn null_handle() -> AtomicHandle {
    AtomicPtr::new(std::ptr::null_mut())
}

pub fn c_str_eq(a: *const c_char, b: &str) -> bool {
    if a.is_null() {
        return false;
    }
    // SAFETY: the caller (glibc's dlopen/dlsym machinery) always passes a
    // valid NUL-terminated string here.
    let a = unsafe { CStr::from_ptr(a) };
    a.to_bytes() == b.as_bytes()
}
