//! Everything the target might call that isn't file I/O: threading,
//! signals, time, identity, process control. Under strict-mode seccomp
//! none of these can make their real syscall, so each one either answers
//! from bootstrap-cached state, behaves as a harmless single-threaded
//! no-op, or logs itself as unimplemented and fails softly.

#![allow(unsafe_code, clippy::missing_safety_doc)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_long, c_void};

use warden_proto::Request;

use crate::{ipc, state};

fn set_errno(value: i32) {
    // SAFETY: `__errno_location` always returns a valid, thread-local cell.
    unsafe {
        *libc::__errno_location() = value;
    }
}

// --- identity -------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn getuid() -> libc::uid_t {
    1
}

#[unsafe(no_mangle)]
pub extern "C" fn geteuid() -> libc::uid_t {
    1
}

#[unsafe(no_mangle)]
pub extern "C" fn getgid() -> libc::gid_t {
    1
}

#[unsafe(no_mangle)]
pub extern "C" fn getegid() -> libc::gid_t {
    1
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gethostname(name: *mut c_char, len: usize) -> c_int {
    if name.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    let host = b"localhost\0";
    if host.len() > len {
        set_errno(libc::ENAMETOOLONG);
        return -1;
    }
    // SAFETY: `name` has room for at least `host.len()` bytes, just checked.
    unsafe {
        std::ptr::copy_nonoverlapping(host.as_ptr(), name.cast::<u8>(), host.len());
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getcwd(buf: *mut c_char, size: usize) -> *mut c_char {
    let cwd = state::cache().cwd.as_bytes();
    if cwd.len() + 1 > size {
        set_errno(libc::ERANGE);
        return std::ptr::null_mut();
    }
    // SAFETY: `buf` has room for `cwd.len() + 1` bytes, just checked.
    unsafe {
        std::ptr::copy_nonoverlapping(cwd.as_ptr(), buf.cast::<u8>(), cwd.len());
        *buf.add(cwd.len()) = 0;
    }
    buf
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readlink(pathname: *const c_char, buf: *mut c_char, bufsiz: usize) -> isize {
    if pathname.is_null() || buf.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    // SAFETY: caller guarantees a valid NUL-terminated path string.
    let path = unsafe { CStr::from_ptr(pathname) }.to_bytes();
    if path != b"/proc/self/exe" {
        crate::log::unimplemented("readlink (only /proc/self/exe is answered)");
        set_errno(libc::ENOENT);
        return -1;
    }
    let exe = state::cache().exe_path.as_bytes();
    let n = exe.len().min(bufsiz);
    // SAFETY: `buf` has `bufsiz` bytes, `n <= bufsiz`.
    unsafe {
        std::ptr::copy_nonoverlapping(exe.as_ptr(), buf.cast::<u8>(), n);
    }
    isize::try_from(n).unwrap_or(-1)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realpath(path: *const c_char, resolved_path: *mut c_char) -> *mut c_char {
    if path.is_null() {
        set_errno(libc::EFAULT);
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees a valid NUL-terminated path string.
    let raw = unsafe { CStr::from_ptr(path) }.to_string_lossy();
    let joined = if raw.starts_with('/') {
        raw.into_owned()
    } else {
        format!("{}/{}", state::cache().cwd, raw)
    };
    if joined.len() + 1 > libc::PATH_MAX as usize {
        set_errno(libc::ENAMETOOLONG);
        return std::ptr::null_mut();
    }
    let out = if resolved_path.is_null() {
        // SAFETY: `libc::malloc` with a positive size returns a writable
        // buffer of at least that size, or null on allocation failure.
        unsafe { libc::malloc(joined.len() + 1).cast::<c_char>() }
    } else {
        resolved_path
    };
    if out.is_null() {
        set_errno(libc::ENOMEM);
        return std::ptr::null_mut();
    }
    // SAFETY: `out` has room for `joined.len() + 1` bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(joined.as_ptr(), out.cast::<u8>(), joined.len());
        *out.add(joined.len()) = 0;
    }
    out
}

// --- isatty / terminal ----------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn isatty(fd: c_int) -> c_int {
    c_int::from((0..=2).contains(&fd))
}

// --- time --------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn time(tloc: *mut libc::time_t) -> libc::time_t {
    if !tloc.is_null() {
        unsafe {
            *tloc = 0;
        }
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clock_gettime(_clk_id: libc::clockid_t, tp: *mut libc::timespec) -> c_int {
    if tp.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    unsafe {
        (*tp).tv_sec = 0;
        (*tp).tv_nsec = 0;
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn sysconf(name: c_int) -> c_long {
    if name == libc::_SC_CLK_TCK {
        return state::cache().clk_tck;
    }
    // SAFETY: `sysconf` with a known name performs no syscall that strict
    // mode forbids for constants the kernel doesn't actually need to query.
    unsafe { libc::sysconf(name) }
}

// --- fork/exec -----------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn fork() -> libc::pid_t {
    crate::log::unimplemented("fork");
    set_errno(libc::ENOSYS);
    -1
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn execve(
    _pathname: *const c_char,
    _argv: *const *mut c_char,
    _envp: *const *mut c_char,
) -> c_int {
    crate::log::unimplemented("execve");
    set_errno(libc::ENOSYS);
    -1
}

// --- signals (no-ops) -------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn signal(_signum: c_int, handler: libc::sighandler_t) -> libc::sighandler_t {
    handler
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sigaction(
    _signum: c_int,
    _act: *const libc::sigaction,
    _oldact: *mut libc::sigaction,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn raise(_sig: c_int) -> c_int {
    0
}

// --- threads (single-threaded process, so these mostly succeed trivially) --

#[unsafe(no_mangle)]
pub extern "C" fn pthread_create(
    _thread: *mut libc::pthread_t,
    _attr: *const libc::pthread_attr_t,
    _start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    _arg: *mut c_void,
) -> c_int {
    crate::log::unimplemented("pthread_create");
    libc::EAGAIN
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_mutex_init(
    _mutex: *mut libc::pthread_mutex_t,
    _attr: *const libc::pthread_mutexattr_t,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_mutex_lock(_mutex: *mut libc::pthread_mutex_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_mutex_unlock(_mutex: *mut libc::pthread_mutex_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_mutex_destroy(_mutex: *mut libc::pthread_mutex_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_cond_wait(_cond: *mut libc::pthread_cond_t, _mutex: *mut libc::pthread_mutex_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_cond_signal(_cond: *mut libc::pthread_cond_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_cond_broadcast(_cond: *mut libc::pthread_cond_t) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_once(
    once_control: *mut libc::pthread_once_t,
    init_routine: extern "C" fn(),
) -> c_int {
    if once_control.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: single-threaded process; no race on the guard byte.
    unsafe {
        let guard = once_control.cast::<u8>();
        if *guard == 0 {
            *guard = 1;
            init_routine();
        }
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_key_create(
    key: *mut libc::pthread_key_t,
    _destructor: Option<extern "C" fn(*mut c_void)>,
) -> c_int {
    static NEXT: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
    let slot = NEXT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    if slot as usize >= 16 {
        return libc::EAGAIN;
    }
    if key.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: `key` is a valid, writable `pthread_key_t` out-param.
    unsafe {
        *key = slot;
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_setspecific(key: libc::pthread_key_t, value: *const c_void) -> c_int {
    state::tls_set(key as usize, value.cast_mut());
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_getspecific(key: libc::pthread_key_t) -> *mut c_void {
    state::tls_get(key as usize)
}

#[unsafe(no_mangle)]
pub extern "C" fn pthread_self() -> libc::pthread_t {
    1
}

// --- select(2), needed for interactive stdin polling -------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn select(
    nfds: c_int,
    readfds: *mut libc::fd_set,
    writefds: *mut libc::fd_set,
    exceptfds: *mut libc::fd_set,
    timeout: *mut libc::timeval,
) -> c_int {
    let watching_stdin = nfds > 0
        && !readfds.is_null()
        // SAFETY: `readfds` just checked non-null, caller guarantees init.
        && unsafe { libc::FD_ISSET(0, readfds) };
    if !watching_stdin {
        crate::log::unimplemented("select (fd set other than stdin)");
        set_errno(libc::ENOSYS);
        return -1;
    }
    let timeout_ms = if timeout.is_null() {
        -1
    } else {
        // SAFETY: `timeout` just checked non-null.
        let t = unsafe { *timeout };
        t.tv_sec * 1000 + t.tv_usec / 1000
    };
    match ipc::call(Request::SelectStdin { timeout_ms }) {
        warden_proto::Reply::SelectStdin { code, is_set } => {
            if code >= 0 {
                // SAFETY: `readfds` was validated non-null above.
                unsafe {
                    libc::FD_ZERO(readfds);
                    if is_set != 0 {
                        libc::FD_SET(0, readfds);
                    }
                    if !writefds.is_null() {
                        libc::FD_ZERO(writefds);
                    }
                    if !exceptfds.is_null() {
                        libc::FD_ZERO(exceptfds);
                    }
                }
            }
            code
        }
        _ => unreachable!("SELECT_STDIN always replies with Reply::SelectStdin"),
    }
}
