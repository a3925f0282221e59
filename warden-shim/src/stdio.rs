//! `FILE*`-based stdio entry points, layered on top of [`crate::fs_hooks`].
//!
//! Buffering is intentionally absent — every `fread`/`fwrite` becomes one
//! `read`/`write` request. The cached `offset` field exists only so `ftell`
//! doesn't need its own round trip to the supervisor.

#![allow(unsafe_code, clippy::missing_safety_doc)]

use std::ffi::{CStr, VaList};
use std::os::raw::{c_char, c_int, c_void};

use crate::fs_hooks;

#[repr(C)]
pub struct ShimFile {
    fd: c_int,
    offset: i64,
    eof: bool,
    error: bool,
}

const STDIN_FD: c_int = 0;
const STDOUT_FD: c_int = 1;
const STDERR_FD: c_int = 2;

static STDIN: ShimFile = ShimFile {
    fd: STDIN_FD,
    offset: 0,
    eof: false,
    error: false,
};
static STDOUT: ShimFile = ShimFile {
    fd: STDOUT_FD,
    offset: 0,
    eof: false,
    error: false,
};
static STDERR: ShimFile = ShimFile {
    fd: STDERR_FD,
    offset: 0,
    eof: false,
    error: false,
};

#[unsafe(no_mangle)]
pub static mut stdin: *mut ShimFile = std::ptr::addr_of!(STDIN).cast_mut();
#[unsafe(no_mangle)]
pub static mut stdout: *mut ShimFile = std::ptr::addr_of!(STDOUT).cast_mut();
#[unsafe(no_mangle)]
pub static mut stderr: *mut ShimFile = std::ptr::addr_of!(STDERR).cast_mut();

/// Translates an `fopen`-style mode string into `open(2)` flags. Does not
/// recognize the `b`/`x`/`e`/`,ccs=` modifiers glibc accepts — targets in
/// this sandbox's scope don't need text/binary distinction or exclusive
/// creation signaling beyond what `O_EXCL` already gives `open`.
fn mode_to_flags(mode: &str) -> Option<i32> {
    let base = mode.trim_end_matches(['b', 'x', 'e', 't']);
    Some(match base {
        "r" => libc::O_RDONLY,
        "r+" => libc::O_RDWR,
        "w" => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        "w+" => libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
        "a" => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        "a+" => libc::O_RDWR | libc::O_CREAT | libc::O_APPEND,
        _ => return None,
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(pathname: *const c_char, mode: *const c_char) -> *mut ShimFile {
    if mode.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees a valid NUL-terminated mode string.
    let mode_str = unsafe { CStr::from_ptr(mode) }.to_string_lossy();
    let Some(flags) = mode_to_flags(&mode_str) else {
        unsafe {
            *libc::__errno_location() = libc::EINVAL;
        }
        return std::ptr::null_mut();
    };
    let Some(path) = (unsafe { fs_hooks::path_bytes(pathname) }) else {
        return std::ptr::null_mut();
    };
    let fd = fs_hooks::do_open(path, flags, 0o666);
    if fd < 0 {
        return std::ptr::null_mut();
    }
    Box::into_raw(Box::new(ShimFile {
        fd,
        offset: 0,
        eof: false,
        error: false,
    }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen64(pathname: *const c_char, mode: *const c_char) -> *mut ShimFile {
    // SAFETY: forwarded verbatim.
    unsafe { fopen(pathname, mode) }
}

fn is_static_stream(f: *mut ShimFile) -> bool {
    std::ptr::eq(f, std::ptr::addr_of!(STDIN))
        || std::ptr::eq(f, std::ptr::addr_of!(STDOUT))
        || std::ptr::eq(f, std::ptr::addr_of!(STDERR))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fclose(stream: *mut ShimFile) -> c_int {
    if stream.is_null() {
        return -1;
    }
    // SAFETY: `stream` is either one of the static streams (never closed
    // by the target) or a live `fopen` allocation, owned exclusively here.
    let fd = unsafe { (*stream).fd };
    let rc = fs_hooks::close(fd);
    if !is_static_stream(stream) {
        drop(unsafe { Box::from_raw(stream) });
    }
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fread(ptr: *mut c_void, size: usize, nmemb: usize, stream: *mut ShimFile) -> usize {
    if stream.is_null() || size == 0 || nmemb == 0 {
        return 0;
    }
    let total = size.saturating_mul(nmemb);
    // SAFETY: `stream` is a live `ShimFile`; `ptr` has room for `total` bytes.
    let n = unsafe { fs_hooks::read((*stream).fd, ptr, total) };
    if n < 0 {
        unsafe {
            (*stream).error = true;
        }
        return 0;
    }
    #[allow(clippy::cast_sign_loss)]
    let read_bytes = n as usize;
    unsafe {
        (*stream).offset += n as i64;
        if read_bytes < total {
            (*stream).eof = true;
        }
    }
    read_bytes / size
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fwrite(ptr: *const c_void, size: usize, nmemb: usize, stream: *mut ShimFile) -> usize {
    if stream.is_null() || size == 0 || nmemb == 0 {
        return 0;
    }
    let total = size.saturating_mul(nmemb);
    // SAFETY: `stream` is a live `ShimFile`; `ptr` has `total` readable bytes.
    let n = unsafe { fs_hooks::write((*stream).fd, ptr, total) };
    if n < 0 {
        unsafe {
            (*stream).error = true;
        }
        return 0;
    }
    unsafe {
        (*stream).offset += n as i64;
    }
    #[allow(clippy::cast_sign_loss)]
    let written = n as usize;
    written / size
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fseek(stream: *mut ShimFile, offset: libc::c_long, whence: c_int) -> c_int {
    if stream.is_null() {
        return -1;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    let fd = unsafe { (*stream).fd };
    let new_offset = fs_hooks::seek(fd, i64::from(offset), whence);
    if new_offset < 0 {
        return -1;
    }
    unsafe {
        (*stream).offset = new_offset;
        (*stream).eof = false;
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fseeko(stream: *mut ShimFile, offset: libc::off_t, whence: c_int) -> c_int {
    // SAFETY: forwarded verbatim.
    unsafe { fseek(stream, offset as libc::c_long, whence) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ftell(stream: *mut ShimFile) -> libc::c_long {
    if stream.is_null() {
        return -1;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    unsafe { (*stream).offset as libc::c_long }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ftello(stream: *mut ShimFile) -> libc::off_t {
    // SAFETY: forwarded verbatim.
    unsafe { ftell(stream) as libc::off_t }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rewind(stream: *mut ShimFile) {
    unsafe {
        fseek(stream, 0, libc::SEEK_SET);
        if !stream.is_null() {
            (*stream).error = false;
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn feof(stream: *mut ShimFile) -> c_int {
    if stream.is_null() {
        return 0;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    c_int::from(unsafe { (*stream).eof })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferror(stream: *mut ShimFile) -> c_int {
    if stream.is_null() {
        return 0;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    c_int::from(unsafe { (*stream).error })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clearerr(stream: *mut ShimFile) {
    if stream.is_null() {
        return;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    unsafe {
        (*stream).eof = false;
        (*stream).error = false;
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fileno(stream: *mut ShimFile) -> c_int {
    if stream.is_null() {
        unsafe {
            *libc::__errno_location() = libc::EBADF;
        }
        return -1;
    }
    // SAFETY: `stream` is a live `ShimFile`.
    unsafe { (*stream).fd }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgetc(stream: *mut ShimFile) -> c_int {
    let mut byte = 0u8;
    // SAFETY: `&mut byte` is a valid 1-byte buffer.
    let n = unsafe { fread(std::ptr::from_mut(&mut byte).cast(), 1, 1, stream) };
    if n == 1 { c_int::from(byte) } else { libc::EOF }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fputc(c: c_int, stream: *mut ShimFile) -> c_int {
    let byte = c as u8;
    // SAFETY: `&byte` is a valid 1-byte buffer.
    let n = unsafe { fwrite(std::ptr::from_ref(&byte).cast(), 1, 1, stream) };
    if n == 1 { c } else { libc::EOF }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgets(s: *mut c_char, size: c_int, stream: *mut ShimFile) -> *mut c_char {
    if s.is_null() || size <= 0 {
        return std::ptr::null_mut();
    }
    let capacity = (size - 1) as usize;
    let mut written = 0usize;
    while written < capacity {
        // SAFETY: `stream` is validated by `fgetc`.
        let c = unsafe { fgetc(stream) };
        if c == libc::EOF {
            if written == 0 {
                return std::ptr::null_mut();
            }
            break;
        }
        #[allow(clippy::cast_sign_loss)]
        unsafe {
            *s.add(written) = c as c_char;
        }
        written += 1;
        if c == i32::from(b'\n') {
            break;
        }
    }
    unsafe {
        *s.add(written) = 0;
    }
    s
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fputs(s: *const c_char, stream: *mut ShimFile) -> c_int {
    if s.is_null() {
        return libc::EOF;
    }
    // SAFETY: caller guarantees a valid NUL-terminated string.
    let bytes = unsafe { CStr::from_ptr(s) }.to_bytes();
    // SAFETY: `stream`/`bytes` both valid for the duration of this call.
    let n = unsafe { fwrite(bytes.as_ptr().cast(), 1, bytes.len(), stream) };
    if n == bytes.len() { 0 } else { libc::EOF }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn puts(s: *const c_char) -> c_int {
    // SAFETY: `stdout` points at the static `STDOUT` stream.
    let stream = unsafe { stdout };
    if unsafe { fputs(s, stream) } == libc::EOF {
        return libc::EOF;
    }
    let nl = b'\n';
    // SAFETY: `&nl` is a valid 1-byte buffer, `stream` is valid.
    unsafe { fwrite(std::ptr::from_ref(&nl).cast(), 1, 1, stream) };
    0
}

unsafe extern "C" {
    fn vsnprintf(buf: *mut c_char, size: usize, fmt: *const c_char, args: VaList) -> c_int;
}

/// Formats `fmt`/`args` through the linked libc `vsnprintf` (pure
/// formatting, no syscalls of its own — this crate never interposes it) and
/// writes the result through [`fwrite`]. This is the only place this crate
/// needs a true C variadic signature — `vsnprintf` itself takes a
/// `va_list`, not `...`.
unsafe fn format_and_write(stream: *mut ShimFile, fmt: *const c_char, args: VaList) -> c_int {
    let mut buf = vec![0u8; 4096];
    // SAFETY: `buf` has 4096 bytes, `fmt` is caller-guaranteed valid, `args`
    // is the caller's forwarded `va_list`.
    let len = unsafe { vsnprintf(buf.as_mut_ptr().cast(), buf.len(), fmt, args) };
    if len < 0 {
        return -1;
    }
    #[allow(clippy::cast_sign_loss)]
    let len = (len as usize).min(buf.len() - 1);
    // SAFETY: `stream`/`buf[..len]` are both valid for this call.
    let written = unsafe { fwrite(buf.as_ptr().cast(), 1, len, stream) };
    if written == len { len as c_int } else { -1 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn vfprintf(stream: *mut ShimFile, fmt: *const c_char, args: VaList) -> c_int {
    // SAFETY: delegated to `format_and_write`'s own preconditions.
    unsafe { format_and_write(stream, fmt, args) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn vprintf(fmt: *const c_char, args: VaList) -> c_int {
    // SAFETY: `stdout` points at the static `STDOUT` stream.
    unsafe { format_and_write(stdout, fmt, args) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fprintf(stream: *mut ShimFile, fmt: *const c_char, mut args: ...) -> c_int {
    // SAFETY: `args.as_va_list()` borrows the variadic list this call owns.
    unsafe { format_and_write(stream, fmt, args.as_va_list()) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn printf(fmt: *const c_char, mut args: ...) -> c_int {
    // SAFETY: `stdout` points at the static `STDOUT` stream.
    unsafe { format_and_write(stdout, fmt, args.as_va_list()) }
}
