//! Interposed file/directory entry points.
//!
//! Every override here is exported under its libc name so the dynamic
//! loader's symbol search finds this shim's version first. Each one:
//! validates argument size locally, frames the matching command to the
//! supervisor, and mirrors its reply (return value + `errno`) into the
//! caller's view.

#![allow(unsafe_code, clippy::missing_safety_doc)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

use warden_proto::{MAX_PATH_LEN, Request};

use crate::ipc;

fn set_errno(value: i32) {
    // SAFETY: `__errno_location` always returns a valid, thread-local cell.
    unsafe {
        *libc::__errno_location() = value;
    }
}

pub(crate) unsafe fn path_bytes(path: *const c_char) -> Option<Vec<u8>> {
    if path.is_null() {
        return None;
    }
    // SAFETY: caller guarantees `path` is a valid NUL-terminated string,
    // per every libc function that accepts a `const char *` path.
    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes().to_vec();
    if bytes.len() > MAX_PATH_LEN {
        set_errno(libc::ENAMETOOLONG);
        return None;
    }
    Some(bytes)
}

/// Shared core of `open`/`open64`/`creat`/`fopen`: returns the new fd, or a
/// negative value with `errno` already set.
pub(crate) fn do_open(path: Vec<u8>, flags: i32, mode: u32) -> c_int {
    match ipc::call(Request::Open { path, flags, mode }) {
        warden_proto::Reply::Fd { fd, errno } => {
            if fd < 0 {
                set_errno(errno);
            }
            fd
        }
        _ => unreachable!("OPEN always replies with Reply::Fd"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(pathname: *const c_char, flags: c_int, mut args: ...) -> c_int {
    let mode = if flags & libc::O_CREAT != 0 {
        // SAFETY: a `mode_t` (promoted to `c_int` by C's variadic
        // promotion rules) is present whenever `O_CREAT` is set.
        unsafe { args.arg::<c_int>() as u32 }
    } else {
        0
    };
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    do_open(path, flags, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(pathname: *const c_char, flags: c_int, mut args: ...) -> c_int {
    let mode = if flags & libc::O_CREAT != 0 {
        // SAFETY: see `open` above.
        unsafe { args.arg::<c_int>() as u32 }
    } else {
        0
    };
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    do_open(path, flags | libc::O_LARGEFILE, mode)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat(pathname: *const c_char, mode: libc::mode_t) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    do_open(path, libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC, mode as u32)
}

#[unsafe(no_mangle)]
pub extern "C" fn close(fd: c_int) -> c_int {
    match ipc::call(Request::Close { fd }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("CLOSE always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: usize) -> isize {
    #[allow(clippy::cast_possible_truncation)]
    let len = count.min(usize::from(u32::MAX)) as u32;
    match ipc::call(Request::Read { fd, len }) {
        warden_proto::Reply::Read { count, data, errno } => {
            if count > 0 {
                // SAFETY: the caller promises `buf` has at least `count`
                // writable bytes; `data.len()` never exceeds `len <= count`.
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), buf.cast(), data.len());
                }
            } else if count < 0 {
                set_errno(errno);
            }
            isize::try_from(count).unwrap_or(-1)
        }
        _ => unreachable!("READ always replies with Reply::Read"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pread(fd: c_int, buf: *mut c_void, count: usize, offset: libc::off_t) -> isize {
    if seek(fd, offset, libc::SEEK_SET) < 0 {
        return -1;
    }
    // SAFETY: forwarded verbatim to `read`'s own preconditions.
    unsafe { read(fd, buf, count) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: usize) -> isize {
    // SAFETY: the caller promises `buf` has at least `count` readable bytes.
    let data = unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), count) }.to_vec();
    match ipc::call(Request::Write { fd, data }) {
        warden_proto::Reply::Write { count, errno } => {
            if count <= 0 {
                set_errno(errno);
            }
            isize::try_from(count).unwrap_or(-1)
        }
        _ => unreachable!("WRITE always replies with Reply::Write"),
    }
}

pub(crate) fn seek(fd: c_int, offset: i64, whence: c_int) -> i64 {
    match ipc::call(Request::Seek { fd, offset, whence }) {
        warden_proto::Reply::Seek { offset: new_offset, errno } => {
            if new_offset < 0 {
                set_errno(errno);
            }
            new_offset
        }
        _ => unreachable!("SEEK always replies with Reply::Seek"),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn lseek(fd: c_int, offset: libc::off_t, whence: c_int) -> libc::off_t {
    seek(fd, i64::from(offset), whence) as libc::off_t
}

#[unsafe(no_mangle)]
pub extern "C" fn lseek64(fd: c_int, offset: libc::off64_t, whence: c_int) -> libc::off64_t {
    seek(fd, offset, whence)
}

fn do_stat(path: Vec<u8>, out: *mut libc::stat) -> c_int {
    match ipc::call(Request::Stat { path }) {
        warden_proto::Reply::Stat { code, blob, errno } => {
            // SAFETY: `out` is a valid `struct stat*` per every caller below.
            unsafe {
                out.write(blob.as_stat());
            }
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("STAT always replies with Reply::Stat"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stat(pathname: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    do_stat(path, buf)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lstat(pathname: *const c_char, buf: *mut libc::stat) -> c_int {
    // The supervisor's STAT command always resolves symlinks; this shim
    // does not distinguish `lstat` from `stat`.
    unsafe { stat(pathname, buf) }
}

#[unsafe(no_mangle)]
pub extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    match ipc::call(Request::Fstat { fd }) {
        warden_proto::Reply::Stat { code, blob, errno } => {
            // SAFETY: `buf` is a valid `struct stat*`, guaranteed by the caller.
            unsafe {
                buf.write(blob.as_stat());
            }
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("FSTAT always replies with Reply::Stat"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mkdir(pathname: *const c_char, mode: libc::mode_t) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    match ipc::call(Request::Mkdir { path, mode: mode as u32 }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("MKDIR always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn unlink(pathname: *const c_char) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    match ipc::call(Request::Unlink { path }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("UNLINK always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn remove(pathname: *const c_char) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    match ipc::call(Request::Remove { path }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("REMOVE always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rmdir(pathname: *const c_char) -> c_int {
    let Some(path) = (unsafe { path_bytes(pathname) }) else {
        return -1;
    };
    match ipc::call(Request::Rmdir { path }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("RMDIR always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ftruncate(fd: c_int, length: libc::off_t) -> c_int {
    match ipc::call(Request::Ftruncate { fd, offset: i64::from(length) }) {
        warden_proto::Reply::Code { code, errno } => {
            if code < 0 {
                set_errno(errno);
            }
            code
        }
        _ => unreachable!("FTRUNCATE always replies with Reply::Code"),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dup(fd: c_int) -> c_int {
    match ipc::call(Request::Dup { fd }) {
        warden_proto::Reply::Dup { fd: newfd, errno } => {
            if newfd < 0 {
                set_errno(errno);
            }
            newfd
        }
        _ => unreachable!("DUP always replies with Reply::Dup"),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dup2(fd: c_int, newfd: c_int) -> c_int {
    match ipc::call(Request::Dup2 { fd, newfd }) {
        warden_proto::Reply::Dup { fd: result, errno } => {
            if result < 0 {
                set_errno(errno);
            }
            result
        }
        _ => unreachable!("DUP2 always replies with Reply::Dup"),
    }
}

/// A stable, process-wide wrapper around the supervisor-side directory
/// handle — this is what the shim's `DIR*` actually points to.
#[repr(C)]
pub struct ShimDir {
    handle: c_int,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn opendir(name: *const c_char) -> *mut ShimDir {
    let Some(path) = (unsafe { path_bytes(name) }) else {
        return std::ptr::null_mut();
    };
    match ipc::call(Request::Opendir { path }) {
        warden_proto::Reply::Opendir { handle, errno } => {
            if handle < 0 {
                set_errno(errno);
                return std::ptr::null_mut();
            }
            Box::into_raw(Box::new(ShimDir { handle }))
        }
        _ => unreachable!("OPENDIR always replies with Reply::Opendir"),
    }
}

fn do_readdir(dirp: *mut ShimDir, request: Request) -> Option<warden_proto::DirentBlob> {
    if dirp.is_null() {
        set_errno(libc::EBADF);
        return None;
    }
    match ipc::call(request) {
        warden_proto::Reply::Readdir { status, blob } => {
            if status != 0 {
                return None;
            }
            Some(blob.expect("successful readdir carries a blob"))
        }
        _ => unreachable!("READDIR always replies with Reply::Readdir"),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readdir(dirp: *mut ShimDir) -> *mut libc::dirent {
    if dirp.is_null() {
        set_errno(libc::EBADF);
        return std::ptr::null_mut();
    }
    // SAFETY: `dirp` is a live handle from `opendir`.
    let handle = unsafe { (*dirp).handle };
    let Some(blob) = do_readdir(dirp, Request::Readdir { handle }) else {
        return std::ptr::null_mut();
    };
    let dirent = blob.as_dirent();
    Box::into_raw(Box::new(dirent_from_dirent64(&dirent))).cast()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readdir64(dirp: *mut ShimDir) -> *mut libc::dirent64 {
    if dirp.is_null() {
        set_errno(libc::EBADF);
        return std::ptr::null_mut();
    }
    // SAFETY: `dirp` is a live handle from `opendir`.
    let handle = unsafe { (*dirp).handle };
    let Some(blob) = do_readdir(dirp, Request::Readdir64 { handle }) else {
        return std::ptr::null_mut();
    };
    Box::into_raw(Box::new(blob.as_dirent())).cast()
}

fn dirent_from_dirent64(d: &libc::dirent64) -> libc::dirent {
    // SAFETY: both structs are plain kernel-shaped records with the same
    // fixed-size fields on a 64-bit build; only the name needs copying.
    let mut out: libc::dirent = unsafe { std::mem::zeroed() };
    out.d_ino = d.d_ino as libc::ino_t;
    out.d_off = d.d_off as libc::off_t;
    out.d_reclen = d.d_reclen;
    out.d_type = d.d_type;
    out.d_name = d.d_name;
    out
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rewinddir(dirp: *mut ShimDir) {
    if dirp.is_null() {
        return;
    }
    // SAFETY: `dirp` is a live handle from `opendir`.
    let handle = unsafe { (*dirp).handle };
    ipc::notify(Request::Rewinddir { handle });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn closedir(dirp: *mut ShimDir) -> c_int {
    if dirp.is_null() {
        set_errno(libc::EBADF);
        return -1;
    }
    // SAFETY: `dirp` was allocated by `opendir` via `Box::into_raw` and is
    // being freed exactly once, here.
    let boxed = unsafe { Box::from_raw(dirp) };
    match ipc::call(Request::Closedir { handle: boxed.handle }) {
        warden_proto::Reply::Closedir { code } => code,
        _ => unreachable!("CLOSEDIR always replies with Reply::Closedir"),
    }
}
