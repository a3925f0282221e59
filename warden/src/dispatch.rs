//! The supervisor's command-dispatch loop: one function per [`Command`].
//!
//! Each handler reads nothing itself (the frame was already decoded into a
//! [`Request`] by the caller); it validates against policy, performs or
//! rejects the real syscall, and returns the [`Reply`] to send back. The
//! loop itself is the single point that talks to the pipes.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use warden_proto::blob::StatBlob;
use warden_proto::{Command, RecvError, Reply, Request};

use crate::child_dir::ChildDirTable;
use crate::child_fd::ChildFdTable;
use crate::policy::{self, Mode, Op, TmpAllowlist};

fn to_cstring(path: &[u8]) -> Option<CString> {
    CString::new(path).ok()
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Per-session state threaded through every command handler.
pub struct Handlers {
    mode: Mode,
    argv: Vec<String>,
    quiet: bool,
    fds: ChildFdTable,
    dirs: ChildDirTable,
    tmp: TmpAllowlist,
    seccomp_engaged: bool,
    cwd: PathBuf,
}

impl Handlers {
    #[must_use]
    pub fn new(mode: Mode, argv: Vec<String>, quiet: bool) -> Self {
        Self {
            mode,
            argv,
            quiet,
            fds: ChildFdTable::new(),
            dirs: ChildDirTable::new(),
            tmp: TmpAllowlist::new(),
            seccomp_engaged: false,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    fn log_reject(&self, what: &str) {
        if !self.quiet {
            eprintln!("[warden] AccCtrl: {what} rejected");
        }
    }

    fn log_unimplemented(&self, what: &str) {
        eprintln!("[warden] UNIMPLEMENTED: {what}");
    }

    fn resolve(&self, path: &[u8]) -> PathBuf {
        let text = String::from_utf8_lossy(path);
        policy::resolve_path(&self.cwd, &text)
            .unwrap_or_else(|| PathBuf::from(text.into_owned()))
    }

    /// Serves requests on `request_fd`/`reply_fd` until the request pipe
    /// reaches EOF, then returns.
    pub fn serve(&mut self, request_fd: RawFd, reply_fd: RawFd) {
        loop {
            let code = match warden_proto::raw::recv_command_code(request_fd) {
                Ok(code) => code,
                Err(RecvError::Eof) => return,
                Err(RecvError::Io(e)) => {
                    eprintln!("[warden] request pipe error: {e}");
                    return;
                }
            };
            let Some(command) = Command::from_u32(code) else {
                eprintln!("[warden] unknown command code {code}, terminating session");
                return;
            };
            let request = match Request::recv(request_fd, command) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("[warden] malformed frame for {command:?}: {e}");
                    return;
                }
            };
            if let Some(reply) = self.handle(request)
                && let Err(e) = reply.send(reply_fd)
            {
                eprintln!("[warden] reply pipe error: {e}");
                return;
            }
        }
    }

    fn handle(&mut self, request: Request) -> Option<Reply> {
        match request {
            Request::HasSwitchedToSeccomp => {
                self.seccomp_engaged = true;
                None
            }
            Request::Open { path, flags, mode } => Some(self.open(&path, flags, mode)),
            Request::Close { fd } => Some(self.close(fd)),
            Request::Read { fd, len } => Some(self.read(fd, len)),
            Request::Write { fd, data } => Some(self.write(fd, &data)),
            Request::Seek { fd, offset, whence } => Some(self.seek(fd, offset, whence)),
            Request::Stat { path } => Some(self.stat(&path)),
            Request::Fstat { fd } => Some(self.fstat(fd)),
            Request::Mkdir { path, mode } => Some(self.mkdir(&path, mode)),
            Request::Unlink { path } => Some(self.unlink(&path)),
            Request::Remove { path } => Some(self.remove(&path)),
            Request::Rmdir { path } => Some(self.rmdir(&path)),
            Request::Ftruncate { fd, offset } => Some(self.ftruncate(fd, offset)),
            Request::Dup { fd } => Some(self.dup(fd)),
            Request::Dup2 { fd, newfd } => Some(self.dup2(fd, newfd)),
            Request::Opendir { path } => Some(self.opendir(&path)),
            Request::Readdir { handle } | Request::Readdir64 { handle } => {
                Some(self.readdir(handle))
            }
            Request::Rewinddir { handle } => {
                self.rewinddir(handle);
                None
            }
            Request::Closedir { handle } => Some(self.closedir(handle)),
            Request::SelectStdin { timeout_ms } => Some(self.select_stdin(timeout_ms)),
        }
    }

    fn open(&mut self, path: &[u8], flags: i32, mode: u32) -> Reply {
        if path.len() > warden_proto::MAX_PATH_LEN {
            return Reply::Fd {
                fd: -1,
                errno: libc::ENAMETOOLONG,
            };
        }
        let Some(cpath) = to_cstring(path) else {
            return Reply::Fd {
                fd: -1,
                errno: libc::EINVAL,
            };
        };

        if self.seccomp_engaged {
            if matches!(self.mode, Mode::Ro | Mode::Rw) {
                let resolved = self.resolve(path);
                let op = if flags & libc::O_ACCMODE == libc::O_RDONLY {
                    Op::Read
                } else {
                    Op::Write
                };
                if !policy::file_allowed(&resolved, &self.argv, op, self.mode, &self.tmp) {
                    self.log_reject(&format!("open({})", String::from_utf8_lossy(path)));
                    return Reply::Fd {
                        fd: -1,
                        errno: libc::EACCES,
                    };
                }
                if op == Op::Write {
                    self.tmp.record_write(&resolved);
                }
            }
            if matches!(self.mode, Mode::Ro | Mode::RoExtended) && flags != libc::O_RDONLY {
                self.log_reject(&format!("open({}) write in read-only mode", cpath.to_string_lossy()));
                return Reply::Fd {
                    fd: -1,
                    errno: libc::EACCES,
                };
            }
        }

        // SAFETY: `cpath` is a valid, NUL-terminated C string.
        let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode) };
        if fd < 0 {
            return Reply::Fd {
                fd: -1,
                errno: last_errno(),
            };
        }
        if fd as usize >= warden_proto::MAX_CHILD_FDS {
            // SAFETY: `fd` was just returned by `open` above.
            unsafe {
                libc::close(fd);
            }
            return Reply::Fd {
                fd: -1,
                errno: libc::ENFILE,
            };
        }
        self.fds.mark_owned(fd);
        Reply::Fd { fd, errno: 0 }
    }

    fn close(&mut self, fd: i32) -> Reply {
        let target = if self.fds.is_owned(fd) { fd } else { -1 };
        self.fds.clear(fd);
        // SAFETY: `target` is either an fd this process owns or -1.
        let rc = unsafe { libc::close(target) };
        if rc < 0 {
            Reply::Code {
                code: -1,
                errno: last_errno(),
            }
        } else {
            Reply::Code { code: 0, errno: 0 }
        }
    }

    fn read(&self, fd: i32, len: u32) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Read {
                count: -1,
                data: Vec::new(),
                errno: libc::EBADF,
            };
        }
        let mut buf = vec![0u8; len as usize];
        // SAFETY: `buf` has `len` valid bytes of capacity, `fd` is owned.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Reply::Read {
                count: -1,
                data: Vec::new(),
                errno: last_errno(),
            };
        }
        #[allow(clippy::cast_possible_truncation)]
        let count = n as i32;
        buf.truncate(n.try_into().unwrap_or(0));
        Reply::Read {
            count,
            data: buf,
            errno: 0,
        }
    }

    fn write(&self, fd: i32, data: &[u8]) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Write {
                count: -1,
                errno: libc::EBADF,
            };
        }
        // SAFETY: `data` is a valid slice, `fd` is owned.
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        if n < 0 {
            return Reply::Write {
                count: -1,
                errno: last_errno(),
            };
        }
        #[allow(clippy::cast_possible_truncation)]
        Reply::Write {
            count: n as i32,
            errno: 0,
        }
    }

    fn seek(&self, fd: i32, offset: i64, whence: i32) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Seek {
                offset: -1,
                errno: libc::EBADF,
            };
        }
        // SAFETY: `fd` is owned; `lseek` does not dereference pointers.
        let result = unsafe { libc::lseek(fd, offset, whence) };
        if result < 0 {
            Reply::Seek {
                offset: -1,
                errno: last_errno(),
            }
        } else {
            Reply::Seek {
                offset: result,
                errno: 0,
            }
        }
    }

    fn stat(&mut self, path: &[u8]) -> Reply {
        // STAT is always allowed: the kernel already resolved the path at
        // OPEN time, and leaking size/mtime of a refused path is accepted
        // (see DESIGN.md's open-questions note).
        let Some(cpath) = to_cstring(path) else {
            return Reply::Stat {
                code: -1,
                blob: StatBlob(zeroed_stat_bytes()),
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `st` is zero-initialized POD; `stat` fills it on success.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `cpath` is NUL-terminated, `st` is a valid out-pointer.
        let rc = unsafe { libc::stat(cpath.as_ptr(), &raw mut st) };
        if rc < 0 {
            Reply::Stat {
                code: -1,
                blob: StatBlob::from_stat(&st),
                errno: last_errno(),
            }
        } else {
            Reply::Stat {
                code: 0,
                blob: StatBlob::from_stat(&st),
                errno: 0,
            }
        }
    }

    fn fstat(&mut self, fd: i32) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Stat {
                code: -1,
                blob: StatBlob(zeroed_stat_bytes()),
                errno: libc::EBADF,
            };
        }
        // SAFETY: `st` is zero-initialized POD.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is owned, `st` is a valid out-pointer.
        let rc = unsafe { libc::fstat(fd, &raw mut st) };
        if rc < 0 {
            Reply::Stat {
                code: -1,
                blob: StatBlob::from_stat(&st),
                errno: last_errno(),
            }
        } else {
            Reply::Stat {
                code: 0,
                blob: StatBlob::from_stat(&st),
                errno: 0,
            }
        }
    }

    /// Policy-gates a creating/removing operation (mkdir/unlink/remove/
    /// rmdir): requires seccomp engaged, a writable mode, and — outside
    /// extended mode — allowlist admission for `op`.
    fn gate_write_op(&mut self, path: &[u8], op: Op) -> Option<Reply> {
        if !self.seccomp_engaged || !self.mode.is_writable() {
            self.log_reject(&format!("{op:?}({})", String::from_utf8_lossy(path)));
            return Some(Reply::Code {
                code: -1,
                errno: libc::EACCES,
            });
        }
        if !self.mode.is_extended() {
            let resolved = self.resolve(path);
            if !policy::file_allowed(&resolved, &self.argv, op, self.mode, &self.tmp) {
                self.log_reject(&format!("{op:?}({})", String::from_utf8_lossy(path)));
                return Some(Reply::Code {
                    code: -1,
                    errno: libc::EACCES,
                });
            }
        }
        None
    }

    fn mkdir(&mut self, path: &[u8], mode: u32) -> Reply {
        if let Some(rejected) = self.gate_write_op(path, Op::Write) {
            return rejected;
        }
        let Some(cpath) = to_cstring(path) else {
            return Reply::Code {
                code: -1,
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `cpath` is NUL-terminated.
        let rc = unsafe { libc::mkdir(cpath.as_ptr(), mode) };
        code_reply(rc)
    }

    fn unlink(&mut self, path: &[u8]) -> Reply {
        if let Some(rejected) = self.gate_write_op(path, Op::Unlink) {
            return rejected;
        }
        let resolved = self.resolve(path);
        let Some(cpath) = to_cstring(path) else {
            return Reply::Code {
                code: -1,
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `cpath` is NUL-terminated.
        let rc = unsafe { libc::unlink(cpath.as_ptr()) };
        if rc == 0 {
            self.tmp.forget(&resolved);
        }
        code_reply(rc)
    }

    fn remove(&mut self, path: &[u8]) -> Reply {
        // `remove(3)` dispatches to unlink or rmdir depending on the
        // target; the supervisor mirrors that by trying unlink first.
        if let Some(rejected) = self.gate_write_op(path, Op::Unlink) {
            return rejected;
        }
        let resolved = self.resolve(path);
        let Some(cpath) = to_cstring(path) else {
            return Reply::Code {
                code: -1,
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `cpath` is NUL-terminated.
        let mut rc = unsafe { libc::unlink(cpath.as_ptr()) };
        if rc != 0 && last_errno() == libc::EISDIR {
            // SAFETY: same `cpath`.
            rc = unsafe { libc::rmdir(cpath.as_ptr()) };
        }
        if rc == 0 {
            self.tmp.forget(&resolved);
        }
        code_reply(rc)
    }

    fn rmdir(&mut self, path: &[u8]) -> Reply {
        if let Some(rejected) = self.gate_write_op(path, Op::Unlink) {
            return rejected;
        }
        let Some(cpath) = to_cstring(path) else {
            return Reply::Code {
                code: -1,
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `cpath` is NUL-terminated.
        let rc = unsafe { libc::rmdir(cpath.as_ptr()) };
        code_reply(rc)
    }

    fn ftruncate(&mut self, fd: i32, offset: i64) -> Reply {
        // Unconditional: prior OPEN approval already authorized write
        // access to this fd.
        if !self.fds.is_owned(fd) {
            return Reply::Code {
                code: -1,
                errno: libc::EBADF,
            };
        }
        // SAFETY: `fd` is owned.
        let rc = unsafe { libc::ftruncate(fd, offset) };
        code_reply(rc)
    }

    fn dup(&mut self, fd: i32) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Dup {
                fd: -1,
                errno: libc::EBADF,
            };
        }
        // SAFETY: `fd` is owned.
        let newfd = unsafe { libc::dup(fd) };
        self.finish_dup(newfd)
    }

    fn dup2(&mut self, fd: i32, newfd: i32) -> Reply {
        if !self.fds.is_owned(fd) {
            return Reply::Dup {
                fd: -1,
                errno: libc::EBADF,
            };
        }
        if newfd as usize >= warden_proto::MAX_CHILD_FDS {
            return Reply::Dup {
                fd: -1,
                errno: libc::ENFILE,
            };
        }
        // SAFETY: `fd` is owned, `newfd` is within table bounds.
        let result = unsafe { libc::dup2(fd, newfd) };
        self.finish_dup(result)
    }

    fn finish_dup(&mut self, result: i32) -> Reply {
        if result < 0 {
            return Reply::Dup {
                fd: -1,
                errno: last_errno(),
            };
        }
        if result as usize >= warden_proto::MAX_CHILD_FDS {
            // SAFETY: `result` was just returned by dup/dup2 above.
            unsafe {
                libc::close(result);
            }
            return Reply::Dup {
                fd: -1,
                errno: libc::ENFILE,
            };
        }
        self.fds.mark_owned(result);
        Reply::Dup {
            fd: result,
            errno: 0,
        }
    }

    fn opendir(&mut self, path: &[u8]) -> Reply {
        if self.seccomp_engaged && matches!(self.mode, Mode::Ro | Mode::Rw) {
            let resolved = self.resolve(path);
            if !policy::file_allowed(&resolved, &self.argv, Op::Read, self.mode, &self.tmp) {
                self.log_reject(&format!("opendir({})", String::from_utf8_lossy(path)));
                return Reply::Opendir {
                    handle: -1,
                    errno: libc::EACCES,
                };
            }
        }
        let Some(cpath) = to_cstring(path) else {
            return Reply::Opendir {
                handle: -1,
                errno: libc::EINVAL,
            };
        };
        // SAFETY: `cpath` is NUL-terminated.
        let dir = unsafe { libc::opendir(cpath.as_ptr()) };
        if dir.is_null() {
            return Reply::Opendir {
                handle: -1,
                errno: last_errno(),
            };
        }
        match self.dirs.insert(dir) {
            Some(handle) => Reply::Opendir { handle, errno: 0 },
            None => {
                // SAFETY: `dir` was just opened above.
                unsafe {
                    libc::closedir(dir);
                }
                Reply::Opendir {
                    handle: -1,
                    errno: libc::ENFILE,
                }
            }
        }
    }

    fn readdir(&mut self, handle: i32) -> Reply {
        let Some(dir) = self.dirs.get(handle) else {
            return Reply::Readdir {
                status: -1,
                blob: None,
            };
        };
        // Clearing errno first is the only reliable way to distinguish
        // end-of-stream from a real failure on a NULL `readdir64` return.
        unsafe {
            *libc::__errno_location() = 0;
        }
        // SAFETY: `dir` is a live stream owned by this table.
        let entry = unsafe { libc::readdir64(dir) };
        if entry.is_null() {
            return Reply::Readdir {
                status: -1,
                blob: None,
            };
        }
        // SAFETY: `entry` is a valid `dirent64*` for the duration of this call.
        let blob = warden_proto::blob::DirentBlob::from_dirent(unsafe { &*entry });
        Reply::Readdir {
            status: 0,
            blob: Some(blob),
        }
    }

    fn rewinddir(&mut self, handle: i32) {
        if let Some(dir) = self.dirs.get(handle) {
            // SAFETY: `dir` is a live stream owned by this table.
            unsafe {
                libc::rewinddir(dir);
            }
        }
        // No reply is sent for REWINDDIR.
    }

    fn closedir(&mut self, handle: i32) -> Reply {
        match self.dirs.remove(handle) {
            Some(dir) => {
                // SAFETY: `dir` is a live stream being removed from the table.
                let rc = unsafe { libc::closedir(dir) };
                Reply::Closedir { code: rc }
            }
            None => Reply::Closedir { code: -1 },
        }
    }

    fn select_stdin(&mut self, timeout_ms: i64) -> Reply {
        if !self.fds.is_owned(0) {
            self.log_unimplemented("select_stdin (fd 0 not owned)");
            return Reply::SelectStdin { code: -1, is_set: 0 };
        }
        let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
        // SAFETY: `set` is a valid, zeroed `fd_set`.
        unsafe {
            libc::FD_ZERO(&raw mut set);
            libc::FD_SET(0, &raw mut set);
        }
        let mut tv = libc::timeval {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
        };
        // A negative `timeout_ms` means "block indefinitely" (mirrors a
        // NULL `struct timeval *` to `select(2)`).
        let tv_ptr = if timeout_ms < 0 {
            std::ptr::null_mut()
        } else {
            &raw mut tv
        };
        // SAFETY: `set`/`tv` are valid, locally-owned buffers.
        let rc = unsafe {
            libc::select(
                1,
                &raw mut set,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                tv_ptr,
            )
        };
        if rc < 0 {
            return Reply::SelectStdin { code: -1, is_set: 0 };
        }
        // SAFETY: `set` was just populated by `select` above.
        let is_set = i32::from(unsafe { libc::FD_ISSET(0, &raw const set) });
        Reply::SelectStdin { code: rc, is_set }
    }
}

fn code_reply(rc: i32) -> Reply {
    if rc < 0 {
        Reply::Code {
            code: -1,
            errno: last_errno(),
        }
    } else {
        Reply::Code { code: 0, errno: 0 }
    }
}

fn zeroed_stat_bytes() -> [u8; warden_proto::blob::STAT_SIZE] {
    [0u8; warden_proto::blob::STAT_SIZE]
}
