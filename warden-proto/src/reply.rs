//! Reply payloads. The shape is fixed per command, so the reader must
//! already know which command it sent — replies never carry their own
//! command tag. This is sound because the channel is synchronous,
//! single-threaded, and strictly request-then-reply on both sides (see
//! the FIFO-ordering invariant this protocol relies on).

use std::io;
use std::os::unix::io::RawFd;

use crate::blob::{DIRENT_SIZE, DirentBlob, STAT_SIZE, StatBlob};
use crate::command::Command;
use crate::raw::{read_i32, read_i64, recv_exact, send_all, write_i32, write_i64};

/// A fully-decoded reply, as read off the supervisor→child pipe.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `HAS_SWITCHED_TO_SECCOMP` and `REWINDDIR` send no reply at all.
    None,
    /// `OPEN`: fd, or a negative value plus the errno that produced it.
    Fd { fd: i32, errno: i32 },
    /// `DUP`/`DUP2`: resulting fd, or a negative value plus errno.
    Dup { fd: i32, errno: i32 },
    /// `CLOSE`/`MKDIR`/`UNLINK`/`REMOVE`/`RMDIR`/`FTRUNCATE`: return code,
    /// plus errno on failure.
    Code { code: i32, errno: i32 },
    /// `READ`: either the bytes read, or a non-positive count plus errno.
    Read { count: i32, data: Vec<u8>, errno: i32 },
    /// `WRITE`: bytes written, or a non-positive count plus errno.
    Write { count: i32, errno: i32 },
    /// `SEEK`: new offset, or a negative offset plus errno.
    Seek { offset: i64, errno: i32 },
    /// `STAT`/`FSTAT`: return code, the stat blob (sent unconditionally),
    /// then errno on failure.
    Stat { code: i32, blob: StatBlob, errno: i32 },
    /// `OPENDIR`: handle, or a negative value plus errno.
    Opendir { handle: i32, errno: i32 },
    /// `READDIR`/`READDIR64`: status, then the dirent blob only on success.
    /// No errno is ever sent for this command.
    Readdir { status: i32, blob: Option<DirentBlob> },
    /// `CLOSEDIR`: return code only — no errno byte, even on failure.
    Closedir { code: i32 },
    /// `SELECT_STDIN`: return code plus an "is set" flag.
    SelectStdin { code: i32, is_set: i32 },
}

impl Reply {
    /// Writes this reply in the shape dictated by `command`.
    pub fn send(&self, fd: RawFd) -> io::Result<()> {
        match self {
            Self::None => {}
            Self::Fd { fd: value, errno } | Self::Dup { fd: value, errno } => {
                write_i32(fd, *value)?;
                if *value < 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Code { code, errno } => {
                write_i32(fd, *code)?;
                if *code < 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Read { count, data, errno } => {
                write_i32(fd, *count)?;
                if *count > 0 {
                    send_all(fd, data)?;
                } else {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Write { count, errno } => {
                write_i32(fd, *count)?;
                if *count <= 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Seek { offset, errno } => {
                write_i64(fd, *offset)?;
                if *offset < 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Stat { code, blob, errno } => {
                write_i32(fd, *code)?;
                send_all(fd, &blob.0)?;
                if *code < 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Opendir { handle, errno } => {
                write_i32(fd, *handle)?;
                if *handle < 0 {
                    write_i32(fd, *errno)?;
                }
            }
            Self::Readdir { status, blob } => {
                write_i32(fd, *status)?;
                if *status == 0 {
                    let Some(blob) = blob else {
                        return Err(io::Error::other(
                            "successful readdir reply must carry a dirent blob",
                        ));
                    };
                    send_all(fd, &blob.0)?;
                }
            }
            Self::Closedir { code } => write_i32(fd, *code)?,
            Self::SelectStdin { code, is_set } => {
                write_i32(fd, *code)?;
                write_i32(fd, *is_set)?;
            }
        }
        Ok(())
    }

    /// Reads a reply in the shape dictated by `command`.
    ///
    /// The caller must pass the same [`Command`] it sent the matching
    /// request under — the wire carries no tag to recover it from.
    pub fn recv_for(command: Command, fd: RawFd) -> io::Result<Self> {
        Ok(match command {
            Command::HasSwitchedToSeccomp | Command::Rewinddir => Self::None,
            Command::Open => {
                let value = read_i32(fd)?;
                let errno = if value < 0 { read_i32(fd)? } else { 0 };
                Self::Fd { fd: value, errno }
            }
            Command::Dup | Command::Dup2 => {
                let value = read_i32(fd)?;
                let errno = if value < 0 { read_i32(fd)? } else { 0 };
                Self::Dup { fd: value, errno }
            }
            Command::Close
            | Command::Mkdir
            | Command::Unlink
            | Command::Remove
            | Command::Rmdir
            | Command::Ftruncate => {
                let code = read_i32(fd)?;
                let errno = if code < 0 { read_i32(fd)? } else { 0 };
                Self::Code { code, errno }
            }
            Command::Read => {
                let count = read_i32(fd)?;
                if count > 0 {
                    #[allow(clippy::cast_sign_loss)]
                    let mut data = vec![0u8; count as usize];
                    recv_exact(fd, &mut data)?;
                    Self::Read {
                        count,
                        data,
                        errno: 0,
                    }
                } else {
                    let errno = read_i32(fd)?;
                    Self::Read {
                        count,
                        data: Vec::new(),
                        errno,
                    }
                }
            }
            Command::Write => {
                let count = read_i32(fd)?;
                let errno = if count <= 0 { read_i32(fd)? } else { 0 };
                Self::Write { count, errno }
            }
            Command::Seek => {
                let offset = read_i64(fd)?;
                let errno = if offset < 0 { read_i32(fd)? } else { 0 };
                Self::Seek { offset, errno }
            }
            Command::Stat | Command::Fstat => {
                let code = read_i32(fd)?;
                let mut raw = [0u8; STAT_SIZE];
                recv_exact(fd, &mut raw)?;
                let errno = if code < 0 { read_i32(fd)? } else { 0 };
                Self::Stat {
                    code,
                    blob: StatBlob(raw),
                    errno,
                }
            }
            Command::Opendir => {
                let handle = read_i32(fd)?;
                let errno = if handle < 0 { read_i32(fd)? } else { 0 };
                Self::Opendir { handle, errno }
            }
            Command::Readdir | Command::Readdir64 => {
                let status = read_i32(fd)?;
                let blob = if status == 0 {
                    let mut raw = [0u8; DIRENT_SIZE];
                    recv_exact(fd, &mut raw)?;
                    Some(DirentBlob(raw))
                } else {
                    None
                };
                Self::Readdir { status, blob }
            }
            Command::Closedir => Self::Closedir {
                code: read_i32(fd)?,
            },
            Command::SelectStdin => {
                let code = read_i32(fd)?;
                let is_set = read_i32(fd)?;
                Self::SelectStdin { code, is_set }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;
    use crate::blob::StatBlob;
    use crate::command::Command;
    use std::os::fd::FromRawFd;
    use std::os::unix::io::AsRawFd;

    fn pipe() -> (std::fs::File, std::fs::File) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe {
            (
                std::fs::File::from_raw_fd(fds[0]),
                std::fs::File::from_raw_fd(fds[1]),
            )
        }
    }

    #[test]
    fn open_success_omits_errno() {
        let (r, w) = pipe();
        Reply::Fd { fd: 7, errno: 0 }.send(w.as_raw_fd()).unwrap();
        drop(w);
        match Reply::recv_for(Command::Open, r.as_raw_fd()).unwrap() {
            Reply::Fd { fd, errno } => {
                assert_eq!(fd, 7);
                assert_eq!(errno, 0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn open_failure_carries_errno() {
        let (r, w) = pipe();
        Reply::Fd {
            fd: -1,
            errno: libc::EACCES,
        }
        .send(w.as_raw_fd())
        .unwrap();
        match Reply::recv_for(Command::Open, r.as_raw_fd()).unwrap() {
            Reply::Fd { fd, errno } => {
                assert_eq!(fd, -1);
                assert_eq!(errno, libc::EACCES);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn closedir_has_no_errno_byte_even_on_failure() {
        let (r, w) = pipe();
        Reply::Closedir { code: -1 }.send(w.as_raw_fd()).unwrap();
        // A second write proves no errno byte leaked into the stream.
        Reply::Closedir { code: 0 }.send(w.as_raw_fd()).unwrap();
        match Reply::recv_for(Command::Closedir, r.as_raw_fd()).unwrap() {
            Reply::Closedir { code } => assert_eq!(code, -1),
            other => panic!("unexpected reply: {other:?}"),
        }
        match Reply::recv_for(Command::Closedir, r.as_raw_fd()).unwrap() {
            Reply::Closedir { code } => assert_eq!(code, 0),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn stat_blob_is_sent_even_on_failure() {
        // SAFETY: zero-initialized `stat` is a valid bit pattern.
        let st: libc::stat = unsafe { std::mem::zeroed() };
        let (r, w) = pipe();
        Reply::Stat {
            code: -1,
            blob: StatBlob::from_stat(&st),
            errno: libc::ENOENT,
        }
        .send(w.as_raw_fd())
        .unwrap();
        match Reply::recv_for(Command::Stat, r.as_raw_fd()).unwrap() {
            Reply::Stat { code, errno, .. } => {
                assert_eq!(code, -1);
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn readdir_end_of_stream_has_no_blob() {
        let (r, w) = pipe();
        Reply::Readdir {
            status: -1,
            blob: None,
        }
        .send(w.as_raw_fd())
        .unwrap();
        match Reply::recv_for(Command::Readdir, r.as_raw_fd()).unwrap() {
            Reply::Readdir { status, blob } => {
                assert_eq!(status, -1);
                assert!(blob.is_none());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
