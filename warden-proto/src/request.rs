//! Request payloads, one variant per [`Command`].

use std::io;
use std::os::unix::io::RawFd;

use crate::command::Command;
use crate::raw::{
    read_i32, read_i64, read_path, read_u32, recv_exact, send_all, write_i32, write_i64,
    write_path, write_u32,
};

/// A fully-decoded request, as read off the child→supervisor pipe.
#[derive(Debug, Clone)]
pub enum Request {
    /// Sent once; transitions the supervisor's internal flag. No reply.
    HasSwitchedToSeccomp,
    Open {
        path: Vec<u8>,
        flags: i32,
        mode: u32,
    },
    Close {
        fd: i32,
    },
    Read {
        fd: i32,
        len: u32,
    },
    Write {
        fd: i32,
        data: Vec<u8>,
    },
    Seek {
        fd: i32,
        offset: i64,
        whence: i32,
    },
    Stat {
        path: Vec<u8>,
    },
    Fstat {
        fd: i32,
    },
    Mkdir {
        path: Vec<u8>,
        mode: u32,
    },
    Unlink {
        path: Vec<u8>,
    },
    Remove {
        path: Vec<u8>,
    },
    Rmdir {
        path: Vec<u8>,
    },
    Ftruncate {
        fd: i32,
        offset: i64,
    },
    Dup {
        fd: i32,
    },
    Dup2 {
        fd: i32,
        newfd: i32,
    },
    Opendir {
        path: Vec<u8>,
    },
    Readdir {
        handle: i32,
    },
    Readdir64 {
        handle: i32,
    },
    Rewinddir {
        handle: i32,
    },
    Closedir {
        handle: i32,
    },
    SelectStdin {
        timeout_ms: i64,
    },
}

impl Request {
    /// The command code this request is framed under.
    #[must_use]
    pub const fn command(&self) -> Command {
        match self {
            Self::HasSwitchedToSeccomp => Command::HasSwitchedToSeccomp,
            Self::Open { .. } => Command::Open,
            Self::Close { .. } => Command::Close,
            Self::Read { .. } => Command::Read,
            Self::Write { .. } => Command::Write,
            Self::Seek { .. } => Command::Seek,
            Self::Stat { .. } => Command::Stat,
            Self::Fstat { .. } => Command::Fstat,
            Self::Mkdir { .. } => Command::Mkdir,
            Self::Unlink { .. } => Command::Unlink,
            Self::Remove { .. } => Command::Remove,
            Self::Rmdir { .. } => Command::Rmdir,
            Self::Ftruncate { .. } => Command::Ftruncate,
            Self::Dup { .. } => Command::Dup,
            Self::Dup2 { .. } => Command::Dup2,
            Self::Opendir { .. } => Command::Opendir,
            Self::Readdir { .. } => Command::Readdir,
            Self::Readdir64 { .. } => Command::Readdir64,
            Self::Rewinddir { .. } => Command::Rewinddir,
            Self::Closedir { .. } => Command::Closedir,
            Self::SelectStdin { .. } => Command::SelectStdin,
        }
    }

    /// Writes the command code followed by this request's payload.
    pub fn send(&self, fd: RawFd) -> io::Result<()> {
        write_u32(fd, self.command().as_u32())?;
        match self {
            Self::HasSwitchedToSeccomp => {}
            Self::Open { path, flags, mode } => {
                write_path(fd, path)?;
                write_i32(fd, *flags)?;
                write_u32(fd, *mode)?;
            }
            Self::Close { fd: target } | Self::Fstat { fd: target } | Self::Dup { fd: target } => {
                write_i32(fd, *target)?;
            }
            Self::Read { fd: target, len } => {
                write_i32(fd, *target)?;
                write_u32(fd, *len)?;
            }
            Self::Write { fd: target, data } => {
                write_i32(fd, *target)?;
                #[allow(clippy::cast_possible_truncation)]
                write_u32(fd, data.len() as u32)?;
                send_all(fd, data)?;
            }
            Self::Seek {
                fd: target,
                offset,
                whence,
            } => {
                write_i32(fd, *target)?;
                write_i64(fd, *offset)?;
                write_i32(fd, *whence)?;
            }
            Self::Stat { path }
            | Self::Unlink { path }
            | Self::Remove { path }
            | Self::Rmdir { path }
            | Self::Opendir { path } => {
                write_path(fd, path)?;
            }
            Self::Mkdir { path, mode } => {
                write_path(fd, path)?;
                write_u32(fd, *mode)?;
            }
            Self::Ftruncate {
                fd: target,
                offset,
            } => {
                write_i32(fd, *target)?;
                write_i64(fd, *offset)?;
            }
            Self::Dup2 { fd: target, newfd } => {
                write_i32(fd, *target)?;
                write_i32(fd, *newfd)?;
            }
            Self::Readdir { handle }
            | Self::Readdir64 { handle }
            | Self::Rewinddir { handle }
            | Self::Closedir { handle } => {
                write_i32(fd, *handle)?;
            }
            Self::SelectStdin { timeout_ms } => {
                write_i64(fd, *timeout_ms)?;
            }
        }
        Ok(())
    }

    /// Reads a request's payload, given its already-decoded command code.
    pub fn recv(fd: RawFd, command: Command) -> io::Result<Self> {
        Ok(match command {
            Command::HasSwitchedToSeccomp => Self::HasSwitchedToSeccomp,
            Command::Open => {
                let path = read_path(fd)?;
                let flags = read_i32(fd)?;
                let mode = read_u32(fd)?;
                Self::Open { path, flags, mode }
            }
            Command::Close => Self::Close { fd: read_i32(fd)? },
            Command::Read => {
                let target = read_i32(fd)?;
                let len = read_u32(fd)?;
                Self::Read { fd: target, len }
            }
            Command::Write => {
                let target = read_i32(fd)?;
                let len = read_u32(fd)? as usize;
                let mut data = vec![0u8; len];
                recv_exact(fd, &mut data)?;
                Self::Write { fd: target, data }
            }
            Command::Seek => {
                let target = read_i32(fd)?;
                let offset = read_i64(fd)?;
                let whence = read_i32(fd)?;
                Self::Seek {
                    fd: target,
                    offset,
                    whence,
                }
            }
            Command::Stat => Self::Stat {
                path: read_path(fd)?,
            },
            Command::Fstat => Self::Fstat { fd: read_i32(fd)? },
            Command::Mkdir => {
                let path = read_path(fd)?;
                let mode = read_u32(fd)?;
                Self::Mkdir { path, mode }
            }
            Command::Unlink => Self::Unlink {
                path: read_path(fd)?,
            },
            Command::Remove => Self::Remove {
                path: read_path(fd)?,
            },
            Command::Rmdir => Self::Rmdir {
                path: read_path(fd)?,
            },
            Command::Ftruncate => {
                let target = read_i32(fd)?;
                let offset = read_i64(fd)?;
                Self::Ftruncate {
                    fd: target,
                    offset,
                }
            }
            Command::Dup => Self::Dup { fd: read_i32(fd)? },
            Command::Dup2 => {
                let target = read_i32(fd)?;
                let newfd = read_i32(fd)?;
                Self::Dup2 {
                    fd: target,
                    newfd,
                }
            }
            Command::Opendir => Self::Opendir {
                path: read_path(fd)?,
            },
            Command::Readdir => Self::Readdir {
                handle: read_i32(fd)?,
            },
            Command::Readdir64 => Self::Readdir64 {
                handle: read_i32(fd)?,
            },
            Command::Rewinddir => Self::Rewinddir {
                handle: read_i32(fd)?,
            },
            Command::Closedir => Self::Closedir {
                handle: read_i32(fd)?,
            },
            Command::SelectStdin => Self::SelectStdin {
                timeout_ms: read_i64(fd)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Request;
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

    fn round_trip(req: Request) {
        let (r, w) = pipe();
        req.send(w.as_raw_fd()).unwrap();
        let code = crate::raw::read_u32(r.as_raw_fd()).unwrap();
        let cmd = crate::command::Command::from_u32(code).unwrap();
        assert_eq!(cmd, req.command());
        let decoded = Request::recv(r.as_raw_fd(), cmd).unwrap();
        assert_eq!(format!("{decoded:?}"), format!("{req:?}"));
    }

    #[test]
    fn open_round_trips() {
        round_trip(Request::Open {
            path: b"/tmp/x".to_vec(),
            flags: libc::O_RDONLY,
            mode: 0,
        });
    }

    #[test]
    fn write_round_trips_with_payload() {
        round_trip(Request::Write {
            fd: 3,
            data: b"hello\n".to_vec(),
        });
    }

    #[test]
    fn seek_round_trips_negative_offsets() {
        round_trip(Request::Seek {
            fd: 4,
            offset: -1,
            whence: libc::SEEK_END,
        });
    }

    #[test]
    fn has_switched_to_seccomp_round_trips_with_no_payload() {
        round_trip(Request::HasSwitchedToSeccomp);
    }

    #[test]
    fn dup2_round_trips() {
        round_trip(Request::Dup2 { fd: 5, newfd: 9 });
    }
}
