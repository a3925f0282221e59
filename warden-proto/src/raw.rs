//! Raw, syscall-level framing primitives.
//!
//! These never go through libc's buffered I/O, and on the shim side must
//! never go through the shim's own interposed `read`/`write` — only a
//! direct syscall is safe to use once the strict filter has engaged.
//! Every helper here retries on short reads/writes and on `EINTR`.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;

/// Writes `buf` in full, retrying on short writes and `EINTR`.
pub fn send_all(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    let mut written = 0usize;
    while written < buf.len() {
        let n = unsafe {
            libc::write(
                fd,
                buf[written..].as_ptr().cast(),
                buf.len() - written,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        #[allow(clippy::cast_sign_loss)]
        {
            written += n as usize;
        }
    }
    Ok(())
}

/// Reads until `buf` is completely filled, retrying on short reads and
/// `EINTR`. Returns [`io::ErrorKind::UnexpectedEof`] if the peer closes the
/// pipe before `buf` is full.
pub fn recv_exact(fd: RawFd, buf: &mut [u8]) -> io::Result<()> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = unsafe {
            libc::read(
                fd,
                buf[read..].as_mut_ptr().cast(),
                buf.len() - read,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        #[allow(clippy::cast_sign_loss)]
        {
            read += n as usize;
        }
    }
    Ok(())
}

/// Error returned while waiting for the next command frame.
#[derive(Debug)]
pub enum RecvError {
    /// The peer closed its end of the pipe before any bytes arrived — a
    /// clean shutdown, not a protocol violation.
    Eof,
    /// An I/O error occurred mid-frame.
    Io(io::Error),
}

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "peer closed the pipe"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Reads the next 4-byte command code, distinguishing a clean EOF (no bytes
/// read before the peer hung up) from a frame cut short mid-header.
pub fn recv_command_code(fd: RawFd) -> Result<u32, RecvError> {
    let mut buf = [0u8; 4];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), 4) };
        if n == 0 {
            return Err(RecvError::Eof);
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(RecvError::Io(err));
        }
        #[allow(clippy::cast_sign_loss)]
        let got = n as usize;
        if got < 4 {
            recv_exact(fd, &mut buf[got..])?;
        }
        return Ok(u32::from_le_bytes(buf));
    }
}

pub fn write_u32(fd: RawFd, v: u32) -> io::Result<()> {
    send_all(fd, &v.to_le_bytes())
}

pub fn write_i32(fd: RawFd, v: i32) -> io::Result<()> {
    send_all(fd, &v.to_le_bytes())
}

pub fn write_u16(fd: RawFd, v: u16) -> io::Result<()> {
    send_all(fd, &v.to_le_bytes())
}

pub fn write_i64(fd: RawFd, v: i64) -> io::Result<()> {
    send_all(fd, &v.to_le_bytes())
}

pub fn read_u32(fd: RawFd) -> io::Result<u32> {
    let mut b = [0u8; 4];
    recv_exact(fd, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub fn read_i32(fd: RawFd) -> io::Result<i32> {
    let mut b = [0u8; 4];
    recv_exact(fd, &mut b)?;
    Ok(i32::from_le_bytes(b))
}

pub fn read_u16(fd: RawFd) -> io::Result<u16> {
    let mut b = [0u8; 2];
    recv_exact(fd, &mut b)?;
    Ok(u16::from_le_bytes(b))
}

pub fn read_i64(fd: RawFd) -> io::Result<i64> {
    let mut b = [0u8; 8];
    recv_exact(fd, &mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// Writes a path: a 2-byte length prefix followed by the raw bytes.
///
/// Callers are expected to have already enforced [`crate::MAX_PATH_LEN`].
pub fn write_path(fd: RawFd, path: &[u8]) -> io::Result<()> {
    debug_assert!(path.len() <= usize::from(u16::MAX));
    #[allow(clippy::cast_possible_truncation)]
    write_u16(fd, path.len() as u16)?;
    send_all(fd, path)
}

/// Reads a 2-byte-length-prefixed path.
pub fn read_path(fd: RawFd) -> io::Result<Vec<u8>> {
    let len = usize::from(read_u16(fd)?);
    let mut buf = vec![0u8; len];
    recv_exact(fd, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::{read_i64, read_path, read_u32, write_i64, write_path, write_u32};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn round_trips_scalars_and_paths_through_a_pipe() {
        let (r, w) = nix_pipe();
        write_u32(w.as_raw_fd(), 0xDEAD_BEEF).unwrap();
        write_i64(w.as_raw_fd(), -12345).unwrap();
        write_path(w.as_raw_fd(), b"/tmp/example").unwrap();

        assert_eq!(read_u32(r.as_raw_fd()).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_i64(r.as_raw_fd()).unwrap(), -12345);
        assert_eq!(read_path(r.as_raw_fd()).unwrap(), b"/tmp/example");
    }

    #[test]
    fn empty_path_round_trips() {
        let (r, w) = nix_pipe();
        write_path(w.as_raw_fd(), b"").unwrap();
        assert_eq!(read_path(r.as_raw_fd()).unwrap(), Vec::<u8>::new());
    }

    fn nix_pipe() -> (std::fs::File, std::fs::File) {
        use std::os::fd::FromRawFd;
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
}
