//! Spawns the target process with the shim preloaded and the protocol
//! pipes wired into its environment.
//!
//! The child's real stdin/stdout/stderr are simply inherited from the
//! supervisor — once the strict filter engages, the child never issues a
//! direct read/write syscall against them again. Every intercepted
//! `read(0,…)`/`write(1,…)`/`write(2,…)` instead becomes a request the
//! supervisor serves using *its own* fd 0/1/2, which is why the
//! child-fd table pre-marks those three indices as owned (see
//! `child_fd.rs`).

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use crate::error::{Error, Result};

const SHIM_FILENAME: &str = "libwarden_shim.so";

fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    // SAFETY: `fds` is a valid 2-element buffer for `pipe(2)`.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `pipe(2)` just handed back two freshly-owned descriptors.
    Ok(unsafe {
        (
            OwnedFd::from_raw_fd(fds[0]),
            OwnedFd::from_raw_fd(fds[1]),
        )
    })
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is a valid, open descriptor owned by this process.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: same as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Locates the shim shared object next to this binary, per the
/// `/proc/self/exe`-relative convention the protocol requires.
pub fn find_shim_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let candidate = dir.join(SHIM_FILENAME);
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(Error::MissingShim(candidate))
    }
}

/// The supervisor's retained ends of the two protocol pipes.
pub struct Pipes {
    /// Request pipe read end: the supervisor reads commands here.
    pub request_read: OwnedFd,
    /// Reply pipe write end: the supervisor writes replies here.
    pub reply_write: OwnedFd,
}

/// Spawns `argv[0]` with `argv[1..]`, the shim preloaded via
/// `LD_PRELOAD`, and the protocol pipes connected.
pub fn spawn(shim_path: &Path, argv: &[String]) -> Result<(Child, Pipes)> {
    let (program, args) = argv.split_first().ok_or(Error::BadFlag)?;

    // child writes requests, supervisor reads them
    let (request_read, request_write) = create_pipe()?;
    // supervisor writes replies, child reads them
    let (reply_read, reply_write) = create_pipe()?;

    // The supervisor's own ends must never leak into the child — if they
    // did, the request pipe would never see EOF once the child exits.
    set_cloexec(request_read.as_raw_fd())?;
    set_cloexec(reply_write.as_raw_fd())?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.env("LD_PRELOAD", shim_path);
    cmd.env("PIPE_IN", reply_read.as_raw_fd().to_string());
    cmd.env("PIPE_OUT", request_write.as_raw_fd().to_string());

    // SAFETY: the closure only calls `prctl`, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(Error::Spawn)?;

    // The child now holds its own copies of these two descriptors from
    // the fork; the supervisor has no further use for them.
    drop(request_write);
    drop(reply_read);

    Ok((
        child,
        Pipes {
            request_read,
            reply_write,
        },
    ))
}
