//! Thin framing layer over the two pipes, built only on
//! [`warden_proto::raw`]'s direct-syscall primitives.
//!
//! Every hook in [`crate::fs_hooks`] and [`crate::stdio`] goes through
//! [`call`], never through the interposed `read`/`write` symbols this
//! crate itself exports — doing so would recurse into the shim's own
//! hooks.

use warden_proto::{Reply, Request};

use crate::state;

/// Sends `request` and blocks for its reply.
///
/// # Panics
/// Panics if the pipes are unreadable — a desynchronized protocol stream
/// is unrecoverable and the shim has no safe fallback at that point.
pub fn call(request: Request) -> Reply {
    let command = request.command();
    request
        .send(state::request_fd())
        .expect("request pipe write failed");
    Reply::recv_for(command, state::reply_fd()).expect("reply pipe read failed")
}

/// Sends a request that expects no reply (`HAS_SWITCHED_TO_SECCOMP`,
/// `REWINDDIR`).
pub fn notify(request: Request) {
    request
        .send(state::request_fd())
        .expect("request pipe write failed");
}
