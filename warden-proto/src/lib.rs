//! Wire protocol between `warden` (supervisor) and `warden-shim` (shim).
//!
//! Framing is synchronous and built only on raw `read`/`write` so it works
//! from the shim's no-runtime context after the strict filter engages.
//! There is deliberately no generic derive (`serde`/`postcard`): several
//! payloads carry ABI-fixed kernel blobs (`stat`, `dirent64`) that must
//! cross the wire byte-for-byte, and both processes are assumed compiled
//! for the same architecture — see [`blob`].

pub mod blob;
pub mod command;
pub mod raw;
pub mod reply;
pub mod request;

pub use blob::{DirentBlob, StatBlob};
pub use command::Command;
pub use raw::RecvError;
pub use reply::Reply;
pub use request::Request;

/// Longest path accepted without contacting the supervisor.
///
/// Paths beyond this are rejected with `ENAMETOOLONG` locally by the shim.
pub const MAX_PATH_LEN: usize = 65535;

/// Capacity of the supervisor's child-fd table.
pub const MAX_CHILD_FDS: usize = 1024;

/// Capacity of the supervisor's child-dir table.
pub const MAX_CHILD_DIRS: usize = 32;
