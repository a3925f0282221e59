//! Top-level error type for the supervisor binary.

use std::io;
use std::path::PathBuf;

/// Errors the supervisor can report.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No target command was given on the command line.
    #[error("missing target command")]
    BadFlag,
    /// The shim shared object could not be found next to this binary.
    #[error("shim library not found at {}", .0.display())]
    MissingShim(PathBuf),
    /// Spawning the target process failed.
    #[error("failed to spawn target: {0}")]
    Spawn(#[source] io::Error),
    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias for this crate's fallible results.
pub type Result<T> = std::result::Result<T, Error>;
