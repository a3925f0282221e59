//! Opaque, ABI-fixed kernel structures passed through verbatim.
//!
//! `stat` and `dirent64` are not re-encoded field-by-field: both sides must
//! already be compiled for the same architecture (see the open question in
//! `DESIGN.md`), so the cheapest and least error-prone thing to do is copy
//! the raw bytes the kernel produced straight across the pipe.

#![allow(unsafe_code)]

/// Size in bytes of a `struct stat` on this architecture.
pub const STAT_SIZE: usize = std::mem::size_of::<libc::stat>();

/// Size in bytes of a `struct dirent64` on this architecture.
pub const DIRENT_SIZE: usize = std::mem::size_of::<libc::dirent64>();

/// A `struct stat`, carried as an opaque byte blob.
#[derive(Debug, Clone)]
pub struct StatBlob(pub [u8; STAT_SIZE]);

impl StatBlob {
    /// Copies `st` into a wire-ready blob.
    #[must_use]
    pub fn from_stat(st: &libc::stat) -> Self {
        let mut bytes = [0u8; STAT_SIZE];
        // SAFETY: `libc::stat` is a plain-old-data struct with no
        // interior pointers; reading its representation as bytes is sound.
        let src = unsafe {
            std::slice::from_raw_parts((std::ptr::from_ref(st)).cast::<u8>(), STAT_SIZE)
        };
        bytes.copy_from_slice(src);
        Self(bytes)
    }

    /// Reinterprets the blob as a `struct stat`.
    #[must_use]
    pub fn as_stat(&self) -> libc::stat {
        // SAFETY: `self.0` was produced from a `libc::stat` of the same
        // size on the same architecture (same-architecture assumption,
        // documented in DESIGN.md).
        unsafe { std::ptr::read(self.0.as_ptr().cast()) }
    }
}

/// A `struct dirent64`, carried as an opaque byte blob.
#[derive(Debug, Clone)]
pub struct DirentBlob(pub [u8; DIRENT_SIZE]);

impl DirentBlob {
    /// Copies `d` into a wire-ready blob.
    #[must_use]
    pub fn from_dirent(d: &libc::dirent64) -> Self {
        let mut bytes = [0u8; DIRENT_SIZE];
        // SAFETY: see `StatBlob::from_stat`.
        let src = unsafe {
            std::slice::from_raw_parts((std::ptr::from_ref(d)).cast::<u8>(), DIRENT_SIZE)
        };
        bytes.copy_from_slice(src);
        Self(bytes)
    }

    /// Reinterprets the blob as a `struct dirent64`.
    #[must_use]
    pub fn as_dirent(&self) -> libc::dirent64 {
        // SAFETY: see `StatBlob::as_stat`.
        unsafe { std::ptr::read(self.0.as_ptr().cast()) }
    }
}

#[cfg(test)]
mod tests {
    use super::StatBlob;

    #[test]
    fn stat_blob_round_trips_through_raw_bytes() {
        // SAFETY: zero-initialized `stat` is a valid bit pattern.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_size = 4096;
        st.st_mode = 0o100_644;

        let blob = StatBlob::from_stat(&st);
        let back = blob.as_stat();
        assert_eq!(back.st_size, 4096);
        assert_eq!(back.st_mode, 0o100_644);
    }
}
