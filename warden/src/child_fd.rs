//! Fixed-capacity bitset tracking which fd slots the child currently owns.

use warden_proto::MAX_CHILD_FDS;

/// Tracks which of the child's logical fd-table slots are owned.
///
/// Every fd the child names in a read/write/seek/close/fstat request must
/// be marked owned here, or the supervisor must reject it outright rather
/// than touch the real descriptor.
#[derive(Debug)]
pub struct ChildFdTable {
    owned: Box<[bool; MAX_CHILD_FDS]>,
}

impl ChildFdTable {
    /// Creates a table with stdin/stdout/stderr pre-marked as owned.
    #[must_use]
    pub fn new() -> Self {
        let mut owned = Box::new([false; MAX_CHILD_FDS]);
        owned[0] = true;
        owned[1] = true;
        owned[2] = true;
        Self { owned }
    }

    #[must_use]
    pub fn is_owned(&self, fd: i32) -> bool {
        usize::try_from(fd).is_ok_and(|i| i < MAX_CHILD_FDS && self.owned[i])
    }

    /// Records `fd` as owned. Returns `false` if `fd` is outside the
    /// table's capacity — callers must treat that the same as `ENFILE`.
    pub fn mark_owned(&mut self, fd: i32) -> bool {
        match usize::try_from(fd) {
            Ok(i) if i < MAX_CHILD_FDS => {
                self.owned[i] = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, fd: i32) {
        if let Ok(i) = usize::try_from(fd) {
            if i < MAX_CHILD_FDS {
                self.owned[i] = false;
            }
        }
    }
}

impl Default for ChildFdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ChildFdTable;

    #[test]
    fn stdio_fds_are_pre_owned() {
        let t = ChildFdTable::new();
        assert!(t.is_owned(0));
        assert!(t.is_owned(1));
        assert!(t.is_owned(2));
        assert!(!t.is_owned(3));
    }

    #[test]
    fn mark_then_clear_round_trips() {
        let mut t = ChildFdTable::new();
        assert!(t.mark_owned(7));
        assert!(t.is_owned(7));
        t.clear(7);
        assert!(!t.is_owned(7));
    }

    #[test]
    fn rejects_fd_at_or_beyond_capacity() {
        let mut t = ChildFdTable::new();
        assert!(!t.mark_owned(1024));
        assert!(!t.is_owned(1024));
    }

    #[test]
    fn negative_fds_are_never_owned() {
        let t = ChildFdTable::new();
        assert!(!t.is_owned(-1));
    }
}
