//! Path-policy evaluation: which paths the sandboxed child may touch.
//!
//! Extended modes bypass this module entirely — the kernel's own
//! permission checks are the only gate. Strict modes (`Ro`, `Rw`) consult,
//! in order: the dynamic `/tmp/*` allowlist, a small fixed set of system
//! reads, then the command-line argument vector treated as an allowlist of
//! paths the target itself named.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Access mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reads gated by the allowlist; all writes rejected.
    Ro,
    /// Reads unconditionally allowed; all writes rejected.
    RoExtended,
    /// Reads and writes gated by the allowlist.
    Rw,
    /// Reads and writes unconditionally allowed.
    RwExtended,
}

impl Mode {
    /// Whether this mode skips the allowlist check (relying solely on the
    /// kernel's own permission checks).
    #[must_use]
    pub const fn is_extended(self) -> bool {
        matches!(self, Self::RoExtended | Self::RwExtended)
    }

    /// Whether this mode ever admits a write.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Rw | Self::RwExtended)
    }
}

/// The kind of access being requested, for allowlist purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Unlink,
}

/// Fixed system paths readable regardless of the argv allowlist.
const FIXED_SYSTEM_READS: &[&str] = &["/dev/urandom", "/etc/inputrc", "/lib/terminfo/x/xterm"];

fn is_fixed_system_read(path: &str) -> bool {
    FIXED_SYSTEM_READS.contains(&path)
        || path.contains("/lib/python")
        || path.contains("/include/python")
        || path.starts_with("/usr/share/gdal")
        || std::env::var("GDAL_DATA")
            .ok()
            .is_some_and(|dir| !dir.is_empty() && path.starts_with(&dir))
}

/// Tracks `/tmp/*` paths the child has written, so it may read or unlink
/// them back in strict mode even though they weren't named on argv.
#[derive(Debug, Default)]
pub struct TmpAllowlist(HashSet<PathBuf>);

impl TmpAllowlist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&mut self, path: &Path) {
        self.0.insert(path.to_path_buf());
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    pub fn forget(&mut self, path: &Path) {
        self.0.remove(path);
    }
}

fn under_tmp_without_dotdot(path: &Path) -> bool {
    path.starts_with("/tmp/") && !path.components().any(|c| c == Component::ParentDir)
}

/// True if `candidate`'s final path component shares everything up to (and
/// including) its last `.` with `allowed`, and `allowed` has no further `/`
/// past that point — e.g. opening `foo.baz` is admitted by an argv entry of
/// `foo.bar` in the same directory.
fn share_a_radix(allowed: &str, candidate: &str) -> bool {
    let Some(dot) = candidate.rfind('.') else {
        return false;
    };
    let component_start = candidate.rfind('/').map_or(0, |i| i + 1);
    if dot < component_start {
        return false; // the dot belongs to an earlier path component
    }
    let Some(allowed_prefix) = allowed.get(..dot) else {
        return false;
    };
    if allowed_prefix != &candidate[..dot] {
        return false;
    }
    !allowed[dot..].contains('/')
}

fn allowed_by_argv(path: &Path, argv: &[String]) -> bool {
    let candidate = path.to_string_lossy();
    for arg in argv {
        if arg.as_str() == candidate {
            return true;
        }
        let Ok(resolved) = std::fs::canonicalize(arg) else {
            continue;
        };
        if resolved == path {
            return true;
        }
        if resolved.is_dir() && path.starts_with(&resolved) {
            return true;
        }
        if share_a_radix(&resolved.to_string_lossy(), &candidate) {
            return true;
        }
    }
    false
}

/// Resolves `path` the way policy evaluation requires: `realpath` when it
/// succeeds, else a lexical join guarded against `..` and `./` segments.
#[must_use]
pub fn resolve_path(cwd: &Path, path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };
    if let Ok(real) = std::fs::canonicalize(&joined) {
        return Some(real);
    }
    let text = joined.to_string_lossy();
    if text.contains("..") || text.contains("./") {
        return None;
    }
    Some(joined)
}

/// Evaluates whether `path` may be accessed under `mode` for `op`.
#[must_use]
pub fn file_allowed(path: &Path, argv: &[String], op: Op, mode: Mode, tmp: &TmpAllowlist) -> bool {
    if mode.is_extended() {
        return true;
    }
    if under_tmp_without_dotdot(path) {
        return match op {
            Op::Write => true,
            Op::Read | Op::Unlink => tmp.contains(path),
        };
    }
    if op == Op::Read && is_fixed_system_read(&path.to_string_lossy()) {
        return true;
    }
    allowed_by_argv(path, argv)
}

#[cfg(test)]
mod tests {
    use super::{Mode, Op, TmpAllowlist, file_allowed, resolve_path, share_a_radix};
    use std::path::Path;

    #[test]
    fn extended_modes_admit_everything() {
        let tmp = TmpAllowlist::new();
        assert!(file_allowed(
            Path::new("/anything/at/all"),
            &[],
            Op::Write,
            Mode::RoExtended,
            &tmp
        ));
    }

    #[test]
    fn strict_ro_rejects_writes_outside_tmp() {
        let tmp = TmpAllowlist::new();
        assert!(!file_allowed(
            Path::new("/etc/passwd"),
            &[],
            Op::Write,
            Mode::Ro,
            &tmp
        ));
    }

    #[test]
    fn tmp_write_then_read_then_unlink_cycle() {
        let mut tmp = TmpAllowlist::new();
        let path = Path::new("/tmp/x");
        assert!(file_allowed(path, &[], Op::Write, Mode::Rw, &tmp));
        tmp.record_write(path);
        assert!(file_allowed(path, &[], Op::Read, Mode::Rw, &tmp));
        assert!(file_allowed(path, &[], Op::Unlink, Mode::Rw, &tmp));
        tmp.forget(path);
        assert!(!file_allowed(path, &[], Op::Read, Mode::Rw, &tmp));
    }

    #[test]
    fn tmp_path_with_dotdot_is_not_trusted_by_the_tmp_rule() {
        let tmp = TmpAllowlist::new();
        assert!(!file_allowed(
            Path::new("/tmp/../etc/passwd"),
            &[],
            Op::Read,
            Mode::Rw,
            &tmp
        ));
    }

    #[test]
    fn fixed_system_reads_are_always_allowed() {
        let tmp = TmpAllowlist::new();
        assert!(file_allowed(
            Path::new("/etc/inputrc"),
            &[],
            Op::Read,
            Mode::Ro,
            &tmp
        ));
    }

    #[test]
    fn argv_exact_match_is_allowed() {
        let tmp = TmpAllowlist::new();
        let argv = vec!["/etc/myconfig".to_string()];
        assert!(file_allowed(
            Path::new("/etc/myconfig"),
            &argv,
            Op::Read,
            Mode::Ro,
            &tmp
        ));
    }

    #[test]
    fn share_a_radix_allows_same_stem_sibling() {
        assert!(share_a_radix("/data/foo.bar", "/data/foo.baz"));
    }

    #[test]
    fn share_a_radix_rejects_a_different_directory() {
        assert!(!share_a_radix("/data/foo.bar", "/other/foo.baz"));
    }

    #[test]
    fn share_a_radix_rejects_a_deeper_path() {
        assert!(!share_a_radix("/data/foo.bar", "/data/foo.baz/nested"));
    }

    #[test]
    fn resolve_path_falls_back_to_lexical_join_for_nonexistent_files() {
        let resolved = resolve_path(Path::new("/tmp"), "new-file.txt").unwrap();
        assert_eq!(resolved, Path::new("/tmp/new-file.txt"));
    }

    #[test]
    fn resolve_path_rejects_dotdot_when_it_cannot_canonicalize() {
        assert!(resolve_path(Path::new("/tmp"), "../escaped").is_none());
    }

    #[test]
    fn argv_directory_prefix_admits_a_real_file_inside_it() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested.txt");
        std::fs::write(&nested, b"data").unwrap();

        let tmp = TmpAllowlist::new();
        let argv = vec![dir.path().to_string_lossy().into_owned()];
        assert!(file_allowed(&nested, &argv, Op::Read, Mode::Ro, &tmp));
    }

    #[test]
    fn argv_directory_prefix_rejects_a_sibling_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sibling = tempfile::tempdir().unwrap();
        let outside = sibling.path().join("nested.txt");
        std::fs::write(&outside, b"data").unwrap();

        let tmp = TmpAllowlist::new();
        let argv = vec![dir.path().to_string_lossy().into_owned()];
        assert!(!file_allowed(&outside, &argv, Op::Read, Mode::Ro, &tmp));
    }
}
