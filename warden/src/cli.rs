//! Command-line surface: `warden [-ro|-ro_extended|-rw|-rw_extended] <binary> <args...>`.

use clap::Parser;

use crate::policy::Mode;

/// The legacy single-dash spellings this launcher has always accepted.
const LEGACY_MODE_FLAGS: &[&str] = &["-ro", "-ro_extended", "-rw", "-rw_extended"];

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    version,
    about = "Seccomp strict-mode filesystem sandbox supervisor"
)]
pub struct Cli {
    /// Allow unrestricted reads; deny all writes (default).
    #[arg(long = "ro", group = "mode")]
    pub ro: bool,

    /// Like `-ro`, but skips the path allowlist — the kernel's own
    /// permissions are the only check.
    #[arg(long = "ro_extended", group = "mode")]
    pub ro_extended: bool,

    /// Allow reads and writes gated by the path allowlist.
    #[arg(long = "rw", group = "mode")]
    pub rw: bool,

    /// Like `-rw`, but skips the path allowlist.
    #[arg(long = "rw_extended", group = "mode")]
    pub rw_extended: bool,

    /// Suppress non-fatal `AccCtrl:` policy-reject logging.
    #[arg(short, long)]
    pub quiet: bool,

    /// Target executable and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parses `std::env::args()`, rewriting the legacy single-dash mode
    /// flags to the double-dash spelling `clap` expects. Everything from
    /// the first non-flag token onward (the target's own command line) is
    /// passed through untouched.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse_from(normalize_argv(std::env::args()))
    }

    /// The access mode selected by the flags (default: `Ro`).
    #[must_use]
    pub const fn mode(&self) -> Mode {
        if self.rw_extended {
            Mode::RwExtended
        } else if self.rw {
            Mode::Rw
        } else if self.ro_extended {
            Mode::RoExtended
        } else {
            Mode::Ro
        }
    }
}

/// Rewrites recognized legacy single-dash flags to double-dash, stopping
/// at the first token that isn't one of them (the start of the target's
/// own command line, which must never be touched).
fn normalize_argv(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = args.into_iter();
    if let Some(program) = iter.next() {
        out.push(program);
    }
    let mut past_flags = false;
    for arg in iter {
        if !past_flags && LEGACY_MODE_FLAGS.contains(&arg.as_str()) {
            out.push(format!("-{arg}"));
        } else {
            past_flags = true;
            out.push(arg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::normalize_argv;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn rewrites_legacy_flags_before_the_target_command() {
        let out = normalize_argv(strs(&["warden", "-ro", "cat", "/etc/inputrc"]));
        assert_eq!(out, strs(&["warden", "--ro", "cat", "/etc/inputrc"]));
    }

    #[test]
    fn does_not_touch_flag_like_tokens_in_the_target_command() {
        let out = normalize_argv(strs(&["warden", "-rw", "ls", "-la"]));
        assert_eq!(out, strs(&["warden", "--rw", "ls", "-la"]));
    }

    #[test]
    fn leaves_an_all_default_invocation_alone() {
        let out = normalize_argv(strs(&["warden", "cat", "/etc/inputrc"]));
        assert_eq!(out, strs(&["warden", "cat", "/etc/inputrc"]));
    }
}
