//! The 32-bit command code that begins every request frame.

/// A command code drawn from the fixed wire enumeration.
///
/// The discriminants and ordering match the on-disk enumeration this
/// protocol was carried forward from; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Sent once by the shim after the strict filter engages. No reply.
    HasSwitchedToSeccomp = 0,
    Open = 1,
    Close = 2,
    Read = 3,
    Write = 4,
    Seek = 5,
    Stat = 6,
    Fstat = 7,
    Mkdir = 8,
    Unlink = 9,
    Remove = 10,
    Rmdir = 11,
    Ftruncate = 12,
    Dup = 13,
    Dup2 = 14,
    Opendir = 15,
    Readdir = 16,
    Readdir64 = 17,
    /// No reply is sent for this command.
    Rewinddir = 18,
    Closedir = 19,
    SelectStdin = 20,
}

impl Command {
    /// Decodes a command code off the wire, rejecting unknown values.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::HasSwitchedToSeccomp,
            1 => Self::Open,
            2 => Self::Close,
            3 => Self::Read,
            4 => Self::Write,
            5 => Self::Seek,
            6 => Self::Stat,
            7 => Self::Fstat,
            8 => Self::Mkdir,
            9 => Self::Unlink,
            10 => Self::Remove,
            11 => Self::Rmdir,
            12 => Self::Ftruncate,
            13 => Self::Dup,
            14 => Self::Dup2,
            15 => Self::Opendir,
            16 => Self::Readdir,
            17 => Self::Readdir64,
            18 => Self::Rewinddir,
            19 => Self::Closedir,
            20 => Self::SelectStdin,
            _ => return None,
        })
    }

    /// The wire encoding of this command.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn round_trips_every_variant() {
        let all = [
            Command::HasSwitchedToSeccomp,
            Command::Open,
            Command::Close,
            Command::Read,
            Command::Write,
            Command::Seek,
            Command::Stat,
            Command::Fstat,
            Command::Mkdir,
            Command::Unlink,
            Command::Remove,
            Command::Rmdir,
            Command::Ftruncate,
            Command::Dup,
            Command::Dup2,
            Command::Opendir,
            Command::Readdir,
            Command::Readdir64,
            Command::Rewinddir,
            Command::Closedir,
            Command::SelectStdin,
        ];
        for cmd in all {
            assert_eq!(Command::from_u32(cmd.as_u32()), Some(cmd));
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        assert_eq!(Command::from_u32(21), None);
        assert_eq!(Command::from_u32(u32::MAX), None);
    }
}
