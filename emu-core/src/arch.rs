//! Architecture and OS tags shared across every syscall-layer crate.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    Arm,
    Arm64,
    X86,
    X8664,
    Mips32El,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::X86 => "x86",
            Arch::X8664 => "x86_64",
            Arch::Mips32El => "mips32el",
        };
        f.write_str(name)
    }
}

/// Host platform the emulator process itself runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostOs {
    Linux,
    Macos,
}

/// Guest OS personality the syscall table is numbered for.
///
/// Only the POSIX family is implemented; Windows is tagged for the
/// embedding surface (`EmuOptions.platform`) but has no dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestOs {
    Linux,
    Macos,
    Freebsd,
    Windows,
}

impl fmt::Display for GuestOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuestOs::Linux => "linux",
            GuestOs::Macos => "macos",
            GuestOs::Freebsd => "freebsd",
            GuestOs::Windows => "windows",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_display_matches_cli_flag_spelling() {
        assert_eq!(Arch::X8664.to_string(), "x86_64");
        assert_eq!(Arch::Mips32El.to_string(), "mips32el");
    }

    #[test]
    fn guest_os_display_matches_cli_flag_spelling() {
        assert_eq!(GuestOs::Freebsd.to_string(), "freebsd");
        assert_eq!(GuestOs::Windows.to_string(), "windows");
    }

    #[test]
    fn arch_variants_compare_by_identity() {
        assert_eq!(Arch::X86, Arch::X86);
        assert_ne!(Arch::X86, Arch::X8664);
    }
}
