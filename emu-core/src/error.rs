//! Crate-wide error taxonomy.

use crate::arch::{Arch, GuestOs};
use crate::errno::Errno;
use thiserror::Error;

/// Top-level result alias used by every syscall-layer crate.
pub type EmuResult<T> = Result<T, EmuError>;

#[derive(Debug, Error)]
pub enum EmuError {
    /// A recoverable, per-syscall failure. Handlers convert this to -1
    /// (and the MIPS A3 flag) and keep running; it never unwinds.
    #[error("errno {0:?}: {}", .0.describe())]
    Errno(Errno),

    /// The dispatcher found no handler for `(guest_os, arch, number)`.
    /// Fatal: stops the CPU engine.
    #[error("unknown syscall {number} for {guest_os}/{arch}")]
    UnknownSyscall {
        guest_os: GuestOs,
        arch: Arch,
        number: u64,
    },

    /// The `CpuEngine` itself faulted (bad memory access, invalid
    /// instruction). Propagated out of `run()` as a process-level error.
    #[error("engine fault: {0}")]
    Engine(String),

    /// Bad `EmuOptions` / sandbox setup at construction time.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EmuError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EmuError::Errno(_))
    }
}

impl From<Errno> for EmuError {
    fn from(errno: Errno) -> Self {
        EmuError::Errno(errno)
    }
}

impl From<std::io::Error> for EmuError {
    fn from(err: std::io::Error) -> Self {
        EmuError::Errno(Errno::from_io_error(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_errno_is_non_fatal() {
        assert!(!EmuError::Errno(Errno::EAGAIN).is_fatal());
        assert!(EmuError::Engine("bad opcode".into()).is_fatal());
        assert!(EmuError::Config("no rootfs".into()).is_fatal());
        assert!(EmuError::UnknownSyscall { guest_os: GuestOs::Linux, arch: Arch::X8664, number: 999 }.is_fatal());
    }

    #[test]
    fn io_error_conversion_is_never_fatal() {
        let io_err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let emu_err: EmuError = io_err.into();
        assert!(!emu_err.is_fatal());
        assert!(matches!(emu_err, EmuError::Errno(Errno::ENOENT)));
    }

    #[test]
    fn unknown_syscall_message_names_the_abi() {
        let err = EmuError::UnknownSyscall { guest_os: GuestOs::Macos, arch: Arch::Arm64, number: 321 };
        assert!(err.to_string().contains("321"));
    }
}
