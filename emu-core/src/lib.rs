//! Shared foundation for the emulator's POSIX syscall layer: architecture
//! and OS tags, the errno taxonomy, the crate-wide error type, the
//! `CpuEngine` trait the instruction emulator is consumed through, and
//! the handful of guest/host translation tables (open flags, stat
//! layouts) more than one syscall-layer crate needs.

pub mod arch;
pub mod engine;
pub mod errno;
pub mod error;
pub mod fd_source;
pub mod flags;
pub mod stat;

pub use arch::{Arch, GuestOs, HostOs};
pub use engine::{CpuEngine, NullEngine, RegId};
pub use errno::{mips_error_flag, Errno};
pub use error::{EmuError, EmuResult};
pub use fd_source::FdSource;
pub use flags::{host_flags_to_guest, map_anonymous_value, open_flag_mapping, HostOpenFlags};
pub use stat::StatInfo;
