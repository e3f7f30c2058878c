//! The syscall behavioral handlers, grouped the way the
//! dispatch table groups them: file/path, memory, process/thread,
//! futex, signals, system-query, time, and networking.

pub mod file;
pub mod futex;
pub mod mem;
pub mod memquery;
pub mod net;
pub mod process;
pub mod signal;
pub mod time;

use crate::dispatch::SyscallOutcome;
use emu_core::Errno;

/// A handler bailed out on a host I/O error, bad fd, etc: -1 to the
/// guest, processing continues.
fn recoverable(errno: Errno) -> SyscallOutcome {
    SyscallOutcome::Value(errno.to_guest_value())
}

fn ok(value: i64) -> SyscallOutcome {
    SyscallOutcome::Value(value)
}
