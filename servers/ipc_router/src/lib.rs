//! Futex wait/wake predicates and the `socketpair()` constructor; pipes
//! themselves are `GuestPipe` (owned by `exo-vfs-server`) since a pipe is
//! just another tagged `GuestIo` variant, but the futex plumbing needs
//! its own home since it talks to the `CpuEngine`'s memory directly and
//! the scheduler's predicate type, not to the fd table.

use emu_core::CpuEngine;
use exo_scheduler_server::Predicate;
use exo_vfs_server::GuestSocket;

/// Low bits of `futex_op` carry the operation; `FUTEX_PRIVATE_FLAG`
/// (0x80) is masked off since this emulator never shares futex state
/// across host processes.
pub const FUTEX_PRIVATE_FLAG: u32 = 0x80;
pub const FUTEX_WAIT: u32 = 0;
pub const FUTEX_WAKE: u32 = 1;

pub fn futex_op_kind(op: u32) -> u32 {
    op & !FUTEX_PRIVATE_FLAG
}

/// Build the predicate for `futex(FUTEX_WAIT, uaddr, val)`: the thread
/// stays blocked while the word at `uaddr` still equals `val`, i.e. the
/// predicate (which the scheduler reads as "still blocked?") returns
/// true until a concurrent write changes it.
pub fn wait_predicate(uaddr: u64, val: u32) -> Predicate {
    Box::new(move |engine: &mut dyn CpuEngine, _running_time: u64| {
        match engine.mem_read(uaddr, 4) {
            Ok(bytes) if bytes.len() == 4 => {
                let word = u32::from_le_bytes(bytes.try_into().unwrap());
                word == val
            }
            _ => false,
        }
    })
}

/// Build the predicate for a timed wait (`nanosleep` in multi-thread
/// mode): blocked while the scheduler's running-time counter hasn't yet
/// reached `until`.
pub fn timer_predicate(until: u64) -> Predicate {
    Box::new(move |_engine: &mut dyn CpuEngine, running_time: u64| running_time < until)
}

/// `socketpair(domain, type, protocol, sv)`: one host
/// `socketpair()` call, wrapped as two connected `GuestSocket`s the same
/// way `pipe()` allocates two connected `GuestPipe` ends.
pub fn socketpair(domain: i32, sock_type: i32, protocol: i32) -> Result<(GuestSocket, GuestSocket), emu_core::Errno> {
    use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
    // POSIX only defines socketpair() for AF_UNIX; domain is accepted
    // but not otherwise interpreted, matching every libc implementation.
    let af = AddressFamily::Unix;
    let ty = match sock_type & 0xf {
        2 => SockType::Datagram,
        _ => SockType::Stream,
    };
    let (a, b) = socket::socketpair(af, ty, None, SockFlag::empty())
        .map_err(|e| emu_core::Errno::from_raw(e as i32).unwrap_or(emu_core::Errno::EIO))?;
    Ok((GuestSocket::from_fd(a, domain, sock_type, protocol), GuestSocket::from_fd(b, domain, sock_type, protocol)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::NullEngine;

    #[test]
    fn wait_predicate_clears_when_word_changes() {
        let mut engine = NullEngine::new();
        engine.mem_map(0x1000, 0x1000).unwrap();
        engine.mem_write(0x1000, &1u32.to_le_bytes()).unwrap();
        let mut predicate = wait_predicate(0x1000, 1);
        assert!(predicate(&mut engine, 0));
        engine.mem_write(0x1000, &2u32.to_le_bytes()).unwrap();
        assert!(!predicate(&mut engine, 0));
    }

    #[test]
    fn futex_op_kind_masks_private_flag() {
        assert_eq!(futex_op_kind(FUTEX_WAIT | FUTEX_PRIVATE_FLAG), FUTEX_WAIT);
        assert_eq!(futex_op_kind(FUTEX_WAKE | FUTEX_PRIVATE_FLAG), FUTEX_WAKE);
    }

    #[test]
    fn timer_predicate_clears_once_time_elapses() {
        let mut engine = NullEngine::new();
        let mut predicate = timer_predicate(10);
        assert!(predicate(&mut engine, 5));
        assert!(!predicate(&mut engine, 10));
    }
}
