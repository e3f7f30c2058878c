//! Open-flag translation table and the per-arch `MAP_ANONYMOUS` values
//! `MemorySpace::mmap` needs.

use crate::arch::{Arch, GuestOs};

bitflags::bitflags! {
    /// A *translated* (host-encoding) set of open(2) flags.
    #[derive(Default)]
    pub struct HostOpenFlags: u32 {
        const O_RDONLY    = 0;
        const O_WRONLY    = 0x1;
        const O_RDWR      = 0x2;
        const O_NONBLOCK  = 0x800;
        const O_APPEND    = 0x400;
        const O_ASYNC     = 0x2000;
        const O_SYNC      = 0x101000;
        const O_NOFOLLOW  = 0x20000;
        const O_CREAT     = 0x40;
        const O_TRUNC     = 0x200;
        const O_EXCL      = 0x80;
        const O_NOCTTY    = 0x100;
        const O_DIRECTORY = 0x10000;
    }
}

/// One row of the macOS/Linux open-flag table.
struct FlagRow {
    macos: u32,
    linux: u32,
    host: HostOpenFlags,
}

const TABLE: &[FlagRow] = &[
    FlagRow { macos: 0x0, linux: 0, host: HostOpenFlags::O_RDONLY },
    FlagRow { macos: 0x1, linux: 1, host: HostOpenFlags::O_WRONLY },
    FlagRow { macos: 0x2, linux: 2, host: HostOpenFlags::O_RDWR },
    FlagRow { macos: 0x4, linux: 0x800, host: HostOpenFlags::O_NONBLOCK },
    FlagRow { macos: 0x8, linux: 0x400, host: HostOpenFlags::O_APPEND },
    FlagRow { macos: 0x40, linux: 0x2000, host: HostOpenFlags::O_ASYNC },
    FlagRow { macos: 0x80, linux: 0x101000, host: HostOpenFlags::O_SYNC },
    FlagRow { macos: 0x100, linux: 0x20000, host: HostOpenFlags::O_NOFOLLOW },
    FlagRow { macos: 0x200, linux: 0x40, host: HostOpenFlags::O_CREAT },
    FlagRow { macos: 0x400, linux: 0x200, host: HostOpenFlags::O_TRUNC },
    FlagRow { macos: 0x800, linux: 0x80, host: HostOpenFlags::O_EXCL },
    FlagRow { macos: 0x20000, linux: 0x100, host: HostOpenFlags::O_NOCTTY },
    FlagRow { macos: 0x100000, linux: 0x10000, host: HostOpenFlags::O_DIRECTORY },
];

/// Translate a guest's raw open(2) `flags` word (encoded per `guest_os`'s
/// libc) into the host's own bit layout.
///
/// The access-mode bits (`O_RDONLY`/`O_WRONLY`/`O_RDWR`) are not a
/// bitmask on either side (`O_RDONLY == 0`), so they're matched
/// specially; every other bit is OR'd in when set in `flags`. FreeBSD
/// shares Linux's low bits closely enough to reuse that column; Windows
/// has no POSIX open() path in this layer.
pub fn open_flag_mapping(guest_os: GuestOs, flags: u32) -> HostOpenFlags {
    let mut host = HostOpenFlags::empty();
    let is_macos = matches!(guest_os, GuestOs::Macos);

    let access = flags & 0x3;
    for row in TABLE.iter().take(3) {
        let guest_value = if is_macos { row.macos } else { row.linux };
        if access == guest_value {
            host |= row.host;
            break;
        }
    }

    for row in &TABLE[3..] {
        let guest_bit = if is_macos { row.macos } else { row.linux };
        if guest_bit != 0 && flags & guest_bit == guest_bit {
            host |= row.host;
        }
    }

    host
}

/// Invert [`open_flag_mapping`]: given a *host* flag set, reconstruct the
/// `guest_os`-encoded word that would produce it. Lets a macOS-encoded
/// word survive a round trip through the host layout and back.
pub fn host_flags_to_guest(guest_os: GuestOs, host: HostOpenFlags) -> u32 {
    let is_macos = matches!(guest_os, GuestOs::Macos);
    let mut guest = 0u32;

    for row in TABLE.iter().take(3) {
        if host.contains(row.host) && row.host != HostOpenFlags::O_RDONLY {
            guest |= if is_macos { row.macos } else { row.linux };
        }
    }
    for row in &TABLE[3..] {
        if host.contains(row.host) {
            guest |= if is_macos { row.macos } else { row.linux };
        }
    }
    guest
}

/// The numeric value of `MAP_ANONYMOUS` as the guest encodes it: it
/// differs per architecture because MIPS/Linux historically diverged
/// from the rest of the Linux `mmap` flag layout.
pub fn map_anonymous_value(arch: Arch) -> u32 {
    match arch {
        Arch::Mips32El => 0x800,
        _ => 0x20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_recognized_flags() {
        let linux_word = 0x40 | 0x400 | 0x800; // O_CREAT | O_APPEND | O_NONBLOCK
        let host = open_flag_mapping(GuestOs::Linux, linux_word);
        let macos_word = host_flags_to_guest(GuestOs::Macos, host);
        let back = open_flag_mapping(GuestOs::Macos, macos_word);
        assert_eq!(host, back);
    }

    #[test]
    fn rdonly_is_zero_but_still_recognized() {
        let host = open_flag_mapping(GuestOs::Linux, 0);
        assert_eq!(host, HostOpenFlags::O_RDONLY);
    }

    #[test]
    fn mips_anonymous_differs_from_others() {
        assert_eq!(map_anonymous_value(Arch::Mips32El), 0x800);
        assert_eq!(map_anonymous_value(Arch::X8664), 0x20);
        assert_eq!(map_anonymous_value(Arch::Arm), 0x20);
    }
}
