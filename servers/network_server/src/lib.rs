//! Sockaddr translation and the port-remapping policy the socket
//! syscalls share: parsing a guest `struct sockaddr`, packing one back
//! for `accept`, deciding the effective bind address/port for a
//! non-root guest, and the small `ioctl` whitelist sockets answer.

use exo_vfs_server::{GuestSockaddr, AF_INET, AF_INET6, AF_UNIX};

/// Below this port, a non-root guest gets remapped to an unprivileged
/// host port by adding this offset (§4.6 `bind`).
pub const UNPRIVILEGED_PORT_CEILING: u16 = 1024;
pub const PORT_REMAP_OFFSET: u16 = 8000;

/// Resolved target for a `bind`/`connect` call: which host loopback
/// address to use and the (possibly remapped) port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    pub host: String,
    pub port: u16,
}

/// Apply §4.6's port-remap policy: `bind(fd, sockaddr{AF_INET,port=80})`
/// with `root == false` binds to 127.0.0.1:8080 rather than port 80.
pub fn resolve_bind_target(root: bool, sockaddr: &GuestSockaddr) -> Option<BindTarget> {
    let mut port = sockaddr.port;
    if !root && port != 0 && port <= UNPRIVILEGED_PORT_CEILING {
        port += PORT_REMAP_OFFSET;
    }
    match sockaddr.family {
        AF_INET => Some(BindTarget { host: "127.0.0.1".to_string(), port }),
        AF_INET6 => Some(BindTarget { host: "::1".to_string(), port }),
        _ => None,
    }
}

/// `connect`'s AF_UNIX path is prefixed with the sandbox rootfs so a
/// guest connecting to `/tmp/x.sock` lands on the host path the rootfs
/// actually exposes; AF_INET unpacks the same way `bind` does.
pub fn resolve_unix_connect_path(rootfs: &std::path::Path, guest_path: &str) -> std::path::PathBuf {
    rootfs.join(guest_path.trim_start_matches('/'))
}

/// Pack a `struct sockaddr_in` (family, big-endian port, big-endian
/// ipv4) for `accept`'s write-back, matching the layout `GuestSockaddr`
/// parses.
pub fn pack_sockaddr_in(port: u16, ipv4: [u8; 4]) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..2].copy_from_slice(&AF_INET.to_le_bytes());
    buf[2..4].copy_from_slice(&port.to_be_bytes());
    buf[4..8].copy_from_slice(&ipv4);
    buf
}

pub fn loopback_bytes() -> [u8; 4] {
    [127, 0, 0, 1]
}

pub fn loopback_netmask_bytes() -> [u8; 4] {
    [255, 0, 0, 0]
}

/// MIPS folds both `SOCK_STREAM` (1) and `SOCK_DGRAM` (2) down to 1 —
/// unexplained in the source, preserved rather than "fixed" (§9 open
/// question 5).
pub fn mips_normalize_socket_type(sock_type: i32) -> i32 {
    if sock_type == 1 || sock_type == 2 {
        1
    } else {
        sock_type
    }
}

/// ioctl request numbers the socket-facing whitelist answers (§4.6).
pub mod ioctl_cmd {
    pub const TCGETS: u64 = 0x5401;
    pub const TIOCGWINSZ: u64 = 0x5413;
    pub const TIOCSWINSZ: u64 = 0x5414;
    pub const SIOCGIFADDR: u64 = 0x8915;
    pub const SIOCGIFNETMASK: u64 = 0x891b;
}

/// `SIOCGIFADDR`/`SIOCGIFNETMASK` are answered by the socket object itself
/// rather than a fixed table: every interface this layer can see is the
/// loopback, so both calls report loopback values regardless of
/// `ifr_name`. Overwrites the `sockaddr` half of a `struct ifreq` (the
/// 16-byte interface name at the front is left untouched) with
/// `family=AF_INET, port=0, addr` at the conventional offset.
pub fn pack_ifreq_sockaddr(ifreq: &mut [u8], addr: [u8; 4]) {
    if ifreq.len() < 24 {
        return;
    }
    ifreq[16..18].copy_from_slice(&AF_INET.to_le_bytes());
    ifreq[18..20].fill(0);
    ifreq[20..24].copy_from_slice(&addr);
}

/// `TIOCGWINSZ`'s canned reply: rows, cols, xpixel, ypixel, per §4.6.
pub const WINSIZE_REPLY: (u16, u16, u16, u16) = (1000, 360, 1000, 1000);

/// Result of interpreting one of the whitelisted `ioctl` commands.
pub enum IoctlOutcome {
    /// Write these bytes into the guest's `arg` buffer, return 0.
    WriteBytes(Vec<u8>),
    /// Accepted but nothing to write back (e.g. `TIOCSWINSZ`).
    Accepted,
    /// Not one of the handled commands.
    Unhandled,
}

pub fn dispatch_ioctl(cmd: u64) -> IoctlOutcome {
    match cmd {
        ioctl_cmd::TCGETS => IoctlOutcome::WriteBytes(vec![0u8; 60]),
        ioctl_cmd::TIOCGWINSZ => {
            let (rows, cols, x, y) = WINSIZE_REPLY;
            let mut buf = Vec::with_capacity(8);
            buf.extend_from_slice(&rows.to_le_bytes());
            buf.extend_from_slice(&cols.to_le_bytes());
            buf.extend_from_slice(&x.to_le_bytes());
            buf.extend_from_slice(&y.to_le_bytes());
            IoctlOutcome::WriteBytes(buf)
        }
        ioctl_cmd::TIOCSWINSZ => IoctlOutcome::Accepted,
        _ => IoctlOutcome::Unhandled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_root_low_port_is_remapped() {
        let target = resolve_bind_target(false, &GuestSockaddr { family: AF_INET, port: 80, ipv4: 0 }).unwrap();
        assert_eq!(target, BindTarget { host: "127.0.0.1".to_string(), port: 8080 });
    }

    #[test]
    fn root_keeps_privileged_port() {
        let target = resolve_bind_target(true, &GuestSockaddr { family: AF_INET, port: 80, ipv4: 0 }).unwrap();
        assert_eq!(target.port, 80);
    }

    #[test]
    fn high_port_is_untouched() {
        let target = resolve_bind_target(false, &GuestSockaddr { family: AF_INET, port: 9000, ipv4: 0 }).unwrap();
        assert_eq!(target.port, 9000);
    }

    #[test]
    fn ipv6_binds_to_loopback6() {
        let target = resolve_bind_target(true, &GuestSockaddr { family: AF_INET6, port: 53, ipv4: 0 }).unwrap();
        assert_eq!(target.host, "::1");
    }

    #[test]
    fn mips_folds_dgram_into_stream() {
        assert_eq!(mips_normalize_socket_type(2), 1);
        assert_eq!(mips_normalize_socket_type(1), 1);
        assert_eq!(mips_normalize_socket_type(5), 5);
    }

    #[test]
    fn winsize_ioctl_reports_canned_values() {
        match dispatch_ioctl(ioctl_cmd::TIOCGWINSZ) {
            IoctlOutcome::WriteBytes(buf) => assert_eq!(buf.len(), 8),
            _ => panic!("expected WriteBytes"),
        }
    }

    #[test]
    fn ifreq_sockaddr_preserves_the_interface_name() {
        let mut ifreq = vec![0u8; 24];
        ifreq[0..3].copy_from_slice(b"lo\0");
        pack_ifreq_sockaddr(&mut ifreq, loopback_bytes());
        assert_eq!(&ifreq[0..3], b"lo\0");
        assert_eq!(&ifreq[20..24], &[127, 0, 0, 1]);
    }
}
