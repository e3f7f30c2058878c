//! Sockets: domain/type/protocol bookkeeping lives in `GuestSocket`
//! (`exo-vfs-server`); the port-remap and sockaddr-layout policy lives in
//! `exo-network-server`. These handlers are the glue between the two and
//! the fd table.

use super::{ok, recoverable};
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::{Arch, CpuEngine, Errno};
use exo_network_server::{
    dispatch_ioctl, ioctl_cmd, loopback_bytes, loopback_netmask_bytes, mips_normalize_socket_type, pack_ifreq_sockaddr,
    pack_sockaddr_in, resolve_bind_target, resolve_unix_connect_path, IoctlOutcome,
};
use exo_vfs_server::{GuestIo, GuestSockaddr, GuestSocket, AF_UNIX};

fn read_sockaddr(process: &mut GuestProcess, engine: &mut dyn CpuEngine, addr: u64, len: u64) -> Result<Vec<u8>, emu_core::EmuError> {
    engine.mem_read(addr, len.max(16) as usize).map(|mut b| {
        b.resize(16.max(b.len()), 0);
        let _ = process;
        b
    })
}

pub fn socket(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [domain, sock_type, protocol, ..] = *args;
    let sock_type = mips_normalize_socket_type(sock_type as i32);
    match GuestSocket::new(domain as i32, sock_type, protocol as i32) {
        Ok(socket) => match _process.fds.alloc_lowest(GuestIo::Socket(socket)) {
            Some(fd) => ok(fd as i64),
            None => recoverable(Errno::EMFILE),
        },
        Err(e) => recoverable(e),
    }
}

pub fn bind(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, addr, len, ..] = *args;
    let bytes = match read_sockaddr(process, engine, addr, len) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let sockaddr = GuestSockaddr::parse(&bytes);

    if sockaddr.family == AF_UNIX {
        let path = String::from_utf8_lossy(&bytes[2..]).trim_end_matches('\0').to_string();
        let real = process.to_real(&path);
        let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
            return recoverable(Errno::EBADF);
        };
        return match socket.bind_unix(&real.to_string_lossy()) {
            Ok(()) => ok(0),
            Err(e) => recoverable(e),
        };
    }

    let Some(target) = resolve_bind_target(process.root, &sockaddr) else {
        return recoverable(Errno::EINVAL);
    };
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.bind_inet(&target.host, target.port) {
        Ok(()) => ok(0),
        Err(e) => recoverable(e),
    }
}

pub fn listen(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, backlog, ..] = *args;
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.listen(backlog as i32) {
        Ok(()) => ok(0),
        Err(e) => recoverable(e),
    }
}

pub fn accept(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, addr, _len, ..] = *args;
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    let (accepted, port) = match socket.accept() {
        Ok(pair) => pair,
        Err(e) => return recoverable(e),
    };

    if addr != 0 {
        let packed = pack_sockaddr_in(port, exo_network_server::loopback_bytes());
        if let Err(e) = engine.mem_write(addr, &packed) {
            return SyscallOutcome::Fatal(e);
        }
    }

    match process.fds.alloc_lowest(GuestIo::Socket(accepted)) {
        Some(new_fd) => ok(new_fd as i64),
        None => recoverable(Errno::EMFILE),
    }
}

pub fn connect(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, addr, len, ..] = *args;
    let bytes = match read_sockaddr(process, engine, addr, len) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let sockaddr = GuestSockaddr::parse(&bytes);

    if sockaddr.family == AF_UNIX {
        let guest_path = String::from_utf8_lossy(&bytes[2..]).trim_end_matches('\0').to_string();
        let real = resolve_unix_connect_path(process.sandbox.rootfs(), &guest_path);
        let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
            return recoverable(Errno::EBADF);
        };
        return match socket.connect_unix(&real.to_string_lossy()) {
            Ok(()) => ok(0),
            Err(e) => recoverable(e),
        };
    }

    let ipv4 = sockaddr.ipv4.to_be_bytes();
    let host = format!("{}.{}.{}.{}", ipv4[0], ipv4[1], ipv4[2], ipv4[3]);
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.connect_inet(&host, sockaddr.port) {
        Ok(()) => ok(0),
        Err(e) => recoverable(e),
    }
}

pub fn send(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, len, ..] = *args;
    let data = match engine.mem_read(buf_addr, len as usize) {
        Ok(d) => d,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.send(&data) {
        Ok(n) => ok(n as i64),
        Err(e) => recoverable(e),
    }
}

pub fn recv(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, len, ..] = *args;
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.recv(len as usize) {
        Ok(data) => match engine.mem_write(buf_addr, &data) {
            Ok(()) => ok(data.len() as i64),
            Err(e) => SyscallOutcome::Fatal(e),
        },
        Err(e) => recoverable(e),
    }
}

pub fn setsockopt(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

pub fn shutdown(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, how, ..] = *args;
    let Some(socket) = process.fds.get_mut(fd as i32).and_then(GuestIo::as_socket_mut) else {
        return recoverable(Errno::EBADF);
    };
    match socket.shutdown(how as i32) {
        Ok(()) => ok(0),
        Err(e) => recoverable(e),
    }
}

pub fn socketpair(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [domain, sock_type, protocol, sv_addr, ..] = *args;
    match exo_ipc_router::socketpair(domain as i32, sock_type as i32, protocol as i32) {
        Ok((a, b)) => {
            let Some(fd_a) = process.fds.alloc_lowest(GuestIo::Socket(a)) else {
                return recoverable(Errno::EMFILE);
            };
            let Some(fd_b) = process.fds.alloc_lowest(GuestIo::Socket(b)) else {
                return recoverable(Errno::EMFILE);
            };
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(&(fd_a as u32).to_le_bytes());
            bytes.extend_from_slice(&(fd_b as u32).to_le_bytes());
            match engine.mem_write(sv_addr, &bytes) {
                Ok(()) => ok(0),
                Err(e) => SyscallOutcome::Fatal(e),
            }
        }
        Err(e) => recoverable(e),
    }
}

/// Only the whitelisted commands `exo-network-server` knows about are
/// answered; anything else returns 0 rather than failing the call.
/// `SIOCGIFADDR`/`SIOCGIFNETMASK` are delegated to the socket object
/// itself (here: every interface reports loopback values) rather than
/// the fixed `dispatch_ioctl` table, since they need to preserve the
/// `ifr_name` the guest already wrote into the buffer.
pub fn ioctl(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, cmd, arg, ..] = *args;

    if cmd == ioctl_cmd::SIOCGIFADDR || cmd == ioctl_cmd::SIOCGIFNETMASK {
        if !matches!(process.fds.get(fd as i32), Some(GuestIo::Socket(_))) {
            return recoverable(Errno::EBADF);
        }
        let mut ifreq = match engine.mem_read(arg, 24) {
            Ok(b) => b,
            Err(e) => return SyscallOutcome::Fatal(e),
        };
        let value = if cmd == ioctl_cmd::SIOCGIFADDR { loopback_bytes() } else { loopback_netmask_bytes() };
        pack_ifreq_sockaddr(&mut ifreq, value);
        return match engine.mem_write(arg, &ifreq) {
            Ok(()) => ok(0),
            Err(e) => SyscallOutcome::Fatal(e),
        };
    }

    match dispatch_ioctl(cmd) {
        IoctlOutcome::WriteBytes(bytes) => match engine.mem_write(arg, &bytes) {
            Ok(()) => ok(0),
            Err(e) => SyscallOutcome::Fatal(e),
        },
        IoctlOutcome::Accepted => ok(0),
        IoctlOutcome::Unhandled => {
            let _ = process;
            ok(0)
        }
    }
}

/// x86's single `socketcall(call, args)` multiplexer: `args` points to a
/// pointer-sized argument vector for whichever call number was requested,
/// which is then re-dispatched to the direct handler above.
pub fn socketcall(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    const SYS_SOCKET: u64 = 1;
    const SYS_BIND: u64 = 2;
    const SYS_CONNECT: u64 = 3;
    const SYS_LISTEN: u64 = 4;
    const SYS_ACCEPT: u64 = 5;
    const SYS_SEND: u64 = 9;
    const SYS_RECV: u64 = 10;
    const SYS_SHUTDOWN: u64 = 13;
    const SYS_SOCKETPAIR: u64 = 8;

    let [call, args_addr, ..] = *args;
    let ptr_size = if matches!(process.arch, Arch::X8664) { 8 } else { 4 };
    let mut unpacked = [0u64; 6];
    for (i, slot) in unpacked.iter_mut().enumerate() {
        let cursor = args_addr + (i as u64) * ptr_size as u64;
        let raw = match engine.mem_read(cursor, ptr_size) {
            Ok(b) => b,
            Err(_) => break,
        };
        *slot = match ptr_size {
            4 => u32::from_le_bytes(raw.try_into().unwrap()) as u64,
            _ => u64::from_le_bytes(raw.try_into().unwrap()),
        };
    }

    match call {
        SYS_SOCKET => socket(process, engine, &unpacked),
        SYS_BIND => bind(process, engine, &unpacked),
        SYS_CONNECT => connect(process, engine, &unpacked),
        SYS_LISTEN => listen(process, engine, &unpacked),
        SYS_ACCEPT => accept(process, engine, &unpacked),
        SYS_SEND => send(process, engine, &unpacked),
        SYS_RECV => recv(process, engine, &unpacked),
        SYS_SHUTDOWN => shutdown(process, engine, &unpacked),
        SYS_SOCKETPAIR => socketpair(process, engine, &unpacked),
        _ => recoverable(Errno::EINVAL),
    }
}

/// Parse the three `fd_set` bitmaps, map each set bit through the fd
/// table to a raw host fd, call host `select`, and write the result
/// bitmap back into whichever of the three pointers were non-null.
pub fn newselect(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    use nix::sys::select::{select, FdSet};
    use std::os::fd::{BorrowedFd, RawFd};

    let [nfds, readfds, writefds, exceptfds, _timeout, ..] = *args;
    let nfds = nfds as i32;

    let read_set_bytes = match read_fdset_bytes(engine, readfds, nfds) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let write_set_bytes = match read_fdset_bytes(engine, writefds, nfds) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let except_set_bytes = match read_fdset_bytes(engine, exceptfds, nfds) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };

    let host_fd_for = |fd: i32| -> Option<RawFd> { process.fds.get(fd).and_then(GuestIo::raw_fd) };

    let mut read_set = FdSet::new();
    let mut write_set = FdSet::new();
    let mut except_set = FdSet::new();
    let mut host_fds = Vec::new();

    for fd in 0..nfds {
        if bit_set(&read_set_bytes, fd) {
            if let Some(h) = host_fd_for(fd) {
                read_set.insert(unsafe { BorrowedFd::borrow_raw(h) });
                host_fds.push(h);
            }
        }
        if bit_set(&write_set_bytes, fd) {
            if let Some(h) = host_fd_for(fd) {
                write_set.insert(unsafe { BorrowedFd::borrow_raw(h) });
                host_fds.push(h);
            }
        }
        if bit_set(&except_set_bytes, fd) {
            if let Some(h) = host_fd_for(fd) {
                except_set.insert(unsafe { BorrowedFd::borrow_raw(h) });
                host_fds.push(h);
            }
        }
    }

    let ready = match select(None, Some(&mut read_set), Some(&mut write_set), Some(&mut except_set), None) {
        Ok(n) => n,
        Err(e) => return recoverable(Errno::from_raw(e as i32).unwrap_or(Errno::EIO)),
    };

    let mut out_read = vec![0u8; read_set_bytes.len()];
    let mut out_write = vec![0u8; write_set_bytes.len()];
    let mut out_except = vec![0u8; except_set_bytes.len()];
    for fd in 0..nfds {
        if let Some(h) = host_fd_for(fd) {
            if read_set.contains(unsafe { BorrowedFd::borrow_raw(h) }) {
                set_bit(&mut out_read, fd);
            }
            if write_set.contains(unsafe { BorrowedFd::borrow_raw(h) }) {
                set_bit(&mut out_write, fd);
            }
            if except_set.contains(unsafe { BorrowedFd::borrow_raw(h) }) {
                set_bit(&mut out_except, fd);
            }
        }
    }

    if readfds != 0 {
        if let Err(e) = engine.mem_write(readfds, &out_read) {
            return SyscallOutcome::Fatal(e);
        }
    }
    if writefds != 0 {
        if let Err(e) = engine.mem_write(writefds, &out_write) {
            return SyscallOutcome::Fatal(e);
        }
    }
    if exceptfds != 0 {
        if let Err(e) = engine.mem_write(exceptfds, &out_except) {
            return SyscallOutcome::Fatal(e);
        }
    }

    ok(ready as i64)
}

fn fdset_len(nfds: i32) -> usize {
    ((nfds.max(0) as usize) + 7) / 8
}

fn read_fdset_bytes(engine: &mut dyn CpuEngine, addr: u64, nfds: i32) -> emu_core::EmuResult<Vec<u8>> {
    if addr == 0 {
        return Ok(vec![0u8; fdset_len(nfds)]);
    }
    engine.mem_read(addr, fdset_len(nfds))
}

fn bit_set(bytes: &[u8], fd: i32) -> bool {
    let byte = fd as usize / 8;
    let bit = fd as usize % 8;
    bytes.get(byte).map(|b| b & (1 << bit) != 0).unwrap_or(false)
}

fn set_bit(bytes: &mut [u8], fd: i32) {
    let byte = fd as usize / 8;
    let bit = fd as usize % 8;
    if let Some(b) = bytes.get_mut(byte) {
        *b |= 1 << bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{EmuOptions, Output};
    use emu_core::{GuestOs, HostOs, NullEngine};
    use exo_vfs_server::StdioMode;

    fn process(rootfs: std::path::PathBuf) -> GuestProcess {
        let options = EmuOptions {
            rootfs,
            mounts: Vec::new(),
            arch: Arch::X8664,
            host_os: HostOs::Linux,
            guest_os: GuestOs::Linux,
            libcache: false,
            output: Output::Off,
            log_file: None,
            root: false,
            stdio: StdioMode::Buffered,
        };
        GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &options).unwrap()
    }

    const AF_UNIX_RAW: u32 = 1;
    const SOCK_STREAM: u64 = 1;

    fn unix_sockaddr(path: &str) -> Vec<u8> {
        let mut bytes = vec![1u8, 0u8];
        bytes.extend_from_slice(path.as_bytes());
        bytes.push(0);
        bytes
    }

    #[test]
    fn socket_allocates_the_lowest_free_fd() {
        let tmp = tempfile::tempdir().unwrap();
        let mut process = process(tmp.path().to_path_buf());
        let mut engine = NullEngine::new();
        let fd = super::socket(&mut process, &mut engine, &[AF_UNIX_RAW as u64, SOCK_STREAM, 0, 0, 0, 0]);
        assert!(matches!(fd, SyscallOutcome::Value(3)));
    }

    #[test]
    fn unix_bind_listen_connect_accept_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut process = process(tmp.path().to_path_buf());
        let mut engine = NullEngine::new();

        let server_fd = match socket(&mut process, &mut engine, &[AF_UNIX_RAW as u64, SOCK_STREAM, 0, 0, 0, 0]) {
            SyscallOutcome::Value(fd) => fd,
            _ => panic!("socket() failed"),
        };

        let addr_bytes = unix_sockaddr("/sock");
        let addr_ptr = 0x2000;
        engine.mem_map(addr_ptr, 0x1000).unwrap();
        engine.mem_write(addr_ptr, &addr_bytes).unwrap();
        let bind_ret = bind(&mut process, &mut engine, &[server_fd as u64, addr_ptr, addr_bytes.len() as u64, 0, 0, 0]);
        assert!(matches!(bind_ret, SyscallOutcome::Value(0)));

        let listen_ret = listen(&mut process, &mut engine, &[server_fd as u64, 1, 0, 0, 0, 0]);
        assert!(matches!(listen_ret, SyscallOutcome::Value(0)));

        let client_fd = match socket(&mut process, &mut engine, &[AF_UNIX_RAW as u64, SOCK_STREAM, 0, 0, 0, 0]) {
            SyscallOutcome::Value(fd) => fd,
            _ => panic!("socket() failed"),
        };
        let connect_ret = connect(&mut process, &mut engine, &[client_fd as u64, addr_ptr, addr_bytes.len() as u64, 0, 0, 0]);
        assert!(matches!(connect_ret, SyscallOutcome::Value(0)));

        let accepted_fd = match accept(&mut process, &mut engine, &[server_fd as u64, 0, 0, 0, 0, 0]) {
            SyscallOutcome::Value(fd) => fd,
            _ => panic!("accept() failed"),
        };

        let payload_addr = 0x3000;
        engine.mem_map(payload_addr, 0x1000).unwrap();
        engine.mem_write(payload_addr, b"ping").unwrap();
        let sent = match send(&mut process, &mut engine, &[client_fd as u64, payload_addr, 4, 0, 0, 0]) {
            SyscallOutcome::Value(n) => n,
            _ => panic!("send() failed"),
        };
        assert_eq!(sent, 4);

        let recv_addr = 0x4000;
        engine.mem_map(recv_addr, 0x1000).unwrap();
        let received = match recv(&mut process, &mut engine, &[accepted_fd as u64, recv_addr, 4, 0, 0, 0]) {
            SyscallOutcome::Value(n) => n,
            _ => panic!("recv() failed"),
        };
        assert_eq!(received, 4);
        assert_eq!(engine.mem_read(recv_addr, 4).unwrap(), b"ping");
    }

    #[test]
    fn socketpair_hands_back_two_connected_fds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut process = process(tmp.path().to_path_buf());
        let mut engine = NullEngine::new();
        let sv_addr = 0x5000;
        engine.mem_map(sv_addr, 0x1000).unwrap();

        let ret = socketpair(&mut process, &mut engine, &[AF_UNIX_RAW as u64, SOCK_STREAM, 0, sv_addr, 0, 0]);
        assert!(matches!(ret, SyscallOutcome::Value(0)));

        let fd_a = u32::from_le_bytes(engine.mem_read(sv_addr, 4).unwrap().try_into().unwrap()) as i32;
        let fd_b = u32::from_le_bytes(engine.mem_read(sv_addr + 4, 4).unwrap().try_into().unwrap()) as i32;
        assert_eq!(fd_a, 3);
        assert_eq!(fd_b, 4);
        assert!(process.fds.is_open(fd_a));
        assert!(process.fds.is_open(fd_b));
    }
}
