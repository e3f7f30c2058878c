//! The tagged `File`/`Socket`/`Pipe` variant every open descriptor in the
//! [`crate::fd_table::FdTable`] holds, plus the handful of operations
//! common to all three (`read`/`write`/`lseek`/`close`/`dup`/`fstat`).
//! Per-variant capability sets stay narrow: only `Socket` exposes
//! `bind`/`listen`/`accept`/etc, only `Pipe` exposes its reader/writer
//! end distinction.

use emu_core::{Errno, StatInfo};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::sync::{Arc, Mutex};

use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrIn, SockaddrIn6, SockaddrLike, SockaddrUn};
use nix::sys::socket::{Backlog, Shutdown as NixShutdown};

/// Backing store for the `File` variant: a real host file, one of the
/// three standard streams, or an in-memory buffer (what stdio is wired
/// to in test mode, or whatever the embedding CLI chose per §6).
pub enum FileBackend {
    Host(File),
    Stdin,
    Stdout,
    Stderr,
    Buffer(Arc<Mutex<(Vec<u8>, usize)>>),
}

pub struct GuestFile {
    backend: FileBackend,
    pub path: String,
    pub flags: u32,
}

impl GuestFile {
    pub fn from_host(file: File, path: String, flags: u32) -> Self {
        Self { backend: FileBackend::Host(file), path, flags }
    }

    pub fn stdin() -> Self {
        Self { backend: FileBackend::Stdin, path: "/dev/stdin".into(), flags: 0 }
    }

    pub fn stdout() -> Self {
        Self { backend: FileBackend::Stdout, path: "/dev/stdout".into(), flags: 1 }
    }

    pub fn stderr() -> Self {
        Self { backend: FileBackend::Stderr, path: "/dev/stderr".into(), flags: 1 }
    }

    pub fn buffer(path: &str) -> Self {
        Self {
            backend: FileBackend::Buffer(Arc::new(Mutex::new((Vec::new(), 0)))),
            path: path.to_string(),
            flags: 0,
        }
    }

    /// Snapshot of a buffer-backed file's contents, for tests and for a
    /// host embedder reading back what the guest wrote to stdout/stderr.
    pub fn buffer_contents(&self) -> Option<Vec<u8>> {
        match &self.backend {
            FileBackend::Buffer(buf) => Some(buf.lock().unwrap().0.clone()),
            _ => None,
        }
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Errno> {
        match &mut self.backend {
            FileBackend::Host(f) => {
                let mut buf = vec![0u8; n];
                let got = f.read(&mut buf).map_err(|e| Errno::from_io_error(&e))?;
                buf.truncate(got);
                Ok(buf)
            }
            FileBackend::Stdin => {
                let mut buf = vec![0u8; n];
                let got = std::io::stdin().read(&mut buf).map_err(|e| Errno::from_io_error(&e))?;
                buf.truncate(got);
                Ok(buf)
            }
            FileBackend::Stdout | FileBackend::Stderr => Err(Errno::EBADF),
            FileBackend::Buffer(buf) => {
                let mut guard = buf.lock().unwrap();
                let (data, cursor) = &mut *guard;
                let end = (*cursor + n).min(data.len());
                let out = data[*cursor..end].to_vec();
                *cursor = end;
                Ok(out)
            }
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        match &mut self.backend {
            FileBackend::Host(f) => f.write(data).map_err(|e| Errno::from_io_error(&e)),
            FileBackend::Stdin => Err(Errno::EBADF),
            FileBackend::Stdout => {
                let mut out = std::io::stdout();
                out.write_all(data).map_err(|e| Errno::from_io_error(&e))?;
                let _ = out.flush();
                Ok(data.len())
            }
            FileBackend::Stderr => {
                let mut out = std::io::stderr();
                out.write_all(data).map_err(|e| Errno::from_io_error(&e))?;
                let _ = out.flush();
                Ok(data.len())
            }
            FileBackend::Buffer(buf) => {
                let mut guard = buf.lock().unwrap();
                guard.0.extend_from_slice(data);
                Ok(data.len())
            }
        }
    }

    pub fn lseek(&mut self, offset: i64, whence: i32) -> Result<u64, Errno> {
        const SEEK_SET: i32 = 0;
        const SEEK_CUR: i32 = 1;
        const SEEK_END: i32 = 2;
        let pos = match whence {
            SEEK_SET => SeekFrom::Start(offset as u64),
            SEEK_CUR => SeekFrom::Current(offset),
            SEEK_END => SeekFrom::End(offset),
            _ => return Err(Errno::EINVAL),
        };
        match &mut self.backend {
            FileBackend::Host(f) => f.seek(pos).map_err(|e| Errno::from_io_error(&e)),
            FileBackend::Buffer(buf) => {
                let mut guard = buf.lock().unwrap();
                let len = guard.0.len() as i64;
                let new_cursor = match whence {
                    SEEK_SET => offset,
                    SEEK_CUR => guard.1 as i64 + offset,
                    SEEK_END => len + offset,
                    _ => return Err(Errno::EINVAL),
                };
                if new_cursor < 0 {
                    return Err(Errno::EINVAL);
                }
                guard.1 = new_cursor as usize;
                Ok(guard.1 as u64)
            }
            _ => Err(Errno::ESPIPE),
        }
    }

    pub fn dup(&self) -> Result<GuestFile, Errno> {
        let backend = match &self.backend {
            FileBackend::Host(f) => FileBackend::Host(f.try_clone().map_err(|e| Errno::from_io_error(&e))?),
            FileBackend::Stdin => FileBackend::Stdin,
            FileBackend::Stdout => FileBackend::Stdout,
            FileBackend::Stderr => FileBackend::Stderr,
            FileBackend::Buffer(buf) => FileBackend::Buffer(Arc::clone(buf)),
        };
        Ok(GuestFile { backend, path: self.path.clone(), flags: self.flags })
    }

    pub fn fstat(&self) -> Result<StatInfo, Errno> {
        match &self.backend {
            FileBackend::Host(f) => {
                let meta = f.metadata().map_err(|e| Errno::from_io_error(&e))?;
                Ok(StatInfo {
                    mode: meta.mode(),
                    nlink: meta.nlink() as u32,
                    uid: meta.uid(),
                    gid: meta.gid(),
                    size: meta.size(),
                    atime: meta.atime() as u64,
                    mtime: meta.mtime() as u64,
                    ctime: meta.ctime() as u64,
                    ino: meta.ino(),
                })
            }
            _ => Ok(StatInfo { mode: 0o20666, nlink: 1, ..Default::default() }),
        }
    }

    pub fn truncate(&mut self, len: u64) -> Result<(), Errno> {
        match &mut self.backend {
            FileBackend::Host(f) => f.set_len(len).map_err(|e| Errno::from_io_error(&e)),
            FileBackend::Buffer(buf) => {
                buf.lock().unwrap().0.resize(len as usize, 0);
                Ok(())
            }
            _ => Err(Errno::EINVAL),
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match &self.backend {
            FileBackend::Host(f) => Some(f.as_raw_fd()),
            FileBackend::Stdin => Some(0),
            FileBackend::Stdout => Some(1),
            FileBackend::Stderr => Some(2),
            FileBackend::Buffer(_) => None,
        }
    }
}

/// Parsed view of a guest `struct sockaddr`: family at offset 0, then a
/// big-endian port and host address at offset 2..8, per §4.6's bind
/// contract.
pub struct GuestSockaddr {
    pub family: u16,
    pub port: u16,
    pub ipv4: u32,
}

impl GuestSockaddr {
    pub fn parse(bytes: &[u8]) -> Self {
        let family = u16::from_le_bytes([bytes[0], bytes.get(1).copied().unwrap_or(0)]);
        let port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let ipv4 = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self { family, port, ipv4 }
    }
}

pub const AF_UNIX: u16 = 1;
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

/// A guest socket backed by a raw host socket fd, created unbound
/// (matching `socket()`/`bind()`/`listen()` being three separate
/// syscalls rather than one combined `std::net` call).
pub struct GuestSocket {
    fd: OwnedFd,
    pub family: i32,
    pub sock_type: i32,
    pub protocol: i32,
    pub bound_port: Option<u16>,
}

fn address_family(domain: i32) -> AddressFamily {
    match domain as u16 {
        AF_UNIX => AddressFamily::Unix,
        AF_INET6 => AddressFamily::Inet6,
        _ => AddressFamily::Inet,
    }
}

fn sock_kind(sock_type: i32) -> SockType {
    match sock_type & 0xf {
        2 => SockType::Datagram,
        _ => SockType::Stream,
    }
}

impl GuestSocket {
    pub fn new(domain: i32, sock_type: i32, protocol: i32) -> Result<Self, Errno> {
        let fd = socket::socket(address_family(domain), sock_kind(sock_type), SockFlag::empty(), None)
            .map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))?;
        Ok(Self { fd, family: domain, sock_type, protocol, bound_port: None })
    }

    /// Wrap an already-open, already-connected fd (e.g. one half of a
    /// `socketpair()`) as a `GuestSocket` instead of creating a fresh one.
    pub fn from_fd(fd: OwnedFd, domain: i32, sock_type: i32, protocol: i32) -> Self {
        Self { fd, family: domain, sock_type, protocol, bound_port: None }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn bind_inet(&mut self, host: &str, port: u16) -> Result<(), Errno> {
        let map_err = |e: nix::Error| Errno::from_raw(e as i32).unwrap_or(Errno::EIO);
        if self.family as u16 == AF_INET6 {
            let addr: std::net::Ipv6Addr = host.parse().map_err(|_| Errno::EINVAL)?;
            let sockaddr = SockaddrIn6::from(std::net::SocketAddrV6::new(addr, port, 0, 0));
            socket::bind(self.fd.as_raw_fd(), &sockaddr).map_err(map_err)?;
        } else {
            let addr: std::net::Ipv4Addr = host.parse().map_err(|_| Errno::EINVAL)?;
            let sockaddr = SockaddrIn::from(std::net::SocketAddrV4::new(addr, port));
            socket::bind(self.fd.as_raw_fd(), &sockaddr).map_err(map_err)?;
        }
        self.bound_port = Some(port);
        Ok(())
    }

    pub fn bind_unix(&mut self, path: &str) -> Result<(), Errno> {
        let sockaddr = SockaddrUn::new(path).map_err(|_| Errno::EINVAL)?;
        socket::bind(self.fd.as_raw_fd(), &sockaddr).map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))
    }

    pub fn listen(&mut self, backlog: i32) -> Result<(), Errno> {
        let backlog = Backlog::new(backlog).map_err(|_| Errno::EINVAL)?;
        socket::listen(&self.fd, backlog).map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))
    }

    /// Accept a pending connection; returns the new connected socket and
    /// its peer's port (0 for AF_UNIX).
    pub fn accept(&mut self) -> Result<(GuestSocket, u16), Errno> {
        let new_fd = socket::accept(self.fd.as_raw_fd()).map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))?;
        let owned = unsafe { OwnedFd::from_raw_fd(new_fd) };
        Ok((
            GuestSocket { fd: owned, family: self.family, sock_type: self.sock_type, protocol: self.protocol, bound_port: None },
            0,
        ))
    }

    pub fn connect_inet(&mut self, host: &str, port: u16) -> Result<(), Errno> {
        let map_err = |e: nix::Error| Errno::from_raw(e as i32).unwrap_or(Errno::EIO);
        if self.family as u16 == AF_INET6 {
            let addr: std::net::Ipv6Addr = host.parse().map_err(|_| Errno::EINVAL)?;
            let sockaddr = SockaddrIn6::from(std::net::SocketAddrV6::new(addr, port, 0, 0));
            socket::connect(self.fd.as_raw_fd(), &sockaddr).map_err(map_err)
        } else {
            let addr: std::net::Ipv4Addr = host.parse().map_err(|_| Errno::EINVAL)?;
            let sockaddr = SockaddrIn::from(std::net::SocketAddrV4::new(addr, port));
            socket::connect(self.fd.as_raw_fd(), &sockaddr).map_err(map_err)
        }
    }

    pub fn connect_unix(&mut self, path: &str) -> Result<(), Errno> {
        let sockaddr = SockaddrUn::new(path).map_err(|_| Errno::EINVAL)?;
        socket::connect(self.fd.as_raw_fd(), &sockaddr).map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize, Errno> {
        socket::send(self.fd.as_raw_fd(), data, MsgFlags::empty())
            .map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))
    }

    pub fn recv(&mut self, n: usize) -> Result<Vec<u8>, Errno> {
        let mut buf = vec![0u8; n];
        let got = socket::recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::empty())
            .map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))?;
        buf.truncate(got);
        Ok(buf)
    }

    pub fn shutdown(&mut self, how: i32) -> Result<(), Errno> {
        let how = match how {
            0 => NixShutdown::Read,
            1 => NixShutdown::Write,
            _ => NixShutdown::Both,
        };
        socket::shutdown(self.fd.as_raw_fd(), how).map_err(|e| Errno::from_raw(e as i32).unwrap_or(Errno::EIO))
    }

    pub fn dup(&self) -> Result<GuestSocket, Errno> {
        let owned = self.fd.try_clone().map_err(|e| Errno::from_io_error(&e))?;
        Ok(GuestSocket { fd: owned, family: self.family, sock_type: self.sock_type, protocol: self.protocol, bound_port: self.bound_port })
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Errno> {
        self.recv(n)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        self.send(data)
    }

    pub fn fstat(&self) -> StatInfo {
        StatInfo { mode: 0o140666, nlink: 1, ..Default::default() }
    }
}

/// One end of a shared in-memory byte buffer standing in for a kernel
/// pipe; `read`/`write` are FIFO regardless of which end issues them.
pub struct GuestPipe {
    buffer: Arc<Mutex<Vec<u8>>>,
    pub is_write_end: bool,
}

impl GuestPipe {
    /// Allocate a connected read/write pair sharing one buffer.
    pub fn pair() -> (GuestPipe, GuestPipe) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            GuestPipe { buffer: Arc::clone(&buffer), is_write_end: false },
            GuestPipe { buffer, is_write_end: true },
        )
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Errno> {
        if self.is_write_end {
            return Err(Errno::EBADF);
        }
        let mut guard = self.buffer.lock().unwrap();
        let take = n.min(guard.len());
        let out: Vec<u8> = guard.drain(0..take).collect();
        Ok(out)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        if !self.is_write_end {
            return Err(Errno::EBADF);
        }
        self.buffer.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    pub fn dup(&self) -> GuestPipe {
        GuestPipe { buffer: Arc::clone(&self.buffer), is_write_end: self.is_write_end }
    }

    pub fn fstat(&self) -> StatInfo {
        StatInfo { mode: 0o10666, nlink: 1, ..Default::default() }
    }
}

/// The tagged variant an `FdTable` slot holds.
pub enum GuestIo {
    File(GuestFile),
    Socket(GuestSocket),
    Pipe(GuestPipe),
}

impl GuestIo {
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Errno> {
        match self {
            GuestIo::File(f) => f.read(n),
            GuestIo::Socket(s) => s.read(n),
            GuestIo::Pipe(p) => p.read(n),
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        match self {
            GuestIo::File(f) => f.write(data),
            GuestIo::Socket(s) => s.write(data),
            GuestIo::Pipe(p) => p.write(data),
        }
    }

    pub fn lseek(&mut self, offset: i64, whence: i32) -> Result<u64, Errno> {
        match self {
            GuestIo::File(f) => f.lseek(offset, whence),
            _ => Err(Errno::ESPIPE),
        }
    }

    pub fn dup(&self) -> Result<GuestIo, Errno> {
        Ok(match self {
            GuestIo::File(f) => GuestIo::File(f.dup()?),
            GuestIo::Socket(s) => GuestIo::Socket(s.dup()?),
            GuestIo::Pipe(p) => GuestIo::Pipe(p.dup()),
        })
    }

    pub fn fstat(&self) -> Result<StatInfo, Errno> {
        match self {
            GuestIo::File(f) => f.fstat(),
            GuestIo::Socket(s) => Ok(s.fstat()),
            GuestIo::Pipe(p) => Ok(p.fstat()),
        }
    }

    pub fn as_socket_mut(&mut self) -> Option<&mut GuestSocket> {
        match self {
            GuestIo::Socket(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut GuestFile> {
        match self {
            GuestIo::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            GuestIo::File(f) => f.raw_fd(),
            GuestIo::Socket(s) => Some(s.raw_fd()),
            GuestIo::Pipe(_) => None,
        }
    }
}
