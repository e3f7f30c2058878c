//! File and path syscalls: `open`/`openat`, `read`/`write`/`writev`,
//! `lseek`, `close`, `dup` family, `fcntl`, `access`/`faccessat`,
//! `readlink`/`readlinkat`, the `stat` family, `getcwd`/`chdir`,
//! `pipe`, `sendfile64`, `getdents`/`getdents64`, `truncate` family,
//! `umask`, `getrandom`.

use super::{ok, recoverable};
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::{open_flag_mapping, CpuEngine, Errno, HostOpenFlags, StatInfo};
use exo_vfs_server::{GuestFile, GuestIo, GuestPipe};
use std::fs::OpenOptions;

fn write_guest_bytes(engine: &mut dyn CpuEngine, addr: u64, data: &[u8]) -> emu_core::EmuResult<()> {
    engine.mem_write(addr, data)
}

pub fn open(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, args[0]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    open_at_host(process, &path, args[1] as u32)
}

pub fn openat(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    // dirfd (args[0]) is ignored: every path this layer resolves is
    // either absolute or relative to the process's own cwd, and guests
    // calling openat with AT_FDCWD are the overwhelming common case.
    let path = match process.read_guest_cstr(engine, args[1]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    open_at_host(process, &path, args[2] as u32)
}

fn open_at_host(process: &mut GuestProcess, guest_path: &str, raw_flags: u32) -> SyscallOutcome {
    let host_flags = open_flag_mapping(process.guest_os, raw_flags);
    let real = process.to_real(guest_path);

    let mut opts = OpenOptions::new();
    if host_flags.contains(HostOpenFlags::O_RDWR) {
        opts.read(true).write(true);
    } else if host_flags.contains(HostOpenFlags::O_WRONLY) {
        opts.write(true);
    } else {
        opts.read(true);
    }
    if host_flags.contains(HostOpenFlags::O_CREAT) {
        opts.create(true);
    }
    if host_flags.contains(HostOpenFlags::O_TRUNC) {
        opts.truncate(true);
    }
    if host_flags.contains(HostOpenFlags::O_APPEND) {
        opts.append(true);
    }
    if host_flags.contains(HostOpenFlags::O_EXCL) {
        opts.create_new(true);
    }

    match opts.open(&real) {
        Ok(f) => {
            let io = GuestIo::File(GuestFile::from_host(f, guest_path.to_string(), raw_flags));
            match process.fds.alloc_lowest(io) {
                Some(fd) => ok(fd as i64),
                None => recoverable(Errno::EMFILE),
            }
        }
        Err(e) => recoverable(Errno::from_io_error(&e)),
    }
}

pub fn read(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, count, ..] = *args;
    let Some(io) = process.fds.get_mut(fd as i32) else { return recoverable(Errno::EBADF) };
    match io.read(count as usize) {
        Ok(data) => match write_guest_bytes(engine, buf_addr, &data) {
            Ok(()) => ok(data.len() as i64),
            Err(e) => SyscallOutcome::Fatal(e),
        },
        Err(e) => recoverable(e),
    }
}

pub fn write(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, count, ..] = *args;
    let data = match engine.mem_read(buf_addr, count as usize) {
        Ok(d) => d,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let Some(io) = process.fds.get_mut(fd as i32) else { return recoverable(Errno::EBADF) };
    match io.write(&data) {
        Ok(n) => ok(n as i64),
        Err(e) => recoverable(e),
    }
}

/// Always returns 0 regardless of how many `iovec`s were written — an
/// unexplained quirk of the source this was distilled from, preserved
/// rather than "fixed".
pub fn writev(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, iov_addr, iovcnt, ..] = *args;
    let Some(io) = process.fds.get_mut(fd as i32) else { return recoverable(Errno::EBADF) };
    let ptr_size = if matches!(process.arch, emu_core::Arch::X8664 | emu_core::Arch::Arm64) { 8 } else { 4 };
    for i in 0..iovcnt {
        let entry_addr = iov_addr + i * (ptr_size as u64 * 2);
        let base = match read_word(engine, entry_addr, ptr_size) {
            Ok(v) => v,
            Err(e) => return SyscallOutcome::Fatal(e),
        };
        let len = match read_word(engine, entry_addr + ptr_size as u64, ptr_size) {
            Ok(v) => v,
            Err(e) => return SyscallOutcome::Fatal(e),
        };
        let data = match engine.mem_read(base, len as usize) {
            Ok(d) => d,
            Err(e) => return SyscallOutcome::Fatal(e),
        };
        let _ = io.write(&data);
    }
    ok(0)
}

fn read_word(engine: &mut dyn CpuEngine, addr: u64, size: usize) -> emu_core::EmuResult<u64> {
    let raw = engine.mem_read(addr, size)?;
    Ok(if size == 4 {
        u32::from_le_bytes(raw.try_into().unwrap()) as u64
    } else {
        u64::from_le_bytes(raw.try_into().unwrap())
    })
}

pub fn lseek(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, offset, whence, ..] = *args;
    let Some(io) = process.fds.get_mut(fd as i32) else { return recoverable(Errno::EBADF) };
    match io.lseek(offset as i64, whence as i32) {
        Ok(pos) => ok(pos as i64),
        Err(e) => recoverable(e),
    }
}

pub fn close(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    if process.fds.close(args[0] as i32) {
        ok(0)
    } else {
        recoverable(Errno::EBADF)
    }
}

pub fn dup(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    match process.fds.dup(args[0] as i32) {
        Ok(fd) => ok(fd as i64),
        Err(e) => recoverable(e),
    }
}

pub fn dup2(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    match process.fds.dup_to(args[0] as i32, args[1] as i32) {
        Ok(fd) => ok(fd as i64),
        Err(e) => recoverable(e),
    }
}

pub fn dup3(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    dup2(process, engine, args)
}

const F_DUPFD: u64 = 0;
const F_GETFD: u64 = 1;
const F_SETFD: u64 = 2;
const F_GETFL: u64 = 3;
const F_SETFL: u64 = 4;

pub fn fcntl(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, cmd, arg, ..] = *args;
    match cmd {
        F_DUPFD => match process.fds.dup(fd as i32) {
            Ok(new_fd) => ok(new_fd as i64),
            Err(e) => recoverable(e),
        },
        F_GETFD | F_GETFL => {
            if process.fds.is_open(fd as i32) {
                ok(0)
            } else {
                recoverable(Errno::EBADF)
            }
        }
        F_SETFD | F_SETFL => {
            let _ = arg;
            ok(0)
        }
        _ => ok(0),
    }
}

pub fn access(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, args[0]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    if process.to_real(&path).exists() {
        ok(0)
    } else {
        recoverable(Errno::ENOENT)
    }
}

/// Always fails, regardless of whether the path exists — a quirk of the
/// original implementation this was distilled from, preserved rather
/// than "fixed".
pub fn faccessat(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    recoverable(Errno::EACCES)
}

pub fn readlink(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    readlink_impl(process, engine, args[0], args[1], args[2])
}

pub fn readlinkat(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    // args[0] is dirfd, ignored for the same reason as openat.
    readlink_impl(process, engine, args[1], args[2], args[3])
}

fn readlink_impl(process: &mut GuestProcess, engine: &mut dyn CpuEngine, path_addr: u64, buf_addr: u64, buf_size: u64) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, path_addr) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let link = process.to_link(&path);
    match std::fs::read_link(&link) {
        Ok(target) => {
            let mut bytes = target.to_string_lossy().into_owned().into_bytes();
            bytes.truncate(buf_size as usize);
            let n = bytes.len();
            match write_guest_bytes(engine, buf_addr, &bytes) {
                Ok(()) => ok(n as i64),
                Err(e) => SyscallOutcome::Fatal(e),
            }
        }
        Err(e) => recoverable(Errno::from_io_error(&e)),
    }
}

fn stat_impl(process: &mut GuestProcess, engine: &mut dyn CpuEngine, real: std::path::PathBuf, buf_addr: u64) -> SyscallOutcome {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(&real) {
        Ok(meta) => {
            let info = StatInfo {
                mode: meta.mode(),
                nlink: meta.nlink() as u32,
                uid: meta.uid(),
                gid: meta.gid(),
                size: meta.size(),
                atime: meta.atime() as u64,
                mtime: meta.mtime() as u64,
                ctime: meta.ctime() as u64,
                ino: meta.ino(),
            };
            match write_guest_bytes(engine, buf_addr, &info.pack(process.arch)) {
                Ok(()) => ok(0),
                Err(e) => SyscallOutcome::Fatal(e),
            }
        }
        Err(e) => recoverable(Errno::from_io_error(&e)),
    }
}

pub fn stat(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, args[0]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let real = process.to_real(&path);
    stat_impl(process, engine, real, args[1])
}

pub fn fstat(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, ..] = *args;
    let Some(io) = process.fds.get(fd as i32) else { return recoverable(Errno::EBADF) };
    match io.fstat() {
        Ok(info) => match write_guest_bytes(engine, buf_addr, &info.pack(process.arch)) {
            Ok(()) => ok(0),
            Err(e) => SyscallOutcome::Fatal(e),
        },
        Err(e) => recoverable(e),
    }
}

pub fn getcwd(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [buf_addr, size, ..] = *args;
    let cwd = process.current_path().to_string();
    let mut bytes = cwd.into_bytes();
    bytes.push(0);
    if bytes.len() as u64 > size {
        return recoverable(Errno::ERANGE);
    }
    match engine.mem_write(buf_addr, &bytes) {
        Ok(()) => ok(buf_addr as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn chdir(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, args[0]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    if !process.to_real(&path).is_dir() {
        return recoverable(Errno::ENOTDIR);
    }
    let normalized = process.to_relative(&path);
    process.set_current_path(normalized);
    ok(0)
}

/// On MIPS o32, `pipe` has no output-pointer argument: the read end comes
/// back in V0 (the usual return-value register) and the write end in V1,
/// instead of both being written through `*pipefd` like every other arch.
pub fn pipe(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let (reader, writer) = GuestPipe::pair();
    let Some(read_fd) = process.fds.alloc_lowest(GuestIo::Pipe(reader)) else {
        return recoverable(Errno::EMFILE);
    };
    let Some(write_fd) = process.fds.alloc_lowest(GuestIo::Pipe(writer)) else {
        process.fds.close(read_fd);
        return recoverable(Errno::EMFILE);
    };

    if matches!(process.arch, emu_core::Arch::Mips32El) {
        if let Err(e) = engine.reg_write(exo_syscall_abi::mips::V1, write_fd as u64) {
            return SyscallOutcome::Fatal(e);
        }
        return ok(read_fd as i64);
    }

    let fds_addr = args[0];
    let pair = [(read_fd as u32).to_le_bytes(), (write_fd as u32).to_le_bytes()].concat();
    match write_guest_bytes(engine, fds_addr, &pair) {
        Ok(()) => ok(0),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn sendfile64(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [out_fd, in_fd, _offset, count, ..] = *args;
    let data = {
        let Some(reader) = process.fds.get_mut(in_fd as i32) else { return recoverable(Errno::EBADF) };
        match reader.read(count as usize) {
            Ok(d) => d,
            Err(e) => return recoverable(e),
        }
    };
    let Some(writer) = process.fds.get_mut(out_fd as i32) else { return recoverable(Errno::EBADF) };
    match writer.write(&data) {
        Ok(n) => ok(n as i64),
        Err(e) => recoverable(e),
    }
}

/// Packs `(ino: u64, name: Vec<u8> nul-terminated, reclen: u16)` entries
/// for every child of the fd's directory; used by both `getdents` (32
/// bit `d_off`) and `getdents64` (64 bit), which this layer doesn't
/// otherwise distinguish since nothing here reads `d_off` back.
pub fn getdents(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, buf_addr, buf_size, ..] = *args;
    let dir_guest_path = match process.fds.get_mut(fd as i32) {
        Some(io) => match io.as_file_mut() {
            Some(file) => file.path.clone(),
            None => return recoverable(Errno::ENOTDIR),
        },
        None => return recoverable(Errno::EBADF),
    };
    let real = process.to_real(&dir_guest_path);
    let entries = match std::fs::read_dir(&real) {
        Ok(rd) => rd,
        Err(e) => return recoverable(Errno::from_io_error(&e)),
    };

    let mut buf = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let ino = entry.metadata().map(|m| {
            use std::os::unix::fs::MetadataExt;
            m.ino()
        }).unwrap_or(0);
        let mut record = Vec::new();
        record.extend_from_slice(&ino.to_le_bytes());
        record.extend_from_slice(name.as_bytes());
        record.push(0);
        let reclen = record.len() as u16;
        record.extend_from_slice(&reclen.to_le_bytes());
        if buf.len() + record.len() > buf_size as usize {
            break;
        }
        buf.extend_from_slice(&record);
    }
    let n = buf.len();
    match write_guest_bytes(engine, buf_addr, &buf) {
        Ok(()) => ok(n as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn ftruncate(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [fd, len, ..] = *args;
    let Some(io) = process.fds.get_mut(fd as i32) else { return recoverable(Errno::EBADF) };
    let Some(file) = io.as_file_mut() else { return recoverable(Errno::EINVAL) };
    match file.truncate(len) {
        Ok(()) => ok(0),
        Err(e) => recoverable(e),
    }
}

pub fn truncate(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let path = match process.read_guest_cstr(engine, args[0]) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let real = process.to_real(&path);
    match OpenOptions::new().write(true).open(&real).and_then(|f| f.set_len(args[1])) {
        Ok(()) => ok(0),
        Err(e) => recoverable(Errno::from_io_error(&e)),
    }
}

pub fn umask(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let old = process.umask;
    process.umask = args[0] as u32 & 0o777;
    ok(old as i64)
}

pub fn getrandom(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [buf_addr, buf_len, ..] = *args;
    let mut bytes = vec![0u8; buf_len as usize];
    rand::Rng::fill(&mut rand::thread_rng(), bytes.as_mut_slice());
    let n = bytes.len();
    match write_guest_bytes(engine, buf_addr, &bytes) {
        Ok(()) => ok(n as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}
