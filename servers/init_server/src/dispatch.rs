//! The `(guest_os, arch, syscall_number) -> handler` table and the
//! dispatch loop that reads a syscall's number/args via `RegAbi`, finds
//! its handler, and writes the result back.

use crate::handlers;
use crate::process::GuestProcess;
use emu_core::{Arch, CpuEngine, EmuError, GuestOs};
use std::collections::HashMap;

/// A handler's result before the dispatcher commits it via `RegAbi`.
pub enum SyscallOutcome {
    Value(i64),
    Fatal(EmuError),
}

impl From<i64> for SyscallOutcome {
    fn from(value: i64) -> Self {
        SyscallOutcome::Value(value)
    }
}

impl From<emu_core::Errno> for SyscallOutcome {
    fn from(errno: emu_core::Errno) -> Self {
        SyscallOutcome::Value(errno.to_guest_value())
    }
}

pub type Handler = fn(&mut GuestProcess, &mut dyn CpuEngine, &[u64; 6]) -> SyscallOutcome;

/// Every syscall this crate knows how to handle, named rather than
/// numbered; numbers are attached per `(guest_os, arch)` in
/// [`table_for`] since they differ across every ABI this layer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyscallName {
    Open,
    Openat,
    Read,
    Write,
    Writev,
    Lseek,
    Close,
    Dup,
    Dup2,
    Dup3,
    Fcntl,
    Fcntl64,
    Access,
    Faccessat,
    Readlink,
    Readlinkat,
    Stat,
    Stat64,
    Fstat,
    Fstat64,
    Getcwd,
    Chdir,
    Pipe,
    Sendfile64,
    Getdents,
    Getdents64,
    Ftruncate,
    Truncate,
    Umask,
    Getrandom,
    Socketpair,

    Mmap,
    Mmap2,
    Munmap,
    Brk,
    Mprotect,
    ArchPrctl,

    Exit,
    ExitGroup,
    Vfork,
    Execve,
    Clone,
    Wait4,
    SetTidAddress,
    SetRobustList,
    Gettid,
    Getpid,
    Getppid,
    Setsid,
    Nice,
    Getpriority,
    Getuid,
    Geteuid,
    Getgid,
    Getegid,
    Setuid,
    Setgid,
    Issetugid,
    Setgroups,

    Futex,

    RtSigaction,
    RtSigprocmask,

    Uname,
    Sysinfo,
    Ugetrlimit,
    Setrlimit,

    Time,
    Gettimeofday,
    Nanosleep,
    Times,
    Alarm,
    Setitimer,

    Socket,
    Bind,
    Listen,
    Accept,
    Connect,
    Send,
    Recv,
    Setsockopt,
    Shutdown,
    Ioctl,
    Socketcall,
    NewSelect,
}

impl SyscallName {
    /// The canonical name the dispatcher logs each call under;
    /// lowercase, matching the syscall's usual libc spelling.
    pub fn as_str(&self) -> &'static str {
        use SyscallName::*;
        match self {
            Open => "open",
            Openat => "openat",
            Read => "read",
            Write => "write",
            Writev => "writev",
            Lseek => "lseek",
            Close => "close",
            Dup => "dup",
            Dup2 => "dup2",
            Dup3 => "dup3",
            Fcntl => "fcntl",
            Fcntl64 => "fcntl64",
            Access => "access",
            Faccessat => "faccessat",
            Readlink => "readlink",
            Readlinkat => "readlinkat",
            Stat => "stat",
            Stat64 => "stat64",
            Fstat => "fstat",
            Fstat64 => "fstat64",
            Getcwd => "getcwd",
            Chdir => "chdir",
            Pipe => "pipe",
            Sendfile64 => "sendfile64",
            Getdents => "getdents",
            Getdents64 => "getdents64",
            Ftruncate => "ftruncate",
            Truncate => "truncate",
            Umask => "umask",
            Getrandom => "getrandom",
            Socketpair => "socketpair",
            Mmap => "mmap",
            Mmap2 => "mmap2",
            Munmap => "munmap",
            Brk => "brk",
            Mprotect => "mprotect",
            ArchPrctl => "arch_prctl",
            Exit => "exit",
            ExitGroup => "exit_group",
            Vfork => "vfork",
            Execve => "execve",
            Clone => "clone",
            Wait4 => "wait4",
            SetTidAddress => "set_tid_address",
            SetRobustList => "set_robust_list",
            Gettid => "gettid",
            Getpid => "getpid",
            Getppid => "getppid",
            Setsid => "setsid",
            Nice => "nice",
            Getpriority => "getpriority",
            Getuid => "getuid",
            Geteuid => "geteuid",
            Getgid => "getgid",
            Getegid => "getegid",
            Setuid => "setuid",
            Setgid => "setgid",
            Issetugid => "issetugid",
            Setgroups => "setgroups",
            Futex => "futex",
            RtSigaction => "rt_sigaction",
            RtSigprocmask => "rt_sigprocmask",
            Uname => "uname",
            Sysinfo => "sysinfo",
            Ugetrlimit => "ugetrlimit",
            Setrlimit => "setrlimit",
            Time => "time",
            Gettimeofday => "gettimeofday",
            Nanosleep => "nanosleep",
            Times => "times",
            Alarm => "alarm",
            Setitimer => "setitimer",
            Socket => "socket",
            Bind => "bind",
            Listen => "listen",
            Accept => "accept",
            Connect => "connect",
            Send => "send",
            Recv => "recv",
            Setsockopt => "setsockopt",
            Shutdown => "shutdown",
            Ioctl => "ioctl",
            Socketcall => "socketcall",
            NewSelect => "_newselect",
        }
    }
}

fn handler_for(name: SyscallName) -> Handler {
    use SyscallName::*;
    match name {
        Open => handlers::file::open,
        Openat => handlers::file::openat,
        Read => handlers::file::read,
        Write => handlers::file::write,
        Writev => handlers::file::writev,
        Lseek => handlers::file::lseek,
        Close => handlers::file::close,
        Dup => handlers::file::dup,
        Dup2 => handlers::file::dup2,
        Dup3 => handlers::file::dup3,
        Fcntl => handlers::file::fcntl,
        Fcntl64 => handlers::file::fcntl,
        Access => handlers::file::access,
        Faccessat => handlers::file::faccessat,
        Readlink => handlers::file::readlink,
        Readlinkat => handlers::file::readlinkat,
        Stat => handlers::file::stat,
        Stat64 => handlers::file::stat,
        Fstat => handlers::file::fstat,
        Fstat64 => handlers::file::fstat,
        Getcwd => handlers::file::getcwd,
        Chdir => handlers::file::chdir,
        Pipe => handlers::file::pipe,
        Sendfile64 => handlers::file::sendfile64,
        Getdents => handlers::file::getdents,
        Getdents64 => handlers::file::getdents,
        Ftruncate => handlers::file::ftruncate,
        Truncate => handlers::file::truncate,
        Umask => handlers::file::umask,
        Getrandom => handlers::file::getrandom,
        Socketpair => handlers::net::socketpair,

        Mmap => handlers::mem::mmap,
        Mmap2 => handlers::mem::mmap2,
        Munmap => handlers::mem::munmap,
        Brk => handlers::mem::brk,
        Mprotect => handlers::mem::mprotect,
        ArchPrctl => handlers::mem::arch_prctl,

        Exit => handlers::process::exit,
        ExitGroup => handlers::process::exit_group,
        Vfork => handlers::process::vfork,
        Execve => handlers::process::execve,
        Clone => handlers::process::clone,
        Wait4 => handlers::process::wait4,
        SetTidAddress => handlers::process::set_tid_address,
        SetRobustList => handlers::process::set_robust_list,
        Gettid => handlers::process::gettid,
        Getpid => handlers::process::getpid,
        Getppid => handlers::process::getppid,
        Setsid => handlers::process::setsid,
        Nice => handlers::process::nice,
        Getpriority => handlers::process::getpriority,
        Getuid | Geteuid | Getgid | Getegid => handlers::process::identity,
        Setuid | Setgid | Issetugid | Setgroups => handlers::process::identity_set,

        Futex => handlers::futex::futex,

        RtSigaction => handlers::signal::rt_sigaction,
        RtSigprocmask => handlers::signal::rt_sigprocmask,

        Uname => handlers::memquery::uname,
        Sysinfo => handlers::memquery::sysinfo,
        Ugetrlimit => handlers::memquery::ugetrlimit,
        Setrlimit => handlers::memquery::setrlimit,

        Time => handlers::time::time,
        Gettimeofday => handlers::time::gettimeofday,
        Nanosleep => handlers::time::nanosleep,
        Times => handlers::time::times,
        Alarm => handlers::time::alarm,
        Setitimer => handlers::time::setitimer,

        Socket => handlers::net::socket,
        Bind => handlers::net::bind,
        Listen => handlers::net::listen,
        Accept => handlers::net::accept,
        Connect => handlers::net::connect,
        Send => handlers::net::send,
        Recv => handlers::net::recv,
        Setsockopt => handlers::net::setsockopt,
        Shutdown => handlers::net::shutdown,
        Ioctl => handlers::net::ioctl,
        Socketcall => handlers::net::socketcall,
        NewSelect => handlers::net::newselect,
    }
}

/// One architecture's table, keyed by the syscall numbers that
/// architecture's ABI actually defines for this call (an arch that has
/// no `open` and only `openat`, like ARM64's generic syscall ABI, simply
/// omits the `Open` row).
fn linux_table(arch: Arch) -> Vec<(u64, SyscallName)> {
    use SyscallName::*;
    // (name, x86_64, arm64, legacy32) — legacy32 is the classic
    // Linux/i386 table, shared near-verbatim by ARM EABI and, offset by
    // +4000, by MIPS o32.
    const ROWS: &[(SyscallName, Option<u64>, Option<u64>, Option<u64>)] = &[
        (Read, Some(0), Some(63), Some(3)),
        (Write, Some(1), Some(64), Some(4)),
        (Open, None, None, Some(5)),
        (Openat, Some(257), Some(56), Some(295)),
        (Close, Some(3), Some(57), Some(6)),
        (Stat, None, None, Some(106)),
        (Fstat, Some(5), None, Some(108)),
        (Fstat64, None, None, Some(197)),
        (Stat64, None, None, Some(195)),
        (Lseek, Some(8), Some(62), Some(19)),
        (Mmap, Some(9), Some(222), None),
        (Mmap2, None, None, Some(192)),
        (Mprotect, Some(10), Some(226), Some(125)),
        (Munmap, Some(11), Some(215), Some(91)),
        (Brk, Some(12), Some(214), Some(45)),
        (RtSigaction, Some(13), Some(134), Some(174)),
        (RtSigprocmask, Some(14), Some(135), Some(175)),
        (Ioctl, Some(16), Some(29), Some(54)),
        (Pipe, None, None, Some(42)),
        (Access, None, None, Some(33)),
        (NewSelect, None, None, Some(142)),
        (Dup, Some(32), Some(23), Some(41)),
        (Dup2, None, None, Some(63)),
        (Dup3, Some(292), Some(24), Some(330)),
        (Nanosleep, Some(35), Some(101), Some(162)),
        (Getpid, Some(39), Some(172), Some(20)),
        (Socket, Some(41), Some(198), Some(359)),
        (Connect, Some(42), Some(203), Some(362)),
        (Accept, Some(43), Some(202), Some(363)),
        (Send, Some(44), None, None),
        (Recv, Some(45), None, None),
        (Shutdown, Some(48), Some(210), Some(373)),
        (Bind, Some(49), Some(200), Some(361)),
        (Listen, Some(50), Some(201), Some(363)),
        (Socketpair, Some(53), Some(199), Some(360)),
        (Setsockopt, Some(54), Some(208), Some(367)),
        (Clone, Some(56), Some(220), Some(120)),
        (Vfork, Some(58), None, Some(190)),
        (Execve, Some(59), Some(221), Some(11)),
        (Exit, Some(60), Some(93), Some(1)),
        (Wait4, Some(61), Some(260), Some(114)),
        (Uname, Some(63), Some(160), Some(122)),
        (Fcntl, Some(72), Some(25), Some(55)),
        (Fcntl64, None, None, Some(221)),
        (Truncate, Some(76), Some(45), Some(92)),
        (Ftruncate, Some(77), Some(46), Some(93)),
        (Getdents, None, None, Some(141)),
        (Getdents64, Some(78), Some(61), Some(220)),
        (Getcwd, Some(79), Some(17), Some(183)),
        (Chdir, Some(80), Some(49), Some(12)),
        (Readlink, None, None, Some(85)),
        (Readlinkat, Some(267), Some(78), Some(332)),
        (Sysinfo, Some(99), Some(179), Some(116)),
        (Times, Some(100), Some(153), Some(43)),
        (Socketcall, None, None, Some(102)),
        (Getuid, Some(102), Some(174), Some(24)),
        (Getgid, Some(104), Some(176), Some(47)),
        (Setuid, Some(105), Some(146), Some(23)),
        (Setgid, Some(106), Some(144), Some(46)),
        (Geteuid, Some(107), Some(175), Some(49)),
        (Getegid, Some(108), Some(177), Some(50)),
        (Setgroups, Some(116), Some(159), Some(81)),
        (Getpriority, Some(140), Some(141), Some(96)),
        (ArchPrctl, Some(158), None, None),
        (Setrlimit, Some(160), Some(164), Some(75)),
        (Getrandom, Some(318), Some(278), Some(384)),
        (Gettimeofday, Some(96), Some(169), Some(78)),
        (Getppid, Some(110), Some(173), Some(64)),
        (Setsid, Some(112), Some(157), Some(66)),
        (SetTidAddress, Some(218), Some(96), Some(258)),
        (SetRobustList, Some(273), Some(99), Some(338)),
        (Futex, Some(202), Some(98), Some(240)),
        (Gettid, Some(186), Some(178), Some(224)),
        (Sendfile64, Some(40), Some(71), Some(187)),
        (Nice, None, None, Some(34)),
        (Ugetrlimit, None, None, Some(191)),
        (Alarm, None, None, Some(27)),
        (Setitimer, Some(38), Some(103), Some(104)),
        (Umask, Some(95), Some(166), Some(60)),
        (Issetugid, None, None, None),
        (ExitGroup, Some(231), Some(94), Some(248)),
        (Writev, Some(20), Some(66), Some(146)),
        (Faccessat, Some(269), Some(48), Some(307)),
    ];

    let mut out = Vec::with_capacity(ROWS.len());
    for (name, x8664, arm64, legacy32) in ROWS {
        let num = match arch {
            Arch::X8664 => *x8664,
            Arch::Arm64 => *arm64,
            Arch::Mips32El => legacy32.map(|n| n + 4000),
            Arch::Arm | Arch::X86 => *legacy32,
        };
        if let Some(num) = num {
            out.push((num, *name));
        }
    }
    out
}

/// macOS's BSD numbering only needs to cover the common POSIX subset
/// this layer implements for the x86/x86-64 macOS guest (the out-of-scope
/// non-goal around kernel-exact numbering applies doubly here: this is a
/// deliberately small table, not full xnu syscall parity).
fn macos_table(_arch: Arch) -> Vec<(u64, SyscallName)> {
    use SyscallName::*;
    vec![
        (1, Exit),
        (3, Read),
        (4, Write),
        (5, Open),
        (6, Close),
        (19, Lseek),
        (20, Getpid),
        (30, Accept),
        (92, Fcntl),
        (97, Socket),
        (98, Connect),
        (104, Bind),
        (106, Listen),
        (188, Stat),
        (189, Fstat),
    ]
}

pub struct SyscallDispatcher {
    table: HashMap<u64, (SyscallName, Handler)>,
    guest_os: GuestOs,
    arch: Arch,
}

impl SyscallDispatcher {
    pub fn build(guest_os: GuestOs, arch: Arch) -> Self {
        let rows = match guest_os {
            GuestOs::Macos => macos_table(arch),
            _ => linux_table(arch),
        };
        let table = rows.into_iter().map(|(num, name)| (num, (name, handler_for(name)))).collect();
        Self { table, guest_os, arch }
    }

    /// Read number+args, look up the handler, invoke
    /// it, and write its result back via `RegAbi`. Returns `Err` only on
    /// an unknown syscall or an engine fault — both fatal, both meant to
    /// stop the `CpuEngine`.
    pub fn dispatch(&self, process: &mut GuestProcess, engine: &mut dyn CpuEngine) -> Result<(), EmuError> {
        let number = process.reg_abi.syscall_number(engine)?;
        let args = process.reg_abi.args(engine)?;

        let Some((name, handler)) = self.table.get(&number) else {
            log::warn!("unknown syscall {number} for {:?}/{}", self.guest_os, self.arch);
            return Err(EmuError::UnknownSyscall { guest_os: self.guest_os, arch: self.arch, number });
        };

        match handler(process, engine, &args) {
            SyscallOutcome::Value(ret) => {
                log::info!("{}({}) = {ret}", name.as_str(), args.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join(", "));
                process.reg_abi.set_return(engine, ret)?;
                Ok(())
            }
            SyscallOutcome::Fatal(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EmuOptions;
    use emu_core::{HostOs, NullEngine};
    use exo_syscall_abi::x8664;
    use exo_vfs_server::StdioMode;

    fn process() -> GuestProcess {
        let options = EmuOptions {
            rootfs: std::env::temp_dir(),
            mounts: Vec::new(),
            arch: Arch::X8664,
            host_os: HostOs::Linux,
            guest_os: GuestOs::Linux,
            libcache: false,
            output: crate::process::Output::Off,
            log_file: None,
            root: false,
            stdio: StdioMode::Buffered,
        };
        GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x7f0000000000, &options).unwrap()
    }

    #[test]
    fn unknown_syscall_number_is_fatal() {
        let dispatcher = SyscallDispatcher::build(GuestOs::Linux, Arch::X8664);
        let mut process = process();
        let mut engine = NullEngine::new();
        engine.reg_write(x8664::RAX, 999_999).unwrap();

        let err = dispatcher.dispatch(&mut process, &mut engine).unwrap_err();
        assert!(matches!(err, EmuError::UnknownSyscall { number: 999_999, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn known_syscall_writes_its_return_value_back() {
        let dispatcher = SyscallDispatcher::build(GuestOs::Linux, Arch::X8664);
        let mut process = process();
        let mut engine = NullEngine::new();
        // getpid takes no args and always returns the fixed 0x512.
        let getpid_number = linux_table(Arch::X8664)
            .into_iter()
            .find(|(_, name)| *name == SyscallName::Getpid)
            .map(|(num, _)| num)
            .unwrap();
        engine.reg_write(x8664::RAX, getpid_number).unwrap();

        dispatcher.dispatch(&mut process, &mut engine).unwrap();
        assert_eq!(engine.reg_read(x8664::RAX).unwrap() as i64, 0x512);
    }

    #[test]
    fn macos_table_is_a_small_fixed_subset() {
        let dispatcher = SyscallDispatcher::build(GuestOs::Macos, Arch::X86);
        assert_eq!(dispatcher.table.len(), macos_table(Arch::X86).len());
    }
}
