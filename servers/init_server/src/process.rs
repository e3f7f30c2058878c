//! `GuestProcess`: the root aggregate. Owns exactly one `MemorySpace`,
//! one `FdTable`, one `PathSandbox`, one `RegAbi` binding, and optionally
//! a `ThreadScheduler` (absent in single-thread mode).

use crate::dispatch::SyscallDispatcher;
use emu_core::{Arch, CpuEngine, EmuError, EmuResult, GuestOs, HostOs};
use exo_memory_server::MemorySpace;
use exo_scheduler_server::ThreadScheduler;
use exo_syscall_abi::{self as abi, RegAbi};
use exo_vfs_server::{FdTable, PathSandbox, StdioMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A signal's `sa_handler`/`sa_mask`/`sa_flags`/`sa_restorer` packed as
/// five `u32`s, the densest form that survives `rt_sigaction`'s
/// round-trip without interpreting any of it.
pub type SigactionEntry = [u32; 5];

pub const SIGNAL_TABLE_SIZE: usize = 65;

/// Construction-time options; mirrors the embedding surface described in
/// the embedding surface: `GuestProcess(argv, rootfs_path, options)`.
/// Also the on-disk shape of a `--config` TOML file: every field here is
/// one the CLI can set directly or inherit from such a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmuOptions {
    pub rootfs: std::path::PathBuf,
    #[serde(default)]
    pub mounts: Vec<(String, std::path::PathBuf)>,
    pub arch: Arch,
    pub host_os: HostOs,
    pub guest_os: GuestOs,
    #[serde(default)]
    pub libcache: bool,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub log_file: Option<std::path::PathBuf>,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub stdio: StdioMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Output {
    Off,
    Default,
    Debug,
    Dump,
    Disasm,
}

impl Default for Output {
    fn default() -> Self {
        Output::Default
    }
}

/// The root aggregate a loader hands off to the syscall layer: one
/// memory space, fd table, path sandbox, optional scheduler, and the
/// scalar bookkeeping making up the process's data model.
pub struct GuestProcess {
    pub arch: Arch,
    pub host_os: HostOs,
    pub guest_os: GuestOs,
    pub root: bool,
    cwd: String,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub binary_path: String,
    pub exit_code: i32,
    /// Set by `exit`/`exit_group` on the last (or only) thread; `run`
    /// uses this rather than re-deriving it from scheduler state, since
    /// single-thread mode has no scheduler to ask.
    pub exited: bool,
    pub sigactions: Vec<SigactionEntry>,
    pub port: u16,
    pub umask: u32,
    pub child_process: bool,
    pub memory: MemorySpace,
    pub fds: FdTable,
    pub sandbox: PathSandbox,
    pub scheduler: Option<ThreadScheduler>,
    pub reg_abi: Box<dyn RegAbi>,
}

impl GuestProcess {
    /// Construct a fresh process. `brk_base`/`mmap_base` come from the
    /// loader; `multithreaded` seeds a `ThreadScheduler` up front if
    /// the embedder already expects `clone` to be used (otherwise the
    /// scheduler is created lazily on the first `CLONE_VM` clone).
    pub fn new(
        argv: Vec<String>,
        env: Vec<String>,
        binary_path: String,
        brk_base: u64,
        mmap_base: u64,
        options: &EmuOptions,
    ) -> EmuResult<Self> {
        let macos_guest = matches!(options.guest_os, GuestOs::Macos);
        if !matches!(options.guest_os, GuestOs::Linux | GuestOs::Macos | GuestOs::Freebsd) {
            return Err(EmuError::Config(format!(
                "no POSIX syscall table for guest OS {:?}",
                options.guest_os
            )));
        }

        let overrides = options
            .mounts
            .iter()
            .map(|(guest, host)| exo_vfs_server::MountOverride {
                guest_prefix: guest.clone(),
                host_prefix: host.clone(),
            })
            .collect();
        let sandbox = PathSandbox::new(options.rootfs.clone(), overrides, binary_path.clone());

        Ok(Self {
            arch: options.arch,
            host_os: options.host_os,
            guest_os: options.guest_os,
            root: options.root,
            cwd: "/".to_string(),
            argv,
            env,
            binary_path,
            exit_code: 0,
            exited: false,
            sigactions: vec![[0u32; 5]; SIGNAL_TABLE_SIZE],
            port: 0,
            umask: 0o022,
            child_process: false,
            memory: MemorySpace::new(options.arch, brk_base, mmap_base),
            fds: FdTable::new(options.stdio),
            sandbox,
            scheduler: None,
            reg_abi: abi::for_arch(options.arch, macos_guest),
        })
    }

    /// The thread-relative (or process-relative, in single-thread mode)
    /// current working directory every path-resolving handler uses.
    pub fn current_path(&self) -> &str {
        match &self.scheduler {
            Some(sched) => sched.current().current_path.as_str(),
            None => self.cwd.as_str(),
        }
    }

    pub fn set_current_path(&mut self, path: String) {
        match &mut self.scheduler {
            Some(sched) => sched.current_mut().current_path = path,
            None => self.cwd = path,
        }
    }

    pub fn current_tid(&self) -> u64 {
        self.scheduler.as_ref().map(|s| s.current_tid()).unwrap_or(1)
    }

    pub fn is_multithreaded(&self) -> bool {
        self.scheduler.as_ref().map(|s| s.is_multithreaded()).unwrap_or(false)
    }

    /// Lazily start the scheduler on the first `CLONE_VM` clone; seeds
    /// it with tid 1 and the process's current path/stack.
    pub fn scheduler_or_init(&mut self, stack_pointer: u64) -> &mut ThreadScheduler {
        if self.scheduler.is_none() {
            self.scheduler = Some(ThreadScheduler::new(1, self.cwd.clone(), stack_pointer));
        }
        self.scheduler.as_mut().unwrap()
    }

    pub fn to_real(&self, guest_path: &str) -> std::path::PathBuf {
        self.sandbox.to_real(guest_path, self.current_path())
    }

    pub fn to_relative(&self, guest_path: &str) -> String {
        self.sandbox.to_relative(guest_path, self.current_path())
    }

    pub fn to_link(&self, guest_path: &str) -> std::path::PathBuf {
        self.sandbox.to_link(guest_path, self.current_path())
    }

    /// Identity calls: 0 if this process is root, else a fixed
    /// unprivileged uid/gid.
    pub fn unprivileged_id(&self) -> i64 {
        if self.root {
            0
        } else {
            1000
        }
    }

    pub fn read_guest_cstr(&mut self, engine: &mut dyn CpuEngine, addr: u64) -> EmuResult<String> {
        let mut bytes = Vec::new();
        let mut cursor = addr;
        loop {
            let chunk = engine.mem_read(cursor, 1)?;
            if chunk.is_empty() || chunk[0] == 0 {
                break;
            }
            bytes.push(chunk[0]);
            cursor += 1;
            if bytes.len() > 4096 {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a null-terminated vector of pointers to C strings (argv/envp
    /// layout), as `execve` needs.
    pub fn read_guest_strvec(&mut self, engine: &mut dyn CpuEngine, addr: u64, ptr_size: usize) -> EmuResult<Vec<String>> {
        let mut out = Vec::new();
        let mut cursor = addr;
        loop {
            let raw = engine.mem_read(cursor, ptr_size)?;
            let ptr = match ptr_size {
                4 => u32::from_le_bytes(raw.try_into().unwrap()) as u64,
                _ => u64::from_le_bytes(raw.try_into().unwrap()),
            };
            if ptr == 0 {
                break;
            }
            out.push(self.read_guest_cstr(engine, ptr)?);
            cursor += ptr_size as u64;
        }
        Ok(out)
    }

    /// Drive `engine` from `entry` until the guest calls `exit`/`exit_group`
    /// on its last thread or the scheduler runs dry. Installs a single
    /// `hook_code` callback that routes every syscall instruction through
    /// `dispatcher`, then alternates `emu_start` with
    /// `ThreadScheduler::schedule_next` whenever more than one guest
    /// thread is alive. Returns the process's exit code.
    ///
    /// `hook_code`'s callback type has no lifetime parameter, so it can't
    /// directly borrow `self`/`dispatcher` for less than `'static`; the
    /// raw pointers below stand in for that borrow. Both are sound only
    /// because the callback is never invoked outside the `emu_start`
    /// calls in this function's own body, and `self`/`dispatcher` outlive
    /// every one of them.
    pub fn run(&mut self, engine: &mut dyn CpuEngine, dispatcher: &SyscallDispatcher, entry: u64) -> EmuResult<i32> {
        let process_ptr: *mut GuestProcess = self;
        let dispatcher_ptr: *const SyscallDispatcher = dispatcher;

        engine.hook_code(Box::new(move |eng, _addr, _size| {
            // SAFETY: see the doc comment on `run`.
            let process = unsafe { &mut *process_ptr };
            let dispatcher = unsafe { &*dispatcher_ptr };
            if let Err(err) = dispatcher.dispatch(process, eng) {
                log::error!("fatal syscall error: {err}");
                let _ = eng.emu_stop();
                process.exited = true;
            }
        }));

        engine.emu_start(entry, 0)?;

        while !self.exited {
            if self.scheduler.is_some() {
                self.snapshot_current_thread(engine);
            }
            let more_threads = match self.scheduler.as_mut() {
                Some(sched) => sched.schedule_next(engine).is_some(),
                None => false,
            };
            if !more_threads {
                break;
            }
            let pc = self.restore_current_thread(engine);
            engine.emu_start(pc, 0)?;
        }

        Ok(self.exit_code)
    }

    /// Save the register file and PC of whichever thread is about to be
    /// swapped out into its `Thread` record, so `schedule_next` can later
    /// hand it back for `restore_current_thread` to replay. Mirrors what
    /// `clone` already does for a brand-new thread, just against the
    /// live engine instead of the parent's syscall-time state.
    fn snapshot_current_thread(&mut self, engine: &mut dyn CpuEngine) {
        let context_regs = self.reg_abi.context_regs().to_vec();
        let pc_reg = self.reg_abi.pc_reg();
        let registers: HashMap<_, _> = context_regs
            .iter()
            .filter_map(|&reg| engine.reg_read(reg).ok().map(|value| (reg, value)))
            .collect();
        let pc = engine.reg_read(pc_reg).unwrap_or(0);
        if let Some(thread) = self.scheduler.as_mut().map(|s| s.current_mut()) {
            thread.registers = registers;
            thread.pc = pc;
        }
    }

    /// Write the now-current thread's saved register file back into the
    /// engine and return its saved PC, so the next `emu_start` resumes
    /// exactly where this thread was suspended instead of at address 0.
    fn restore_current_thread(&mut self, engine: &mut dyn CpuEngine) -> u64 {
        let Some(sched) = self.scheduler.as_ref() else {
            return 0;
        };
        let thread = sched.current();
        let pc = thread.pc;
        let registers = thread.registers.clone();
        for (reg, value) in registers {
            let _ = engine.reg_write(reg, value);
        }
        pc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::GuestOs;

    fn options() -> EmuOptions {
        EmuOptions {
            rootfs: std::env::temp_dir(),
            mounts: Vec::new(),
            arch: Arch::X8664,
            host_os: HostOs::Linux,
            guest_os: GuestOs::Linux,
            libcache: false,
            output: Output::Off,
            log_file: None,
            root: false,
            stdio: StdioMode::Buffered,
        }
    }

    #[test]
    fn new_rejects_a_non_posix_guest_os() {
        let mut opts = options();
        opts.guest_os = GuestOs::Windows;
        let err = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap_err();
        assert!(matches!(err, EmuError::Config(_)));
    }

    #[test]
    fn unprivileged_id_depends_on_the_root_flag() {
        let mut opts = options();
        opts.root = false;
        let process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap();
        assert_eq!(process.unprivileged_id(), 1000);

        opts.root = true;
        let process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap();
        assert_eq!(process.unprivileged_id(), 0);
    }

    #[test]
    fn scheduler_starts_absent_and_lazily_initializes_at_tid_one() {
        let opts = options();
        let mut process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap();
        assert!(!process.is_multithreaded());
        assert_eq!(process.current_tid(), 1);

        process.scheduler_or_init(0x5000);
        assert!(process.scheduler.is_some());
        assert_eq!(process.current_tid(), 1);
    }

    #[test]
    fn current_path_defaults_to_root_and_is_settable() {
        let opts = options();
        let mut process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap();
        assert_eq!(process.current_path(), "/");
        process.set_current_path("/tmp".to_string());
        assert_eq!(process.current_path(), "/tmp");
    }

    #[test]
    fn snapshot_then_restore_round_trips_a_threads_register_file() {
        use emu_core::NullEngine;

        let opts = options();
        let mut process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000, 0x2000, &opts).unwrap();
        process.scheduler_or_init(0x7000);
        let second = process.scheduler.as_mut().unwrap().spawn_thread(0x8000);

        let mut engine = NullEngine::new();
        let return_reg = process.reg_abi.return_reg();
        engine.reg_write(return_reg, 0xAAAA).unwrap();
        engine.reg_write(process.reg_abi.pc_reg(), 0x4000).unwrap();

        // The outgoing (main) thread's live register state is captured...
        process.snapshot_current_thread(&mut engine);
        let saved_pc = process.scheduler.as_ref().unwrap().get(1).unwrap().pc;
        assert_eq!(saved_pc, 0x4000);

        // ...and swapping the scheduler's current thread to the sibling,
        // then restoring, must replay *that* thread's own saved context,
        // not the one we just snapshotted.
        process.scheduler.as_mut().unwrap().get_mut(second).unwrap().pc = 0x9000;
        process
            .scheduler
            .as_mut()
            .unwrap()
            .get_mut(second)
            .unwrap()
            .registers
            .insert(return_reg, 0x1234);
        while process.scheduler.as_ref().unwrap().current_tid() != second {
            process.scheduler.as_mut().unwrap().schedule_next(&mut engine);
        }
        let pc = process.restore_current_thread(&mut engine);
        assert_eq!(pc, 0x9000);
        assert_eq!(engine.reg_read(return_reg).unwrap(), 0x1234);
    }
}
