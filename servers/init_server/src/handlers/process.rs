//! Process/thread lifecycle: `exit`/`exit_group`, `vfork`/`execve`/`clone`,
//! `wait4`, tid/robust-list bookkeeping, and the identity calls.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;
use exo_scheduler_server::StopEvent;
use std::collections::HashMap;

const CLONE_VM: u64 = 0x100;
const CLONE_SETTLS: u64 = 0x80000;
const CLONE_CHILD_CLEARTID: u64 = 0x200000;

/// Stop the CPU and mark the current (or only) thread terminated; a lone
/// `exit` takes down just this thread, `exit_group` every thread in the
/// process.
pub(crate) fn terminate(process: &mut GuestProcess, engine: &mut dyn CpuEngine, event: StopEvent) -> SyscallOutcome {
    let _ = engine.emu_stop();
    if process.child_process {
        nix::unistd::_exit(0);
    }
    match process.scheduler.as_mut() {
        Some(sched) => {
            let tid = sched.current_tid();
            sched.terminate(tid, event);
            if sched.thread_count() == 0 {
                process.exited = true;
            }
        }
        // Single-thread mode: no scheduler means there is nothing else
        // this process could still be running.
        None => process.exited = true,
    }
    ok(0)
}

pub fn exit(process: &mut GuestProcess, engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    terminate(process, engine, StopEvent::Exit)
}

pub fn exit_group(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    process.exit_code = args[0] as i32;
    terminate(process, engine, StopEvent::ExitGroup)
}

/// Fork the host process. The child sets `child_process` and returns 0;
/// the parent receives the child's pid. In multi-thread mode the parent
/// additionally stops the CPU engine afterward.
pub fn vfork(process: &mut GuestProcess, engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Child) => {
            process.child_process = true;
            ok(0)
        }
        Ok(nix::unistd::ForkResult::Parent { child }) => {
            if process.is_multithreaded() {
                let _ = engine.emu_stop();
            }
            ok(child.as_raw() as i64)
        }
        Err(e) => super::recoverable(emu_core::Errno::from_raw(e as i32).unwrap_or(emu_core::Errno::EIO)),
    }
}

/// Stops the CPU, rebuilds argv/env from the guest's null-terminated
/// pointer vectors, and hands fresh state to the loader, which is an
/// external collaborator this layer only feeds — the actual re-entry
/// into the loader is out of scope here.
pub fn execve(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [path_addr, argv_addr, envp_addr, ..] = *args;
    let _ = engine.emu_stop();
    let ptr_size = if matches!(process.arch, emu_core::Arch::X8664 | emu_core::Arch::Arm64) { 8 } else { 4 };

    let path = match process.read_guest_cstr(engine, path_addr) {
        Ok(p) => p,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let argv = match process.read_guest_strvec(engine, argv_addr, ptr_size) {
        Ok(v) => v,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let env = match process.read_guest_strvec(engine, envp_addr, ptr_size) {
        Ok(v) => v,
        Err(e) => return SyscallOutcome::Fatal(e),
    };

    process.binary_path = path;
    process.argv = argv;
    process.env = env;
    ok(0)
}

/// The complex case. `CLONE_VM` clear forks the host process
/// exactly like `vfork`; set, it allocates a new guest `Thread` sharing
/// this address space. Returns 0 to the child, the new tid to the
/// parent — here that means the *handler's own* outcome is the parent's
/// (tid), since this call never actually runs as the child until the
/// scheduler later swaps to it.
pub fn clone(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [flags, child_stack, _ptid, newtls, ctid, ..] = *args;

    if flags & CLONE_VM == 0 {
        return vfork(process, engine, args);
    }

    // §4.6: "save parent context under new tid". The new thread resumes
    // as if it were the one returning from this very syscall — same
    // register file, same PC — except its return (and, on MIPS, error
    // flag) register reads 0, per clone(2)'s child-sees-0 contract; the
    // live engine state is left untouched so the parent still gets its
    // own `set_return(tid)` further down the dispatch path.
    let context_regs = process.reg_abi.context_regs().to_vec();
    let pc_reg = process.reg_abi.pc_reg();
    let sp_reg = process.reg_abi.stack_pointer_reg();
    let return_reg = process.reg_abi.return_reg();
    let error_reg = process.reg_abi.error_reg();
    let pc = engine.reg_read(pc_reg).unwrap_or(0);
    let mut snapshot: HashMap<_, _> = context_regs
        .iter()
        .filter_map(|&reg| engine.reg_read(reg).ok().map(|value| (reg, value)))
        .collect();
    snapshot.insert(return_reg, 0);
    if let Some(reg) = error_reg {
        snapshot.insert(reg, 0);
    }
    // The child runs on `child_stack`, not a copy of the parent's own
    // stack pointer (`CLONE_VM` shares the address space, not the stack).
    snapshot.insert(sp_reg, child_stack);

    let tid = process.scheduler_or_init(child_stack).spawn_thread(child_stack);
    if let Some(thread) = process.scheduler.as_mut().and_then(|s| s.get_mut(tid)) {
        thread.registers = snapshot;
        thread.pc = pc;
    }

    if flags & CLONE_SETTLS != 0 {
        let tls_blob = if matches!(process.arch, emu_core::Arch::X86) {
            engine.mem_read(newtls, 12).ok()
        } else {
            Some(newtls.to_le_bytes().to_vec())
        };
        if let (Some(blob), Some(sched)) = (tls_blob, process.scheduler.as_mut()) {
            if let Some(thread) = sched.get_mut(tid) {
                thread.tls_blob = Some(blob);
            }
        }
    }

    if flags & CLONE_CHILD_CLEARTID != 0 {
        if let Some(thread) = process.scheduler.as_mut().and_then(|s| s.get_mut(tid)) {
            thread.clear_child_tid = Some(ctid);
        }
    }

    let _ = engine.emu_stop();
    ok(tid as i64)
}

/// Forwarded to the host: `wait4` on a host-forked child pid, with the
/// same `(pid, status_ptr, options)` signature libc uses.
pub fn wait4(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [raw_pid, status_addr, options, ..] = *args;
    let pid = nix::unistd::Pid::from_raw(raw_pid as i32);
    let flag = nix::sys::wait::WaitPidFlag::from_bits_truncate(options as i32);
    match nix::sys::wait::waitpid(pid, Some(flag)) {
        Ok(status) => {
            let (wait_pid, raw_status) = match status {
                nix::sys::wait::WaitStatus::Exited(p, code) => (p, code << 8),
                nix::sys::wait::WaitStatus::Signaled(p, sig, _) => (p, sig as i32),
                nix::sys::wait::WaitStatus::StillAlive => (nix::unistd::Pid::from_raw(0), 0),
                other => (other.pid().unwrap_or(nix::unistd::Pid::from_raw(0)), 0),
            };
            if status_addr != 0 {
                if let Err(e) = engine.mem_write(status_addr, &(raw_status as u32).to_le_bytes()) {
                    return SyscallOutcome::Fatal(e);
                }
            }
            ok(wait_pid.as_raw() as i64)
        }
        Err(e) => super::recoverable(emu_core::Errno::from_raw(e as i32).unwrap_or(emu_core::Errno::ECHILD)),
    }
}

pub fn set_tid_address(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let tid = process.current_tid();
    if let Some(sched) = process.scheduler.as_mut() {
        sched.current_mut().clear_child_tid = Some(args[0]);
    }
    ok(tid as i64)
}

pub fn set_robust_list(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    if let Some(sched) = process.scheduler.as_mut() {
        sched.current_mut().robust_list_head = Some((args[0], args[1]));
    }
    ok(0)
}

pub fn gettid(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(process.current_tid() as i64)
}

/// Fixed constant, independent of the host's actual pid — callers only
/// ever observe a synthetic identity for this process.
pub fn getpid(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0x512)
}

pub fn getppid(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0x1024)
}

pub fn setsid(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(nix::unistd::getpid().as_raw() as i64)
}

pub fn nice(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

pub fn getpriority(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

pub fn identity(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(process.unprivileged_id())
}

pub fn identity_set(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(process.unprivileged_id())
}
