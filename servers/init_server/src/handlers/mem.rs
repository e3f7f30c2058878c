//! `mmap`/`mmap2`/`munmap`/`brk`/`mprotect`/`arch_prctl`: thin wrappers
//! over `exo_memory_server::MemorySpace`, translating fd/prot/flags from
//! the raw syscall args.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;

pub fn mmap(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [addr, length, prot, flags, fd, offset] = *args;
    match process
        .memory
        .mmap(engine, &mut process.fds, addr, length as usize, prot as u32, flags as u32, fd as i32, offset)
    {
        Ok(base) => ok(base as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

/// On every arch but MIPS, `page_offset` is the sixth syscall argument
/// itself. On MIPS o32 that argument slot instead holds a pointer to the
/// page offset in guest memory, so it's dereferenced before scaling.
pub fn mmap2(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [addr, length, prot, flags, fd, raw_offset] = *args;
    let page_offset = if matches!(process.arch, emu_core::Arch::Mips32El) {
        match engine.mem_read(raw_offset, 4) {
            Ok(bytes) => u32::from_le_bytes(bytes.try_into().unwrap()) as u64,
            Err(e) => return SyscallOutcome::Fatal(e),
        }
    } else {
        raw_offset
    };
    match process.memory.mmap2(
        engine,
        &mut process.fds,
        addr,
        length as usize,
        prot as u32,
        flags as u32,
        fd as i32,
        page_offset,
    ) {
        Ok(base) => ok(base as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn munmap(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    match process.memory.munmap(engine, args[0], args[1] as usize) {
        Ok(()) => ok(0),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn brk(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    match process.memory.brk(engine, args[0]) {
        Ok(new_brk) => ok(new_brk as i64),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

pub fn mprotect(process: &mut GuestProcess, _engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    match process.memory.mprotect(args[0], args[1] as usize, args[2] as u32) {
        Ok(ret) => ok(ret),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

/// `arch_prctl(ARCH_SET_FS, addr)`: installs the TLS base via the
/// `FSBASE` MSR (0xC0000100) on x86-64; every other subfunction is a
/// silent success since this layer never reads `%fs`-relative memory
/// itself.
pub fn arch_prctl(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    const ARCH_SET_FS: u64 = 0x1002;
    const MSR_FS_BASE: u32 = 0xC0000100;
    if args[0] == ARCH_SET_FS {
        if let Err(e) = engine.msr_write(MSR_FS_BASE, args[1]) {
            return SyscallOutcome::Fatal(e);
        }
    }
    ok(0)
}
