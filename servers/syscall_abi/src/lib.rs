//! Per-architecture register ABI bindings.
//!
//! Each architecture gets its own small, stateless binder implementing
//! [`RegAbi`]; `GuestProcess` holds a `Box<dyn RegAbi>` chosen once at
//! construction from the process's [`Arch`] tag. Register ids are the
//! numbering a concrete `CpuEngine` (e.g. a Unicorn wrapper) assigns its
//! own register file — this crate only names which slot plays which
//! ABI role, exactly as the original Unicorn-based `UC_*_REG_*` constants
//! did, without depending on a concrete engine crate.

use emu_core::{mips_error_flag, Arch, CpuEngine, EmuResult, RegId};

/// Number of syscall arguments every ABI exposes (a0..a5).
pub const ARG_COUNT: usize = 6;

/// Binds syscall number / argument / return-value registers for one
/// architecture's calling convention.
pub trait RegAbi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64>;

    /// `i` in `0..ARG_COUNT`.
    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64>;

    /// Read all six arguments at once (the common case for dispatch).
    fn args(&self, engine: &mut dyn CpuEngine) -> EmuResult<[u64; ARG_COUNT]> {
        let mut out = [0u64; ARG_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.arg(engine, i)?;
        }
        Ok(out)
    }

    /// Write a syscall's result back into the guest's return register.
    /// On MIPS this additionally sets the A3 error flag.
    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()>;

    /// The register ids a thread-context snapshot needs to save/restore
    /// across a scheduler swap: the same syscall-role registers `args`/
    /// `set_return` already touch, which is also everything `clone`
    /// needs to hand a new thread a working copy of its parent's state.
    fn context_regs(&self) -> &'static [RegId];

    /// This ABI's program-counter register, so a saved thread resumes at
    /// the instruction it was suspended on rather than address zero.
    fn pc_reg(&self) -> RegId;

    /// This ABI's stack-pointer register. `clone`'s `child_stack`
    /// argument is written here for the new thread rather than copied
    /// from the parent's own stack pointer.
    fn stack_pointer_reg(&self) -> RegId;

    /// The register `set_return` writes the primary result into.
    fn return_reg(&self) -> RegId;

    /// The register `set_return` additionally sets on failure, if this
    /// ABI has one (MIPS's A3 flag; everything else folds success/failure
    /// into the return register alone).
    fn error_reg(&self) -> Option<RegId> {
        None
    }
}

/// Construct the `RegAbi` for `(arch, is_macos_guest)`; x86 is the only
/// architecture whose ABI differs by guest OS (stack-passed args on
/// macOS vs. register-passed on Linux).
pub fn for_arch(arch: Arch, macos_guest: bool) -> Box<dyn RegAbi> {
    match arch {
        Arch::Arm => Box::new(ArmAbi),
        Arch::Arm64 => Box::new(Arm64Abi),
        Arch::X86 if macos_guest => Box::new(X86MacosAbi),
        Arch::X86 => Box::new(X86LinuxAbi),
        Arch::X8664 => Box::new(X8664Abi),
        Arch::Mips32El => Box::new(Mips32ElAbi),
    }
}

fn write_return(engine: &mut dyn CpuEngine, reg: RegId, value: i64) -> EmuResult<()> {
    engine.reg_write(reg, value as u64)
}

pub mod arm {
    //! `UC_ARM_REG_*`-style numbering: R7 is the syscall number, R0..R5 the args.
    pub const R0: u32 = 0;
    pub const R1: u32 = 1;
    pub const R2: u32 = 2;
    pub const R3: u32 = 3;
    pub const R4: u32 = 4;
    pub const R5: u32 = 5;
    pub const R7: u32 = 7;
    /// R13: the stack pointer, as ARM itself numbers its registers.
    pub const SP: u32 = 13;
    /// R15: the program counter, as ARM itself numbers its registers.
    pub const PC: u32 = 15;
}

pub struct ArmAbi;

const ARM_CONTEXT: &[u32] = &[arm::R7, arm::R0, arm::R1, arm::R2, arm::R3, arm::R4, arm::R5, arm::SP];

impl RegAbi for ArmAbi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(arm::R7)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        let reg = [arm::R0, arm::R1, arm::R2, arm::R3, arm::R4, arm::R5][i];
        engine.reg_read(reg)
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        write_return(engine, arm::R0, value)
    }

    fn context_regs(&self) -> &'static [RegId] {
        ARM_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        arm::PC
    }

    fn return_reg(&self) -> RegId {
        arm::R0
    }

    fn stack_pointer_reg(&self) -> RegId {
        arm::SP
    }
}

pub mod arm64 {
    pub const X0: u32 = 0;
    pub const X1: u32 = 1;
    pub const X2: u32 = 2;
    pub const X3: u32 = 3;
    pub const X4: u32 = 4;
    pub const X5: u32 = 5;
    pub const X8: u32 = 8;
    /// X31: SP in AArch64's encoding (the same slot doubles as the zero
    /// register outside load/store addressing, irrelevant here).
    pub const SP: u32 = 31;
    /// AArch64's PC is its own pseudo-register, distinct from the X0..X30
    /// general-purpose file (`UC_ARM64_REG_PC` in Unicorn's numbering).
    pub const PC: u32 = 32;
}

pub struct Arm64Abi;

const ARM64_CONTEXT: &[u32] = &[
    arm64::X8,
    arm64::X0,
    arm64::X1,
    arm64::X2,
    arm64::X3,
    arm64::X4,
    arm64::X5,
    arm64::SP,
];

impl RegAbi for Arm64Abi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(arm64::X8)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        let reg = [arm64::X0, arm64::X1, arm64::X2, arm64::X3, arm64::X4, arm64::X5][i];
        engine.reg_read(reg)
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        write_return(engine, arm64::X0, value)
    }

    fn context_regs(&self) -> &'static [RegId] {
        ARM64_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        arm64::PC
    }

    fn return_reg(&self) -> RegId {
        arm64::X0
    }

    fn stack_pointer_reg(&self) -> RegId {
        arm64::SP
    }
}

pub mod x86 {
    pub const EAX: u32 = 0;
    pub const EBX: u32 = 1;
    pub const ECX: u32 = 2;
    pub const EDX: u32 = 3;
    pub const ESI: u32 = 4;
    pub const EDI: u32 = 5;
    pub const EBP: u32 = 6;
    pub const ESP: u32 = 7;
    pub const EIP: u32 = 8;
}

const X86_LINUX_CONTEXT: &[u32] = &[x86::EAX, x86::EBX, x86::ECX, x86::EDX, x86::ESI, x86::EDI, x86::EBP, x86::ESP];
const X86_MACOS_CONTEXT: &[u32] = &[x86::EAX, x86::ESP];

/// Linux x86: number in EAX, args in EBX,ECX,EDX,ESI,EDI,EBP.
pub struct X86LinuxAbi;

impl RegAbi for X86LinuxAbi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(x86::EAX)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        let reg = [x86::EBX, x86::ECX, x86::EDX, x86::ESI, x86::EDI, x86::EBP][i];
        engine.reg_read(reg)
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        write_return(engine, x86::EAX, value)
    }

    fn context_regs(&self) -> &'static [RegId] {
        X86_LINUX_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        x86::EIP
    }

    fn return_reg(&self) -> RegId {
        x86::EAX
    }

    fn stack_pointer_reg(&self) -> RegId {
        x86::ESP
    }
}

/// macOS x86 (BSD syscall convention): number in EAX, args passed on the
/// stack at ESP+4..ESP+24, four bytes apart.
pub struct X86MacosAbi;

impl RegAbi for X86MacosAbi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(x86::EAX)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        let esp = engine.reg_read(x86::ESP)?;
        let addr = esp + 4 + (i as u64) * 4;
        let bytes = engine.mem_read(addr, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()) as u64)
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        write_return(engine, x86::EAX, value)
    }

    fn context_regs(&self) -> &'static [RegId] {
        X86_MACOS_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        x86::EIP
    }

    fn return_reg(&self) -> RegId {
        x86::EAX
    }

    fn stack_pointer_reg(&self) -> RegId {
        x86::ESP
    }
}

pub mod x8664 {
    pub const RAX: u32 = 0;
    pub const RDI: u32 = 1;
    pub const RSI: u32 = 2;
    pub const RDX: u32 = 3;
    pub const R10: u32 = 4;
    pub const R8: u32 = 5;
    pub const R9: u32 = 6;
    pub const RSP: u32 = 7;
    pub const RIP: u32 = 16;
}

const X8664_CONTEXT: &[u32] = &[
    x8664::RAX,
    x8664::RDI,
    x8664::RSI,
    x8664::RDX,
    x8664::R10,
    x8664::R8,
    x8664::R9,
    x8664::RSP,
];

pub struct X8664Abi;

impl RegAbi for X8664Abi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(x8664::RAX)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        let reg = [x8664::RDI, x8664::RSI, x8664::RDX, x8664::R10, x8664::R8, x8664::R9][i];
        engine.reg_read(reg)
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        write_return(engine, x8664::RAX, value)
    }

    fn context_regs(&self) -> &'static [RegId] {
        X8664_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        x8664::RIP
    }

    fn return_reg(&self) -> RegId {
        x8664::RAX
    }

    fn stack_pointer_reg(&self) -> RegId {
        x8664::RSP
    }
}

pub mod mips {
    pub const V0: u32 = 0;
    pub const V1: u32 = 6;
    pub const A0: u32 = 1;
    pub const A1: u32 = 2;
    pub const A2: u32 = 3;
    pub const A3: u32 = 4;
    pub const SP: u32 = 5;
    pub const PC: u32 = 7;
}

const MIPS_CONTEXT: &[u32] = &[mips::V0, mips::V1, mips::A0, mips::A1, mips::A2, mips::A3, mips::SP];

/// MIPS32-LE o32 ABI: number in V0, first four args in A0..A3, the last
/// two read from the stack at [SP+0x10] and [SP+0x14]. The error flag
/// A3 is set alongside the return value in V0.
pub struct Mips32ElAbi;

impl RegAbi for Mips32ElAbi {
    fn syscall_number(&self, engine: &mut dyn CpuEngine) -> EmuResult<u64> {
        engine.reg_read(mips::V0)
    }

    fn arg(&self, engine: &mut dyn CpuEngine, i: usize) -> EmuResult<u64> {
        if i < 4 {
            let reg = [mips::A0, mips::A1, mips::A2, mips::A3][i];
            engine.reg_read(reg)
        } else {
            let sp = engine.reg_read(mips::SP)?;
            let offset = if i == 4 { 0x10 } else { 0x14 };
            let bytes = engine.mem_read(sp + offset, 4)?;
            Ok(u32::from_le_bytes(bytes.try_into().unwrap()) as u64)
        }
    }

    fn set_return(&self, engine: &mut dyn CpuEngine, value: i64) -> EmuResult<()> {
        engine.reg_write(mips::V0, value as u64)?;
        engine.reg_write(mips::A3, mips_error_flag(value) as u64)
    }

    fn context_regs(&self) -> &'static [RegId] {
        MIPS_CONTEXT
    }

    fn pc_reg(&self) -> RegId {
        mips::PC
    }

    fn return_reg(&self) -> RegId {
        mips::V0
    }

    fn error_reg(&self) -> Option<RegId> {
        Some(mips::A3)
    }

    fn stack_pointer_reg(&self) -> RegId {
        mips::SP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::NullEngine;

    #[test]
    fn x8664_reads_args_in_order() {
        let mut engine = NullEngine::new();
        engine.reg_write(x8664::RAX, 1).unwrap();
        engine.reg_write(x8664::RDI, 10).unwrap();
        engine.reg_write(x8664::RSI, 20).unwrap();
        let abi = X8664Abi;
        assert_eq!(abi.syscall_number(&mut engine).unwrap(), 1);
        assert_eq!(abi.arg(&mut engine, 0).unwrap(), 10);
        assert_eq!(abi.arg(&mut engine, 1).unwrap(), 20);
    }

    #[test]
    fn mips_sets_a3_on_failure() {
        let mut engine = NullEngine::new();
        let abi = Mips32ElAbi;
        abi.set_return(&mut engine, -1).unwrap();
        assert_eq!(engine.reg_read(mips::V0).unwrap() as i64, -1);
        assert_eq!(engine.reg_read(mips::A3).unwrap(), 1);

        abi.set_return(&mut engine, 0).unwrap();
        assert_eq!(engine.reg_read(mips::A3).unwrap(), 0);
    }

    #[test]
    fn x86_macos_reads_args_from_stack() {
        let mut engine = NullEngine::new();
        engine.reg_write(x86::ESP, 0x1000).unwrap();
        engine.mem_map(0x1000, 0x1000).unwrap();
        engine.mem_write(0x1004, &10u32.to_le_bytes()).unwrap();
        engine.mem_write(0x1008, &20u32.to_le_bytes()).unwrap();
        let abi = X86MacosAbi;
        assert_eq!(abi.arg(&mut engine, 0).unwrap(), 10);
        assert_eq!(abi.arg(&mut engine, 1).unwrap(), 20);
    }

    #[test]
    fn context_regs_cover_every_register_args_and_set_return_touch() {
        let abi = X8664Abi;
        assert!(abi.context_regs().contains(&x8664::RAX));
        assert!(abi.context_regs().contains(&x8664::RDI));
        assert_eq!(abi.return_reg(), x8664::RAX);
        assert_eq!(abi.error_reg(), None);
        assert_eq!(abi.pc_reg(), x8664::RIP);
    }

    #[test]
    fn mips_context_carries_its_own_error_register() {
        let abi = Mips32ElAbi;
        assert_eq!(abi.return_reg(), mips::V0);
        assert_eq!(abi.error_reg(), Some(mips::A3));
        assert!(abi.context_regs().contains(&mips::SP));
    }
}
