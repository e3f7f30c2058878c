//! The `CpuEngine` trait abstracts the CPU-instruction emulator itself;
//! the syscall layer never drives emulation directly, only consumes it
//! through these primitives.

use crate::error::EmuResult;
use std::collections::HashMap;

/// A single CPU register, identified by an engine-specific numeric id.
/// Concrete engines map these to their own register enums.
pub type RegId = u32;

/// Hook callback invoked by the engine on each instruction/block; the
/// syscall layer never calls these directly, but `GuestProcess::run`
/// installs one via `hook_code` to catch the syscall instruction.
pub type HookFn<'a> = dyn FnMut(&mut dyn CpuEngine, u64, u32) + 'a;

/// Abstraction over the instruction-level emulator. A real implementation
/// wraps something like Unicorn; tests and the scheduler's "no real CPU
/// yet" bootstrap use [`NullEngine`].
pub trait CpuEngine {
    fn mem_map(&mut self, addr: u64, len: usize) -> EmuResult<()>;
    fn mem_unmap(&mut self, addr: u64, len: usize) -> EmuResult<()>;
    fn mem_read(&mut self, addr: u64, len: usize) -> EmuResult<Vec<u8>>;
    fn mem_write(&mut self, addr: u64, data: &[u8]) -> EmuResult<()>;

    fn reg_read(&mut self, reg: RegId) -> EmuResult<u64>;
    fn reg_write(&mut self, reg: RegId, value: u64) -> EmuResult<()>;

    fn emu_start(&mut self, begin: u64, until: u64) -> EmuResult<()>;
    fn emu_stop(&mut self) -> EmuResult<()>;

    /// Register a per-instruction hook; returns a hook id.
    fn hook_code(&mut self, cb: Box<dyn FnMut(&mut dyn CpuEngine, u64, u32)>) -> u64;
    /// Register a per-basic-block hook; returns a hook id.
    fn hook_block(&mut self, cb: Box<dyn FnMut(&mut dyn CpuEngine, u64, u32)>) -> u64;

    /// x86-64 only: write a model-specific register. Used by `arch_prctl`
    /// (`ARCH_SET_FS`) to install the TLS base via MSR `0xC0000100`.
    fn msr_write(&mut self, _id: u32, _value: u64) -> EmuResult<()> {
        Ok(())
    }
}

/// A `CpuEngine` that emulates nothing: memory is backed by a plain byte
/// map, registers by a numeric map, and `emu_start`/`emu_stop` are no-ops.
/// Lets the syscall layer (and its tests) run without a real instruction
/// emulator linked in.
#[derive(Default)]
pub struct NullEngine {
    mem: HashMap<u64, Vec<u8>>,
    regs: HashMap<RegId, u64>,
    stopped: bool,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_key(addr: u64) -> u64 {
        addr & !0xfff
    }
}

impl CpuEngine for NullEngine {
    fn mem_map(&mut self, addr: u64, len: usize) -> EmuResult<()> {
        let mut off = 0usize;
        while off < len {
            let page = Self::page_key(addr + off as u64);
            self.mem.entry(page).or_insert_with(|| vec![0u8; 0x1000]);
            off += 0x1000;
        }
        Ok(())
    }

    fn mem_unmap(&mut self, addr: u64, len: usize) -> EmuResult<()> {
        let mut off = 0usize;
        while off < len {
            let page = Self::page_key(addr + off as u64);
            self.mem.remove(&page);
            off += 0x1000;
        }
        Ok(())
    }

    fn mem_read(&mut self, addr: u64, len: usize) -> EmuResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        for (i, byte) in out.iter_mut().enumerate() {
            let a = addr + i as u64;
            let page = Self::page_key(a);
            let page_off = (a & 0xfff) as usize;
            if let Some(buf) = self.mem.get(&page) {
                *byte = buf[page_off];
            }
        }
        Ok(out)
    }

    fn mem_write(&mut self, addr: u64, data: &[u8]) -> EmuResult<()> {
        for (i, byte) in data.iter().enumerate() {
            let a = addr + i as u64;
            let page = Self::page_key(a);
            let page_off = (a & 0xfff) as usize;
            let buf = self.mem.entry(page).or_insert_with(|| vec![0u8; 0x1000]);
            buf[page_off] = *byte;
        }
        Ok(())
    }

    fn reg_read(&mut self, reg: RegId) -> EmuResult<u64> {
        Ok(*self.regs.get(&reg).unwrap_or(&0))
    }

    fn reg_write(&mut self, reg: RegId, value: u64) -> EmuResult<()> {
        self.regs.insert(reg, value);
        Ok(())
    }

    fn emu_start(&mut self, _begin: u64, _until: u64) -> EmuResult<()> {
        self.stopped = false;
        Ok(())
    }

    fn emu_stop(&mut self) -> EmuResult<()> {
        self.stopped = true;
        Ok(())
    }

    fn hook_code(&mut self, _cb: Box<dyn FnMut(&mut dyn CpuEngine, u64, u32)>) -> u64 {
        0
    }

    fn hook_block(&mut self, _cb: Box<dyn FnMut(&mut dyn CpuEngine, u64, u32)>) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut engine = NullEngine::new();
        engine.mem_map(0x1000, 0x1000).unwrap();
        engine.mem_write(0x1000, b"hello").unwrap();
        assert_eq!(engine.mem_read(0x1000, 5).unwrap(), b"hello");
    }

    #[test]
    fn read_crossing_a_page_boundary_spans_both_pages() {
        let mut engine = NullEngine::new();
        engine.mem_map(0x0, 0x2000).unwrap();
        engine.mem_write(0xffc, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(engine.mem_read(0xffc, 8).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn unmapped_memory_reads_as_zero() {
        let mut engine = NullEngine::new();
        assert_eq!(engine.mem_read(0x5000, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn unmap_clears_previously_written_bytes() {
        let mut engine = NullEngine::new();
        engine.mem_map(0x1000, 0x1000).unwrap();
        engine.mem_write(0x1000, b"data").unwrap();
        engine.mem_unmap(0x1000, 0x1000).unwrap();
        assert_eq!(engine.mem_read(0x1000, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn registers_default_to_zero_until_written() {
        let mut engine = NullEngine::new();
        assert_eq!(engine.reg_read(3).unwrap(), 0);
        engine.reg_write(3, 42).unwrap();
        assert_eq!(engine.reg_read(3).unwrap(), 42);
    }

    #[test]
    fn emu_start_clears_the_stopped_flag() {
        let mut engine = NullEngine::new();
        engine.emu_stop().unwrap();
        assert!(engine.stopped);
        engine.emu_start(0, 0).unwrap();
        assert!(!engine.stopped);
    }
}
