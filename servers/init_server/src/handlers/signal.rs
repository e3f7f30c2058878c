//! `rt_sigaction`/`rt_sigprocmask`: the process keeps a table of signal
//! dispositions but never actually delivers anything.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;

/// Store or retrieve a 5x`u32` `sigaction` record for `signum`. Writing
/// `oldact` when the table slot is unset produces all zeroes rather than
/// skipping the write.
pub fn rt_sigaction(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [signum, act_addr, oldact_addr, ..] = *args;
    let signum = signum as usize;
    if signum >= process.sigactions.len() {
        return super::recoverable(emu_core::Errno::EINVAL);
    }

    if oldact_addr != 0 {
        let old = process.sigactions[signum];
        let mut bytes = Vec::with_capacity(20);
        for word in old {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        if let Err(e) = engine.mem_write(oldact_addr, &bytes) {
            return SyscallOutcome::Fatal(e);
        }
    }

    if act_addr != 0 {
        let raw = match engine.mem_read(act_addr, 20) {
            Ok(b) => b,
            Err(e) => return SyscallOutcome::Fatal(e),
        };
        let mut entry = [0u32; 5];
        for (i, word) in entry.iter_mut().enumerate() {
            *word = u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
        }
        process.sigactions[signum] = entry;
    }

    ok(0)
}

pub fn rt_sigprocmask(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{EmuOptions, Output};
    use emu_core::{GuestOs, HostOs, NullEngine};
    use exo_vfs_server::StdioMode;

    fn process() -> GuestProcess {
        let options = EmuOptions {
            rootfs: std::env::temp_dir(),
            mounts: Vec::new(),
            arch: emu_core::Arch::X8664,
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

    #[test]
    fn sigaction_round_trips_through_the_table() {
        let mut process = process();
        let mut engine = NullEngine::new();
        let act_addr = 0x3000;
        engine.mem_map(act_addr, 0x1000).unwrap();
        let entry: [u32; 5] = [0xdeadbeef, 1, 2, 3, 4];
        let mut bytes = Vec::new();
        for word in entry {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        engine.mem_write(act_addr, &bytes).unwrap();

        rt_sigaction(&mut process, &mut engine, &[10, act_addr, 0, 0, 0, 0]);
        assert_eq!(process.sigactions[10], entry);

        let oldact_addr = 0x4000;
        engine.mem_map(oldact_addr, 0x1000).unwrap();
        rt_sigaction(&mut process, &mut engine, &[10, 0, oldact_addr, 0, 0, 0]);
        let read_back = engine.mem_read(oldact_addr, 4).unwrap();
        assert_eq!(u32::from_le_bytes(read_back.try_into().unwrap()), 0xdeadbeef);
    }

    #[test]
    fn sigaction_rejects_an_out_of_range_signal_number() {
        let mut process = process();
        let mut engine = NullEngine::new();
        let outcome = rt_sigaction(&mut process, &mut engine, &[SIGNAL_TABLE_SIZE_FOR_TEST, 0, 0, 0, 0, 0]);
        assert!(matches!(outcome, SyscallOutcome::Value(-1)));
    }

    const SIGNAL_TABLE_SIZE_FOR_TEST: u64 = crate::process::SIGNAL_TABLE_SIZE as u64;
}
