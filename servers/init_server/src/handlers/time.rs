//! Clocks and sleeps. `nanosleep` is the one handler whose behavior
//! actually forks on single- vs multi-thread mode: alone, it just sleeps
//! the host; under a scheduler, sleeping the host would stall every
//! other thread, so it blocks on a running-time predicate instead.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;
use exo_ipc_router::timer_predicate;
use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> (i64, i64) {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (elapsed.as_secs() as i64, elapsed.subsec_micros() as i64)
}

pub fn time(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let (secs, _) = now();
    if args[0] != 0 {
        if let Err(e) = engine.mem_write(args[0], &secs.to_le_bytes()) {
            return SyscallOutcome::Fatal(e);
        }
    }
    ok(secs)
}

pub fn gettimeofday(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let tv_addr = args[0];
    if tv_addr != 0 {
        let (secs, usecs) = now();
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&secs.to_le_bytes());
        bytes.extend_from_slice(&usecs.to_le_bytes());
        if let Err(e) = engine.mem_write(tv_addr, &bytes) {
            return SyscallOutcome::Fatal(e);
        }
    }
    ok(0)
}

fn read_timespec(engine: &mut dyn CpuEngine, addr: u64) -> emu_core::EmuResult<(i64, i64)> {
    let raw = engine.mem_read(addr, 16)?;
    let secs = i64::from_le_bytes(raw[0..8].try_into().unwrap());
    let nanos = i64::from_le_bytes(raw[8..16].try_into().unwrap());
    Ok((secs, nanos))
}

pub fn nanosleep(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [req_addr, ..] = *args;
    let (secs, nanos) = match read_timespec(engine, req_addr) {
        Ok(t) => t,
        Err(e) => return SyscallOutcome::Fatal(e),
    };

    if !process.is_multithreaded() {
        std::thread::sleep(std::time::Duration::new(secs.max(0) as u64, nanos.max(0) as u32));
        return ok(0);
    }

    let running_time = process.scheduler_or_init(0).running_time();
    let ticks = (secs.max(0) as u64).saturating_mul(1000).saturating_add(nanos.max(0) as u64 / 1_000_000);
    let _ = engine.emu_stop();
    let predicate = timer_predicate(running_time + ticks.max(1));
    process.scheduler_or_init(0).block_current(predicate);
    ok(0)
}

pub fn times(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let buf_addr = args[0];
    let elapsed = process.scheduler.as_ref().map(|s| s.running_time()).unwrap_or(0) as u32;
    if buf_addr != 0 {
        let mut bytes = Vec::with_capacity(16);
        for field in [elapsed, 0u32, 0u32, 0u32] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        if let Err(e) = engine.mem_write(buf_addr, &bytes) {
            return SyscallOutcome::Fatal(e);
        }
    }
    ok(elapsed as i64)
}

pub fn alarm(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

pub fn setitimer(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
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
    fn gettimeofday_writes_a_plausible_unix_timestamp() {
        let mut process = process();
        let mut engine = NullEngine::new();
        let tv_addr = 0x5000;
        engine.mem_map(tv_addr, 0x1000).unwrap();
        gettimeofday(&mut process, &mut engine, &[tv_addr, 0, 0, 0, 0, 0]);
        let secs = i64::from_le_bytes(engine.mem_read(tv_addr, 8).unwrap().try_into().unwrap());
        assert!(secs > 1_700_000_000, "expected a post-2023 timestamp, got {secs}");
    }

    #[test]
    fn nanosleep_single_thread_sleeps_the_host_and_returns_immediately() {
        let mut process = process();
        let mut engine = NullEngine::new();
        let req_addr = 0x6000;
        engine.mem_map(req_addr, 0x1000).unwrap();
        engine.mem_write(req_addr, &0i64.to_le_bytes()).unwrap();
        engine.mem_write(req_addr + 8, &0i64.to_le_bytes()).unwrap();
        let outcome = nanosleep(&mut process, &mut engine, &[req_addr, 0, 0, 0, 0, 0]);
        assert!(matches!(outcome, SyscallOutcome::Value(0)));
    }

    #[test]
    fn nanosleep_multithreaded_blocks_instead_of_stalling_the_host() {
        let mut process = process();
        process.scheduler_or_init(0x1000).spawn_thread(0x2000);
        assert!(process.is_multithreaded());

        let mut engine = NullEngine::new();
        let req_addr = 0x7000;
        engine.mem_map(req_addr, 0x1000).unwrap();
        engine.mem_write(req_addr, &1i64.to_le_bytes()).unwrap();
        engine.mem_write(req_addr + 8, &0i64.to_le_bytes()).unwrap();

        nanosleep(&mut process, &mut engine, &[req_addr, 0, 0, 0, 0, 0]);
        let current = process.current_tid();
        assert!(!process.scheduler.as_ref().unwrap().get(current).unwrap().is_runnable());
    }
}
