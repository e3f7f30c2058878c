//! `futex(uaddr, op, val, timeout, uaddr2, val3)`: only `WAIT`/`WAKE` are
//! given real semantics; any other op terminates the calling thread with
//! `EXIT_GROUP` rather than emulate the real futex state machine.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;
use exo_ipc_router::{futex_op_kind, wait_predicate, FUTEX_WAIT, FUTEX_WAKE};
use exo_scheduler_server::StopEvent;

pub fn futex(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [uaddr, op, val, ..] = *args;
    match futex_op_kind(op as u32) {
        FUTEX_WAIT => {
            let _ = engine.emu_stop();
            let predicate = wait_predicate(uaddr, val as u32);
            process.scheduler_or_init(0).block_current(predicate);
            ok(0)
        }
        FUTEX_WAKE => ok(0),
        other => {
            log::warn!("futex: unhandled op {other}, terminating calling thread");
            super::process::terminate(process, engine, StopEvent::ExitGroup)
        }
    }
}
