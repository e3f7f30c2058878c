//! End-to-end scenarios straight out of the testable-properties section:
//! a `GuestProcess` wired to a `NullEngine`, driven through the handlers
//! exactly as `SyscallDispatcher::dispatch` would, checking what the
//! guest would actually observe (buffer contents, register values,
//! fd-table slots) rather than just the handler's return code.

use emu_core::{Arch, GuestOs, HostOs, NullEngine};
use exo_init_server::dispatch::SyscallOutcome;
use exo_init_server::{handlers, EmuOptions, GuestProcess, Output};
use exo_vfs_server::{GuestIo, StdioMode};
use std::path::PathBuf;

fn options(rootfs: PathBuf) -> EmuOptions {
    EmuOptions {
        rootfs,
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

fn process(rootfs: PathBuf) -> GuestProcess {
    GuestProcess::new(
        vec!["guest".to_string()],
        Vec::new(),
        "/bin/guest".to_string(),
        0x1000_0000,
        0x7fff_f000_0000,
        &options(rootfs),
    )
    .expect("process construction")
}

fn write_cstr(engine: &mut NullEngine, addr: u64, s: &str) {
    engine.mem_map(addr, 0x1000).unwrap();
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    engine.mem_write(addr, &bytes).unwrap();
}

fn value_of(outcome: SyscallOutcome) -> i64 {
    match outcome {
        SyscallOutcome::Value(v) => v,
        SyscallOutcome::Fatal(e) => panic!("unexpected fatal outcome: {e}"),
    }
}

/// Scenario 1: "hello write" — `write(1, "hello\n", 6)` lands in the
/// buffered stdout fd, and the handler reports 6 bytes written.
#[test]
fn hello_write_lands_in_stdout_buffer() {
    let tmp = tempfile::tempdir().unwrap();
    let mut process = process(tmp.path().to_path_buf());
    let mut engine = NullEngine::new();

    let buf_addr = 0x2000;
    engine.mem_map(buf_addr, 0x1000).unwrap();
    engine.mem_write(buf_addr, b"hello\n").unwrap();

    let ret = value_of(handlers::file::write(&mut process, &mut engine, &[1, buf_addr, 6, 0, 0, 0]));
    assert_eq!(ret, 6);

    let Some(GuestIo::File(stdout)) = process.fds.get(1) else { panic!("fd 1 missing") };
    assert_eq!(stdout.buffer_contents().unwrap(), b"hello\n");
}

/// Scenario 2: "sandbox read" — a rootfs containing `etc/hosts`, opened,
/// read back in full, then closed; fd 3 is the lowest free slot (0/1/2
/// are stdio) and becomes empty again after `close`.
#[test]
fn sandbox_read_round_trips_through_open_read_close() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
    std::fs::write(tmp.path().join("etc/hosts"), b"127.0.0.1 localhost\n").unwrap();

    let mut process = process(tmp.path().to_path_buf());
    let mut engine = NullEngine::new();

    let path_addr = 0x3000;
    write_cstr(&mut engine, path_addr, "/etc/hosts");
    let fd = value_of(handlers::file::open(&mut process, &mut engine, &[path_addr, 0, 0, 0, 0, 0]));
    assert_eq!(fd, 3);

    let buf_addr = 0x4000;
    engine.mem_map(buf_addr, 0x1000).unwrap();
    let n = value_of(handlers::file::read(&mut process, &mut engine, &[fd as u64, buf_addr, 128, 0, 0, 0]));
    assert_eq!(n, "127.0.0.1 localhost\n".len() as i64);
    let read_back = engine.mem_read(buf_addr, n as usize).unwrap();
    assert_eq!(read_back, b"127.0.0.1 localhost\n");

    let close_ret = value_of(handlers::file::close(&mut process, &mut engine, &[fd as u64, 0, 0, 0, 0, 0]));
    assert_eq!(close_ret, 0);
    assert!(process.fds.get(fd as i32).is_none());
}

/// Scenario 3: "mmap anonymous" — the first anonymous mapping lands at
/// the mmap cursor, the cursor advances by the page-aligned length, and
/// the region reads back as zeros.
#[test]
fn anonymous_mmap_returns_cursor_and_advances_it() {
    const MMAP_BASE: u64 = 0x7ffff0000000;
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = options(tmp.path().to_path_buf());
    opts.arch = Arch::X8664;
    let mut process = GuestProcess::new(
        vec!["guest".to_string()],
        Vec::new(),
        "/bin/guest".to_string(),
        0x1000_0000,
        MMAP_BASE,
        &opts,
    )
    .unwrap();
    let mut engine = NullEngine::new();

    const PROT_READ_WRITE: u64 = 3;
    const MAP_PRIVATE_ANON: u64 = 0x02 | 0x20;
    let fd_none = u32::MAX as u64; // truncates to -1i32 the same way a real syscall arg would
    let base = value_of(handlers::mem::mmap(
        &mut process,
        &mut engine,
        &[0, 0x3000, PROT_READ_WRITE, MAP_PRIVATE_ANON, fd_none, 0],
    ));
    assert_eq!(base, MMAP_BASE as i64);
    assert_eq!(engine.mem_read(base as u64, 16).unwrap(), vec![0u8; 16]);

    let next = value_of(handlers::mem::mmap(
        &mut process,
        &mut engine,
        &[0, 0x1000, PROT_READ_WRITE, MAP_PRIVATE_ANON, fd_none, 0],
    ));
    assert_eq!(next, base + 0x3000);
}

/// Scenario 4: "brk grow" — querying with 0 returns the current break;
/// growing past it page-aligns up; the grown value sticks.
#[test]
fn brk_grows_and_remembers_new_value() {
    const BRK_BASE: u64 = 0x1000_0000;
    let tmp = tempfile::tempdir().unwrap();
    let opts = options(tmp.path().to_path_buf());
    let mut process = GuestProcess::new(
        vec!["guest".to_string()],
        Vec::new(),
        "/bin/guest".to_string(),
        BRK_BASE,
        0x7fff_f000_0000,
        &opts,
    )
    .unwrap();
    let mut engine = NullEngine::new();

    let queried = value_of(handlers::mem::brk(&mut process, &mut engine, &[0, 0, 0, 0, 0, 0]));
    assert_eq!(queried, BRK_BASE as i64);

    let grown = value_of(handlers::mem::brk(&mut process, &mut engine, &[0x1000_1234, 0, 0, 0, 0, 0]));
    assert_eq!(grown, 0x1000_2000);

    let requeried = value_of(handlers::mem::brk(&mut process, &mut engine, &[0, 0, 0, 0, 0, 0]));
    assert_eq!(requeried, 0x1000_2000);
}

/// Scenario 5: "clone+futex rendezvous" — a `CLONE_VM` clone hands the
/// parent a tid and blocks it on `futex(WAIT, A, 1)`; once the word at
/// `A` no longer reads 1, the parent's thread is runnable again on the
/// scheduler's next pass.
#[test]
fn clone_and_futex_rendezvous() {
    const CLONE_VM: u64 = 0x100;
    let tmp = tempfile::tempdir().unwrap();
    let opts = options(tmp.path().to_path_buf());
    let mut process = GuestProcess::new(vec!["guest".to_string()], Vec::new(), "/bin/guest".to_string(), 0x1000_0000, 0x7fff_f000_0000, &opts)
        .unwrap();
    let mut engine = NullEngine::new();

    let child_stack = 0x5_0000;
    let child_tid = value_of(handlers::process::clone(&mut process, &mut engine, &[CLONE_VM, child_stack, 0, 0, 0, 0]));
    assert!(child_tid > 0);
    assert_eq!(process.current_tid(), 1, "clone doesn't switch the running thread");

    let futex_addr = 0x6000;
    engine.mem_map(futex_addr, 0x1000).unwrap();
    engine.mem_write(futex_addr, &1u32.to_le_bytes()).unwrap();

    const FUTEX_WAIT: u64 = 0;
    let wait_ret = value_of(handlers::futex::futex(&mut process, &mut engine, &[futex_addr, FUTEX_WAIT, 1, 0, 0, 0]));
    assert_eq!(wait_ret, 0);
    assert!(!process.scheduler.as_ref().unwrap().get(1).unwrap().is_runnable());

    // The "child" writes 0 and the scheduler re-checks predicates on its
    // next scheduling pass (no separate `FUTEX_WAKE` call is needed for
    // the predicate itself to clear; WAKE is a no-op per §4.6).
    engine.mem_write(futex_addr, &0u32.to_le_bytes()).unwrap();
    process.scheduler.as_mut().unwrap().reevaluate_blocked(&mut engine);
    assert!(process.scheduler.as_ref().unwrap().get(1).unwrap().is_runnable());
}

/// Invariant 1/2 at the handler level: `open` always allocates the
/// lowest empty slot, and a full round trip leaves the slot empty again.
#[test]
fn open_allocates_lowest_free_slot_after_close() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a"), b"a").unwrap();
    std::fs::write(tmp.path().join("b"), b"b").unwrap();
    let mut process = process(tmp.path().to_path_buf());
    let mut engine = NullEngine::new();

    let path_a = 0x7000;
    write_cstr(&mut engine, path_a, "/a");
    let fd_a = value_of(handlers::file::open(&mut process, &mut engine, &[path_a, 0, 0, 0, 0, 0]));
    assert_eq!(fd_a, 3);

    let path_b = 0x7100;
    write_cstr(&mut engine, path_b, "/b");
    let fd_b = value_of(handlers::file::open(&mut process, &mut engine, &[path_b, 0, 0, 0, 0, 0]));
    assert_eq!(fd_b, 4);

    value_of(handlers::file::close(&mut process, &mut engine, &[fd_a as u64, 0, 0, 0, 0, 0]));

    let path_c = 0x7200;
    write_cstr(&mut engine, path_c, "/a");
    let fd_c = value_of(handlers::file::open(&mut process, &mut engine, &[path_c, 0, 0, 0, 0, 0]));
    assert_eq!(fd_c, 3, "the freed slot 3 is reused before allocating slot 5");
}
