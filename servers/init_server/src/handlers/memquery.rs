//! System identity and resource-limit queries: `uname`, `sysinfo`,
//! `ugetrlimit`/`setrlimit`.

use super::ok;
use crate::dispatch::SyscallOutcome;
use crate::process::GuestProcess;
use emu_core::CpuEngine;

const UTS_FIELD_LEN: usize = 65;

fn pack_uts_field(out: &mut Vec<u8>, value: &str) {
    let mut field = vec![0u8; UTS_FIELD_LEN];
    let bytes = value.as_bytes();
    let n = bytes.len().min(UTS_FIELD_LEN - 1);
    field[..n].copy_from_slice(&bytes[..n]);
    out.extend_from_slice(&field);
}

/// Writes a fixed synthetic `struct utsname` (sysname/nodename/release/
/// version/machine/domainname, six 65-byte fields) describing a
/// "QilingOS 99.0-RELEASE" identity rather than anything host-derived.
pub fn uname(process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let buf_addr = args[0];
    let machine = process.arch.to_string();

    let mut bytes = Vec::with_capacity(UTS_FIELD_LEN * 6);
    pack_uts_field(&mut bytes, "QilingOS");
    pack_uts_field(&mut bytes, "qiling");
    pack_uts_field(&mut bytes, "99.0-RELEASE");
    pack_uts_field(&mut bytes, "QilingOS 99.0-RELEASE");
    pack_uts_field(&mut bytes, &machine);
    pack_uts_field(&mut bytes, "(none)");

    match engine.mem_write(buf_addr, &bytes) {
        Ok(()) => ok(0),
        Err(e) => SyscallOutcome::Fatal(e),
    }
}

/// Computes a synthetic `struct sysinfo` but deliberately never writes it
/// to guest memory — no consumer in this corpus ever parses the result,
/// and a zeroed struct would be indistinguishable from one genuinely
/// filled in.
pub fn sysinfo(_process: &mut GuestProcess, _engine: &mut dyn CpuEngine, _args: &[u64; 6]) -> SyscallOutcome {
    ok(0)
}

fn resource_for(resource: u64) -> Option<nix::sys::resource::Resource> {
    use nix::sys::resource::Resource;
    match resource {
        0 => Some(Resource::RLIMIT_CPU),
        1 => Some(Resource::RLIMIT_FSIZE),
        2 => Some(Resource::RLIMIT_DATA),
        3 => Some(Resource::RLIMIT_STACK),
        4 => Some(Resource::RLIMIT_CORE),
        7 => Some(Resource::RLIMIT_NOFILE),
        8 => Some(Resource::RLIMIT_AS),
        _ => None,
    }
}

pub fn ugetrlimit(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [resource, buf_addr, ..] = *args;
    let Some(resource) = resource_for(resource) else {
        return ok(0);
    };
    match nix::sys::resource::getrlimit(resource) {
        Ok((soft, hard)) => {
            let mut bytes = Vec::with_capacity(16);
            bytes.extend_from_slice(&soft.to_le_bytes());
            bytes.extend_from_slice(&hard.to_le_bytes());
            match engine.mem_write(buf_addr, &bytes) {
                Ok(()) => ok(0),
                Err(e) => SyscallOutcome::Fatal(e),
            }
        }
        Err(e) => super::recoverable(emu_core::Errno::from_raw(e as i32).unwrap_or(emu_core::Errno::EINVAL)),
    }
}

pub fn setrlimit(_process: &mut GuestProcess, engine: &mut dyn CpuEngine, args: &[u64; 6]) -> SyscallOutcome {
    let [resource, buf_addr, ..] = *args;
    let Some(resource) = resource_for(resource) else {
        return ok(0);
    };
    let raw = match engine.mem_read(buf_addr, 16) {
        Ok(b) => b,
        Err(e) => return SyscallOutcome::Fatal(e),
    };
    let soft = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let hard = u64::from_le_bytes(raw[8..16].try_into().unwrap());
    match nix::sys::resource::setrlimit(resource, soft, hard) {
        Ok(()) => ok(0),
        Err(e) => super::recoverable(emu_core::Errno::from_raw(e as i32).unwrap_or(emu_core::Errno::EINVAL)),
    }
}
