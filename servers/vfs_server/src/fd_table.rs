//! Fixed-size table of open file/socket/pipe objects owned by the guest
//! process. Lowest-empty-index allocation, 256 slots, descriptors 0/1/2
//! preallocated to stdio.

use crate::guest_io::{GuestFile, GuestIo};
use emu_core::{Errno, FdSource};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};

pub const FD_TABLE_SIZE: usize = 256;

pub struct FdTable {
    slots: Vec<Option<GuestIo>>,
}

/// Whether stdio should be real host streams or in-memory buffers, per
/// the CLI/embedding surface's `{libcache, output, ...}` options (§6):
/// a host embedder can assign stdio to host tty handles or byte buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdioMode {
    Host,
    Buffered,
}

impl Default for StdioMode {
    fn default() -> Self {
        StdioMode::Host
    }
}

impl FdTable {
    pub fn new(stdio: StdioMode) -> Self {
        let mut slots: Vec<Option<GuestIo>> = (0..FD_TABLE_SIZE).map(|_| None).collect();
        match stdio {
            StdioMode::Host => {
                slots[0] = Some(GuestIo::File(GuestFile::stdin()));
                slots[1] = Some(GuestIo::File(GuestFile::stdout()));
                slots[2] = Some(GuestIo::File(GuestFile::stderr()));
            }
            StdioMode::Buffered => {
                slots[0] = Some(GuestIo::File(GuestFile::buffer("/dev/stdin")));
                slots[1] = Some(GuestIo::File(GuestFile::buffer("/dev/stdout")));
                slots[2] = Some(GuestIo::File(GuestFile::buffer("/dev/stderr")));
            }
        }
        Self { slots }
    }

    /// Invariant 2: `open` always allocates the lowest empty slot.
    pub fn alloc_lowest(&mut self, io: GuestIo) -> Option<i32> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(io);
        Some(idx as i32)
    }

    /// Install `io` at an exact slot, closing whatever was there first
    /// (the shape `dup2`/`dup3` need).
    pub fn install_at(&mut self, fd: i32, io: GuestIo) -> bool {
        let Some(slot) = self.slot_mut(fd) else { return false };
        *slot = Some(io);
        true
    }

    fn slot_mut(&mut self, fd: i32) -> Option<&mut Option<GuestIo>> {
        if fd < 0 {
            return None;
        }
        self.slots.get_mut(fd as usize)
    }

    pub fn get(&self, fd: i32) -> Option<&GuestIo> {
        if fd < 0 {
            return None;
        }
        self.slots.get(fd as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, fd: i32) -> Option<&mut GuestIo> {
        if fd < 0 {
            return None;
        }
        self.slots.get_mut(fd as usize).and_then(|s| s.as_mut())
    }

    /// Invariant 1: after `close`, the slot is empty.
    pub fn close(&mut self, fd: i32) -> bool {
        match self.slot_mut(fd) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn dup(&mut self, fd: i32) -> Result<i32, Errno> {
        let dup = self.get(fd).ok_or(Errno::EBADF)?.dup()?;
        self.alloc_lowest(dup).ok_or(Errno::EMFILE)
    }

    pub fn dup_to(&mut self, old_fd: i32, new_fd: i32) -> Result<i32, Errno> {
        if old_fd == new_fd {
            return if self.get(old_fd).is_some() { Ok(new_fd) } else { Err(Errno::EBADF) };
        }
        let dup = self.get(old_fd).ok_or(Errno::EBADF)?.dup()?;
        if !self.install_at(new_fd, dup) {
            return Err(Errno::EBADF);
        }
        Ok(new_fd)
    }

    pub fn is_open(&self, fd: i32) -> bool {
        self.get(fd).is_some()
    }
}

/// Feeds `MemorySpace::mmap`'s file-backed path without the memory crate
/// needing to know anything about `GuestIo`.
impl FdSource for FdTable {
    fn read_at(&mut self, fd: i32, offset: u64, len: usize) -> emu_core::EmuResult<Vec<u8>> {
        let Some(GuestIo::File(file)) = self.get_mut(fd) else {
            return Ok(Vec::new());
        };
        if let Some(raw_fd) = file.raw_fd() {
            use std::os::fd::FromRawFd;
            let mut dup = unsafe { std::fs::File::from_raw_fd(nix::unistd::dup(raw_fd).map_err(|_| Errno::EBADF)?) };
            dup.seek(SeekFrom::Start(offset)).map_err(|e| emu_core::EmuError::from(e))?;
            let mut buf = vec![0u8; len];
            let got = dup.read(&mut buf).unwrap_or(0);
            buf.truncate(got);
            Ok(buf)
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest_io::GuestFile;

    #[test]
    fn alloc_picks_lowest_free_index() {
        let mut table = FdTable::new(StdioMode::Buffered);
        let a = table.alloc_lowest(GuestIo::File(GuestFile::buffer("/a"))).unwrap();
        assert_eq!(a, 3);
        table.close(a);
        let b = table.alloc_lowest(GuestIo::File(GuestFile::buffer("/b"))).unwrap();
        assert_eq!(b, 3);
    }

    #[test]
    fn close_empties_the_slot() {
        let mut table = FdTable::new(StdioMode::Buffered);
        let fd = table.alloc_lowest(GuestIo::File(GuestFile::buffer("/a"))).unwrap();
        assert!(table.is_open(fd));
        assert!(table.close(fd));
        assert!(!table.is_open(fd));
    }

    #[test]
    fn dup2_closes_destination_first() {
        let mut table = FdTable::new(StdioMode::Buffered);
        let src = table.alloc_lowest(GuestIo::File(GuestFile::buffer("/src"))).unwrap();
        let dst = table.alloc_lowest(GuestIo::File(GuestFile::buffer("/dst"))).unwrap();
        table.dup_to(src, dst).unwrap();
        assert!(table.is_open(dst));
    }

    #[test]
    fn stdio_preallocates_slots_zero_through_two() {
        let table = FdTable::new(StdioMode::Buffered);
        assert!(table.is_open(0));
        assert!(table.is_open(1));
        assert!(table.is_open(2));
    }
}
