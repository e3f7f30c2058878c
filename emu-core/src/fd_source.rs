//! Narrow seam between `MemorySpace::mmap` and the file-descriptor table
//! it needs to read from for file-backed mappings, without making the
//! memory crate depend on the whole VFS crate.

use crate::error::EmuResult;

pub trait FdSource {
    /// Seek `fd` to `offset` and read up to `len` bytes; short reads are
    /// zero-padded by the caller (mmap always zero-fills first).
    fn read_at(&mut self, fd: i32, offset: u64, len: usize) -> EmuResult<Vec<u8>>;
}
