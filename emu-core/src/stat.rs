//! `stat`/`fstat` struct layouts.
//!
//! The "common" layout is shared by x86, x86-64, ARM and ARM64; MIPS gets
//! its own distinct, padded layout. Both are packed to raw bytes rather
//! than expressed as `#[repr(C)]` structs because the guest's own C
//! library defines the authoritative layout and we only ever need to
//! serialize, never to read one back.

use crate::arch::Arch;

/// Host-side view of a file's metadata, architecture-independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatInfo {
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub ino: u64,
}

impl StatInfo {
    /// Pack into the layout the guest's libc expects for `arch`.
    pub fn pack(&self, arch: Arch) -> Vec<u8> {
        match arch {
            Arch::Mips32El => self.pack_mips(),
            _ => self.pack_common(),
        }
    }

    /// dev(64) pad(64) mode(32) nlink(32) uid(32) gid(32) rdev(64)
    /// (32)=0xffffd257 size(64) blksize(32) blocks(64)=0 atime(64)
    /// mtime(64) ctime(64) ino(64).
    fn pack_common(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(0x60);
        buf.extend_from_slice(&0u64.to_le_bytes()); // dev
        buf.extend_from_slice(&0x0000000300c30000u64.to_le_bytes()); // pad
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.nlink.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&0x8800u64.to_le_bytes()); // rdev
        buf.extend_from_slice(&0xffffd257u32.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&0x400u32.to_le_bytes()); // blksize
        buf.extend_from_slice(&0u64.to_le_bytes()); // blocks
        buf.extend_from_slice(&self.atime.to_le_bytes());
        buf.extend_from_slice(&self.mtime.to_le_bytes());
        buf.extend_from_slice(&self.ctime.to_le_bytes());
        buf.extend_from_slice(&self.ino.to_le_bytes());
        buf
    }

    /// MIPS's distinct 0x90-byte `struct stat` layout.
    fn pack_mips(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 0x90];
        buf[0x00..0x08].copy_from_slice(&0u64.to_le_bytes()); // dev
        buf[0x10..0x14].copy_from_slice(&self.ino.to_le_bytes()[..4]);
        buf[0x18..0x1c].copy_from_slice(&self.mode.to_le_bytes());
        buf[0x1c..0x20].copy_from_slice(&self.nlink.to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&self.uid.to_le_bytes());
        buf[0x24..0x28].copy_from_slice(&self.gid.to_le_bytes());
        buf[0x38..0x40].copy_from_slice(&(self.size as i64).to_le_bytes());
        buf[0x48..0x50].copy_from_slice(&self.atime.to_le_bytes());
        buf[0x58..0x60].copy_from_slice(&self.mtime.to_le_bytes());
        buf[0x68..0x70].copy_from_slice(&self.ctime.to_le_bytes());
        buf[0x70..0x74].copy_from_slice(&0x400u32.to_le_bytes()); // blksize
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_layout_is_fixed_size() {
        let info = StatInfo { size: 42, ..Default::default() };
        assert_eq!(info.pack(Arch::X8664).len(), 0x60);
        assert_eq!(info.pack(Arch::Arm).len(), 0x60);
    }

    #[test]
    fn mips_layout_is_0x90_bytes() {
        let info = StatInfo::default();
        assert_eq!(info.pack(Arch::Mips32El).len(), 0x90);
    }

    #[test]
    fn size_field_round_trips_in_common_layout() {
        let info = StatInfo { size: 0x1234, ..Default::default() };
        let bytes = info.pack(Arch::X8664);
        let size_off = 8 + 8 + 4 + 4 + 4 + 4 + 8 + 4;
        let got = u64::from_le_bytes(bytes[size_off..size_off + 8].try_into().unwrap());
        assert_eq!(got, 0x1234);
    }
}
