//! Guest path sandboxing (rootfs + mount overrides) and the fixed-size
//! file-descriptor table, plus the `File`/`Socket`/`Pipe` variant every
//! slot holds.

pub mod fd_table;
pub mod guest_io;
pub mod path;

pub use fd_table::{FdTable, StdioMode, FD_TABLE_SIZE};
pub use guest_io::{GuestFile, GuestIo, GuestPipe, GuestSockaddr, GuestSocket, AF_INET, AF_INET6, AF_UNIX};
pub use path::{MountOverride, PathSandbox};
