//! POSIX errno taxonomy.
//!
//! Only the sign of a syscall's return value crosses into the guest: any
//! failure is `-1` (plus the MIPS A3 flag, see [`crate::mips_error_flag`]).
//! `Errno` exists so handlers, logs and tests can reason about *which*
//! failure occurred without inventing a kernel-version-exact numbering.

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EINTR = 4,
    EIO = 5,
    ENXIO = 6,
    E2BIG = 7,
    EBADF = 9,
    ECHILD = 10,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EBUSY = 16,
    EEXIST = 17,
    EXDEV = 18,
    ENODEV = 19,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    ENFILE = 23,
    EMFILE = 24,
    ENOTTY = 25,
    EFBIG = 27,
    ENOSPC = 28,
    ESPIPE = 29,
    EROFS = 30,
    EMLINK = 31,
    EPIPE = 32,
    ERANGE = 34,
    ENAMETOOLONG = 36,
    ENOSYS = 38,
    ENOTEMPTY = 39,
    ELOOP = 40,
    ENOTSOCK = 88,
    EOPNOTSUPP = 95,
    EADDRINUSE = 98,
    ECONNREFUSED = 111,
}

impl Errno {
    /// Canonical description, independent of the host's own strerror table.
    pub fn describe(self) -> &'static str {
        match self {
            Errno::EPERM => "operation not permitted",
            Errno::ENOENT => "no such file or directory",
            Errno::ESRCH => "no such process",
            Errno::EINTR => "interrupted system call",
            Errno::EIO => "I/O error",
            Errno::ENXIO => "no such device or address",
            Errno::E2BIG => "argument list too long",
            Errno::EBADF => "bad file descriptor",
            Errno::ECHILD => "no child processes",
            Errno::EAGAIN => "resource temporarily unavailable",
            Errno::ENOMEM => "cannot allocate memory",
            Errno::EACCES => "permission denied",
            Errno::EFAULT => "bad address",
            Errno::EBUSY => "device or resource busy",
            Errno::EEXIST => "file exists",
            Errno::EXDEV => "invalid cross-device link",
            Errno::ENODEV => "no such device",
            Errno::ENOTDIR => "not a directory",
            Errno::EISDIR => "is a directory",
            Errno::EINVAL => "invalid argument",
            Errno::ENFILE => "too many open files in system",
            Errno::EMFILE => "too many open files",
            Errno::ENOTTY => "inappropriate ioctl for device",
            Errno::EFBIG => "file too large",
            Errno::ENOSPC => "no space left on device",
            Errno::ESPIPE => "illegal seek",
            Errno::EROFS => "read-only file system",
            Errno::EMLINK => "too many links",
            Errno::EPIPE => "broken pipe",
            Errno::ERANGE => "numerical result out of range",
            Errno::ENAMETOOLONG => "file name too long",
            Errno::ENOSYS => "function not implemented",
            Errno::ENOTEMPTY => "directory not empty",
            Errno::ELOOP => "too many levels of symbolic links",
            Errno::ENOTSOCK => "socket operation on non-socket",
            Errno::EOPNOTSUPP => "operation not supported",
            Errno::EADDRINUSE => "address already in use",
            Errno::ECONNREFUSED => "connection refused",
        }
    }

    /// The only value that ever reaches the guest: -1.
    ///
    /// Kept as a method (rather than a bare literal at call sites) so the
    /// "every failure is -1" contract has one place to read.
    pub const fn to_guest_value(self) -> i64 {
        -1
    }

    /// Map a host [`std::io::Error`] to the closest `Errno`.
    pub fn from_io_error(err: &std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Errno::ENOENT,
            PermissionDenied => Errno::EACCES,
            AlreadyExists => Errno::EEXIST,
            InvalidInput | InvalidData => Errno::EINVAL,
            WouldBlock => Errno::EAGAIN,
            Interrupted => Errno::EINTR,
            _ => err
                .raw_os_error()
                .and_then(Errno::from_raw)
                .unwrap_or(Errno::EIO),
        }
    }

    /// Best-effort mapping from a raw host errno value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Errno::EPERM,
            2 => Errno::ENOENT,
            3 => Errno::ESRCH,
            4 => Errno::EINTR,
            5 => Errno::EIO,
            6 => Errno::ENXIO,
            7 => Errno::E2BIG,
            9 => Errno::EBADF,
            10 => Errno::ECHILD,
            11 => Errno::EAGAIN,
            12 => Errno::ENOMEM,
            13 => Errno::EACCES,
            14 => Errno::EFAULT,
            16 => Errno::EBUSY,
            17 => Errno::EEXIST,
            18 => Errno::EXDEV,
            19 => Errno::ENODEV,
            20 => Errno::ENOTDIR,
            21 => Errno::EISDIR,
            22 => Errno::EINVAL,
            23 => Errno::ENFILE,
            24 => Errno::EMFILE,
            25 => Errno::ENOTTY,
            27 => Errno::EFBIG,
            28 => Errno::ENOSPC,
            29 => Errno::ESPIPE,
            30 => Errno::EROFS,
            31 => Errno::EMLINK,
            32 => Errno::EPIPE,
            34 => Errno::ERANGE,
            36 => Errno::ENAMETOOLONG,
            38 => Errno::ENOSYS,
            39 => Errno::ENOTEMPTY,
            40 => Errno::ELOOP,
            88 => Errno::ENOTSOCK,
            95 => Errno::EOPNOTSUPP,
            98 => Errno::EADDRINUSE,
            111 => Errno::ECONNREFUSED,
            _ => return None,
        })
    }
}

/// MIPS A3 error-indicator register: set whenever the return value is -1,
/// or, oddly, exactly 2 (preserved rather than "fixed").
pub fn mips_error_flag(value: i64) -> u32 {
    if value == -1 || value == 2 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_guest_value_is_always_negative_one() {
        assert_eq!(Errno::ENOENT.to_guest_value(), -1);
        assert_eq!(Errno::EACCES.to_guest_value(), -1);
    }

    #[test]
    fn from_raw_round_trips_through_discriminant() {
        assert_eq!(Errno::from_raw(2), Some(Errno::ENOENT));
        assert_eq!(Errno::from_raw(111), Some(Errno::ECONNREFUSED));
        assert_eq!(Errno::from_raw(9999), None);
    }

    #[test]
    fn from_io_error_maps_kind_before_raw_os_error() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(Errno::from_io_error(&err), Errno::ENOENT);
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(Errno::from_io_error(&err), Errno::EACCES);
    }

    #[test]
    fn describe_is_nonempty_for_every_variant() {
        assert_eq!(Errno::EBADF.describe(), "bad file descriptor");
        assert_eq!(Errno::ENOSYS.describe(), "function not implemented");
    }

    #[test]
    fn mips_error_flag_set_on_failure_and_the_quirky_two() {
        assert_eq!(mips_error_flag(-1), 1);
        assert_eq!(mips_error_flag(2), 1);
        assert_eq!(mips_error_flag(0), 0);
        assert_eq!(mips_error_flag(200), 0);
    }
}
