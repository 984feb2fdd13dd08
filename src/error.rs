//! Error taxonomy shared by every core component (spec §7).

use std::fmt;
use std::io;

/// Abstract error kinds produced by the union filesystem core.
///
/// Each variant maps to a POSIX errno at the boundary via [`Error::errno`];
/// frontends (FUSE, NFS, ...) translate from there into whatever wire
/// representation they speak.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Logical path does not resolve (including whiteout-hidden entries).
    NotFound,
    /// A non-whited-out entry already exists at a create target.
    AlreadyExists,
    /// A derived concrete path exceeds the platform path limit.
    NameTooLong,
    /// Malformed logical path, or reserved-name (`.me.`/`.wh.`) misuse.
    InvalidPath,
    /// `rmdir` was attempted on a directory with surviving merged entries.
    NotEmpty,
    /// Credential check failed (delegated to the host).
    PermissionDenied,
    /// Transient allocation failure.
    OutOfMemory,
    /// Operation requires same-branch semantics but inputs straddle branches.
    CrossBranch,
    /// Any lower-level failure surfaced as a POSIX errno.
    Io(IoKind),
}

/// A narrowed, `Copy`-friendly mirror of [`io::ErrorKind`].
///
/// `io::Error` itself is not `Copy`/`Eq`, which the core's `Result`-returning
/// pure functions want; sub-steps convert at the `HostFs` boundary and carry
/// only the classification forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    StorageFull,
    ReadOnlyFilesystem,
    Other,
}

impl From<io::ErrorKind> for IoKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => IoKind::NotFound,
            io::ErrorKind::PermissionDenied => IoKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => IoKind::AlreadyExists,
            #[allow(unreachable_patterns)]
            _ => IoKind::Other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => Error::NotFound,
            PermissionDenied => Error::PermissionDenied,
            AlreadyExists => Error::AlreadyExists,
            _ => match raw_os_error_kind(&err) {
                Some(IoKind::NotADirectory) => Error::Io(IoKind::NotADirectory),
                Some(IoKind::IsADirectory) => Error::Io(IoKind::IsADirectory),
                Some(IoKind::StorageFull) => Error::OutOfMemory,
                Some(IoKind::ReadOnlyFilesystem) => Error::Io(IoKind::ReadOnlyFilesystem),
                _ => Error::Io(IoKind::Other),
            },
        }
    }
}

#[cfg(unix)]
fn raw_os_error_kind(err: &io::Error) -> Option<IoKind> {
    match err.raw_os_error()? {
        libc::ENOTDIR => Some(IoKind::NotADirectory),
        libc::EISDIR => Some(IoKind::IsADirectory),
        libc::ENOSPC => Some(IoKind::StorageFull),
        libc::EROFS => Some(IoKind::ReadOnlyFilesystem),
        _ => None,
    }
}

#[cfg(not(unix))]
fn raw_os_error_kind(_err: &io::Error) -> Option<IoKind> {
    None
}

impl Error {
    /// Map the abstract kind to the closest POSIX errno, negated per the
    /// filesystem-operation return convention of spec §6.
    pub fn errno(&self) -> i32 {
        #[cfg(unix)]
        let code = match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::InvalidPath => libc::EINVAL,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::PermissionDenied => libc::EACCES,
            Error::OutOfMemory => libc::ENOSPC,
            Error::CrossBranch => libc::EXDEV,
            Error::Io(IoKind::NotADirectory) => libc::ENOTDIR,
            Error::Io(IoKind::IsADirectory) => libc::EISDIR,
            Error::Io(IoKind::ReadOnlyFilesystem) => libc::EROFS,
            Error::Io(_) => libc::EIO,
        };
        #[cfg(not(unix))]
        let code: i32 = 5; // generic I/O error number on non-unix targets
        -code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "no such file or directory"),
            Error::AlreadyExists => write!(f, "entry already exists"),
            Error::NameTooLong => write!(f, "name too long"),
            Error::InvalidPath => write!(f, "invalid path"),
            Error::NotEmpty => write!(f, "directory not empty"),
            Error::PermissionDenied => write!(f, "permission denied"),
            Error::OutOfMemory => write!(f, "out of memory or quota"),
            Error::CrossBranch => write!(f, "operation straddles branches"),
            Error::Io(kind) => write!(f, "I/O error: {kind:?}"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
