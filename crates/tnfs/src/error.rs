//! TNFS client error representations.
//!
//! Failures come from two layers. A *protocol* failure means the server
//! answered with a non-zero result code, which is reported verbatim as
//! [`Error::Tnfs`]. A *transport* failure means no acceptable response
//! arrived after every retry ([`Error::NoResponse`]); the caller cannot
//! tell whether the request or its answer was lost, so no server-side state
//! change is guaranteed.
//!
//! Every error converts to a POSIX errno, mirroring the numbering the TNFS
//! result codes were modelled on.

use crate::error::errno::*;
use crate::fcall::{Category, ResultCode};
use std::error as stderror;
use std::io::ErrorKind::*;
use std::{fmt, io};

fn errno_from_ioerror(e: &io::Error) -> nix::errno::Errno {
    e.raw_os_error()
        .map(nix::errno::Errno::from_raw)
        .unwrap_or(match e.kind() {
            NotFound => ENOENT,
            PermissionDenied => EPERM,
            ConnectionRefused => ECONNREFUSED,
            ConnectionReset => ECONNRESET,
            ConnectionAborted => ECONNABORTED,
            NotConnected => ENOTCONN,
            AddrInUse => EADDRINUSE,
            AddrNotAvailable => EADDRNOTAVAIL,
            BrokenPipe => EPIPE,
            AlreadyExists => EEXIST,
            WouldBlock => EAGAIN,
            InvalidInput => EINVAL,
            InvalidData => EINVAL,
            TimedOut => ETIMEDOUT,
            WriteZero => EAGAIN,
            Interrupted => EINTR,
            _ => EIO,
        })
}

/// TNFS client error type which is convertible to an errno.
#[derive(Debug)]
pub enum Error {
    /// The server answered with a non-success result code.
    Tnfs(ResultCode),
    /// No acceptable response arrived after `attempts` transmissions.
    NoResponse { attempts: u32 },
    /// The operation needs an active session.
    NotMounted,
    /// The encoded request does not fit into a single packet.
    NameTooLong { len: usize, max: usize },
    /// No local handle is open for the requested operation.
    BadHandle,
    /// The backend does not implement the requested operation.
    Unsupported,
    /// A response payload is shorter than its opcode's layout.
    Malformed(&'static str),
    /// I/O error.
    Io(io::Error),
}

impl Error {
    /// Get an errno representation.
    pub fn errno(&self) -> nix::errno::Errno {
        match *self {
            Error::Tnfs(code) => code.errno(),
            Error::NoResponse { .. } => ETIMEDOUT,
            Error::NotMounted => ENOTCONN,
            Error::NameTooLong { .. } => ENAMETOOLONG,
            Error::BadHandle => EBADF,
            Error::Unsupported => EOPNOTSUPP,
            Error::Malformed(_) => EPROTO,
            Error::Io(ref e) => errno_from_ioerror(e),
        }
    }

    /// The server's result code, for protocol-level failures.
    pub fn result_code(&self) -> Option<ResultCode> {
        match *self {
            Error::Tnfs(code) => Some(code),
            _ => None,
        }
    }

    /// Canonical category of this failure.
    pub fn category(&self) -> Category {
        match *self {
            Error::Tnfs(code) => code.category(),
            Error::NoResponse { .. } | Error::Io(_) => Category::IoError,
            Error::NotMounted => Category::NoSuchDevice,
            Error::NameTooLong { .. } => Category::NameTooLong,
            Error::BadHandle => Category::InvalidHandle,
            Error::Unsupported => Category::Unimplemented,
            Error::Malformed(_) => Category::ProtocolError,
        }
    }

    /// Whether the server no longer recognises a handle, which is how a lost
    /// session shows up.
    pub fn is_session_loss(&self) -> bool {
        matches!(
            self.category(),
            Category::StaleHandle | Category::InvalidHandle
        ) && self.result_code().is_some()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Tnfs(code) => write!(f, "TNFS error {:#04x}: {}", code.0, code.description()),
            Error::NoResponse { attempts } => {
                write!(f, "No response from server after {} attempts", attempts)
            }
            Error::NotMounted => write!(f, "No active TNFS session"),
            Error::NameTooLong { len, max } => {
                write!(f, "Request of {} bytes exceeds the {} byte payload", len, max)
            }
            Error::BadHandle => write!(f, "No open handle"),
            Error::Unsupported => write!(f, "Operation not supported"),
            Error::Malformed(what) => write!(f, "Malformed response: {}", what),
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl stderror::Error for Error {
    fn source(&self) -> Option<&(dyn stderror::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ResultCode> for Error {
    fn from(code: ResultCode) -> Self {
        Error::Tnfs(code)
    }
}

/// The system errno definitions.
pub mod errno {
    pub use nix::errno::Errno::*;
}

/// Human readable TNFS result code descriptions.
pub mod string {
    pub const SUCCESS: &str = "Success";
    pub const EPERM: &str = "Operation not permitted";
    pub const ENOENT: &str = "No such file or directory";
    pub const EIO: &str = "I/O error";
    pub const ENXIO: &str = "No such device or address";
    pub const E2BIG: &str = "Argument list too long";
    pub const EBADF: &str = "Bad file number";
    pub const EAGAIN: &str = "Try again";
    pub const ENOMEM: &str = "Out of memory";
    pub const EACCES: &str = "Permission denied";
    pub const EBUSY: &str = "Device or resource busy";
    pub const EEXIST: &str = "File exists";
    pub const ENOTDIR: &str = "Is not a directory";
    pub const EISDIR: &str = "Is a directory";
    pub const EINVAL: &str = "Invalid argument";
    pub const ENFILE: &str = "File table overflow";
    pub const EMFILE: &str = "Too many open files";
    pub const EFBIG: &str = "File too large";
    pub const ENOSPC: &str = "No space left on device";
    pub const ESPIPE: &str = "Attempt to seek on a FIFO or pipe";
    pub const EROFS: &str = "Read only filesystem";
    pub const ENAMETOOLONG: &str = "Filename too long";
    pub const ENOSYS: &str = "Function not implemented";
    pub const ENOTEMPTY: &str = "Directory not empty";
    pub const ELOOP: &str = "Too many symbolic links";
    pub const ENODATA: &str = "No data available";
    pub const ENOSTR: &str = "Out of streams resources";
    pub const EPROTO: &str = "Protocol error";
    pub const EBADFD: &str = "File descriptor in bad state";
    pub const EUSERS: &str = "Too many users";
    pub const ENOBUFS: &str = "No buffer space available";
    pub const EALREADY: &str = "Operation already in progress";
    pub const ESTALE: &str = "Stale TNFS handle";
    pub const EOF: &str = "End of file";
    pub const INVALID_HANDLE: &str = "Invalid TNFS handle";
    pub const UNKNOWN: &str = "Unknown result code";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_keep_their_code() {
        let e = Error::Tnfs(ResultCode::EXISTS);
        assert_eq!(e.result_code(), Some(ResultCode::EXISTS));
        assert_eq!(e.category(), Category::Exists);
        assert_eq!(e.errno(), EEXIST);
        assert!(!e.is_session_loss());
    }

    #[test]
    fn transport_errors_have_no_code() {
        let e = Error::NoResponse { attempts: 5 };
        assert_eq!(e.result_code(), None);
        assert_eq!(e.errno(), ETIMEDOUT);
        assert_eq!(e.to_string(), "No response from server after 5 attempts");
    }

    #[test]
    fn stale_handles_signal_session_loss() {
        assert!(Error::Tnfs(ResultCode::STALE_HANDLE).is_session_loss());
        assert!(Error::Tnfs(ResultCode::INVALID_HANDLE).is_session_loss());
        assert!(!Error::BadHandle.is_session_loss());
    }

    #[test]
    fn io_errors_map_by_kind() {
        let e = Error::from(crate::io_err!(TimedOut, "late"));
        assert_eq!(e.errno(), ETIMEDOUT);
    }
}
