//! TNFS protocol data types and constants.
//!
//! # Protocol
//! TNFS 1.x

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;
use enum_primitive::*;

use crate::error::{errno::*, string};

/// Default TNFS server port
pub const TNFS_PORT: u16 = 16384;

/// Header size: session id[2] sequence[1] opcode[1]
pub const HEADER_SIZE: usize = 4;

/// Largest datagram a TNFS peer has to accept
pub const MAX_PACKET_SIZE: usize = 532;

/// Room left for the opcode specific payload
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Largest data block carried by a single READ or WRITE
pub const MAX_IO_SIZE: usize = 512;

/// Session id meaning "no session"; never sent as an active session
pub const NO_SESSION: u16 = 0;

/// Protocol version, sent and received as minor (LSB), major (MSB)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// The revision this client speaks
    pub const V1_2: Version = Version { major: 1, minor: 2 };

    pub fn as_u16(&self) -> u16 {
        u16::from(self.major) << 8 | u16::from(self.minor)
    }
}

impl From<u16> for Version {
    fn from(v: u16) -> Self {
        Version {
            major: (v >> 8) as u8,
            minor: v as u8,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

enum_from_primitive! {
    #[doc = "Command byte of a TNFS packet"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum Opcode {
        // Session
        Mount       = 0x00,
        Umount      = 0x01,

        // Directories
        OpenDir     = 0x10,
        ReadDir     = 0x11,
        CloseDir    = 0x12,
        MkDir       = 0x13,
        RmDir       = 0x14,

        // Files
        Read        = 0x21,
        Write       = 0x22,
        Close       = 0x23,
        Stat        = 0x24,
        LSeek       = 0x25,
        Unlink      = 0x26,
        Rename      = 0x28,
        Open        = 0x29,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Opcode::Mount => "MOUNT",
            Opcode::Umount => "UMOUNT",
            Opcode::OpenDir => "OPENDIR",
            Opcode::ReadDir => "READDIR",
            Opcode::CloseDir => "CLOSEDIR",
            Opcode::MkDir => "MKDIR",
            Opcode::RmDir => "RMDIR",
            Opcode::Read => "READ",
            Opcode::Write => "WRITE",
            Opcode::Close => "CLOSE",
            Opcode::Stat => "STAT",
            Opcode::LSeek => "LSEEK",
            Opcode::Unlink => "UNLINK",
            Opcode::Rename => "RENAME",
            Opcode::Open => "OPEN",
        };
        f.write_str(name)
    }
}

/// Canonical failure taxonomy shared by every storage backend
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Success,
    PermissionDenied,
    NotFound,
    IoError,
    NoSuchDevice,
    NameTooLong,
    Busy,
    Exists,
    NotADirectory,
    IsADirectory,
    InvalidArgument,
    TableOverflow,
    TooManyOpen,
    TooLarge,
    NoSpace,
    ReadOnlyFs,
    Unimplemented,
    NotEmpty,
    TooManyLinks,
    NoData,
    ProtocolError,
    StaleHandle,
    EndOfFile,
    InvalidHandle,
    Unknown,
}

/// Result byte leading every response payload.
///
/// Kept as the raw byte so codes this client does not know about survive
/// a round trip to the caller untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultCode(pub u8);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0x00);
    pub const NOT_PERMITTED: ResultCode = ResultCode(0x01);
    pub const NOT_FOUND: ResultCode = ResultCode(0x02);
    pub const IO_ERROR: ResultCode = ResultCode(0x03);
    pub const NO_SUCH_DEVICE: ResultCode = ResultCode(0x04);
    pub const LIST_TOO_LONG: ResultCode = ResultCode(0x05);
    pub const BAD_FILENUM: ResultCode = ResultCode(0x06);
    pub const TRY_AGAIN: ResultCode = ResultCode(0x07);
    pub const OUT_OF_MEMORY: ResultCode = ResultCode(0x08);
    pub const ACCESS_DENIED: ResultCode = ResultCode(0x09);
    pub const BUSY: ResultCode = ResultCode(0x0A);
    pub const EXISTS: ResultCode = ResultCode(0x0B);
    pub const NOT_A_DIRECTORY: ResultCode = ResultCode(0x0C);
    pub const IS_A_DIRECTORY: ResultCode = ResultCode(0x0D);
    pub const INVALID_ARGUMENT: ResultCode = ResultCode(0x0E);
    pub const FILE_TABLE_OVERFLOW: ResultCode = ResultCode(0x0F);
    pub const TOO_MANY_OPEN: ResultCode = ResultCode(0x10);
    pub const FILE_TOO_LARGE: ResultCode = ResultCode(0x11);
    pub const NO_SPACE: ResultCode = ResultCode(0x12);
    pub const CANNOT_SEEK_PIPE: ResultCode = ResultCode(0x13);
    pub const READ_ONLY_FS: ResultCode = ResultCode(0x14);
    pub const NAME_TOO_LONG: ResultCode = ResultCode(0x15);
    pub const UNIMPLEMENTED: ResultCode = ResultCode(0x16);
    pub const NOT_EMPTY: ResultCode = ResultCode(0x17);
    pub const TOO_MANY_SYMLINKS: ResultCode = ResultCode(0x18);
    pub const NO_DATA: ResultCode = ResultCode(0x19);
    pub const OUT_OF_STREAMS: ResultCode = ResultCode(0x1A);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(0x1B);
    pub const BAD_FD_STATE: ResultCode = ResultCode(0x1C);
    pub const TOO_MANY_USERS: ResultCode = ResultCode(0x1D);
    pub const OUT_OF_BUFFER_SPACE: ResultCode = ResultCode(0x1E);
    pub const ALREADY_IN_PROGRESS: ResultCode = ResultCode(0x1F);
    pub const STALE_HANDLE: ResultCode = ResultCode(0x20);
    pub const END_OF_FILE: ResultCode = ResultCode(0x21);
    pub const INVALID_HANDLE: ResultCode = ResultCode(0xFF);

    pub fn is_success(&self) -> bool {
        *self == ResultCode::SUCCESS
    }

    /// Map the wire byte to the canonical category
    pub fn category(&self) -> Category {
        match self.0 {
            0x00 => Category::Success,
            0x01 | 0x09 => Category::PermissionDenied,
            0x02 => Category::NotFound,
            0x03 | 0x08 => Category::IoError,
            0x04 => Category::NoSuchDevice,
            0x15 => Category::NameTooLong,
            0x07 | 0x0A | 0x1F => Category::Busy,
            0x0B => Category::Exists,
            0x0C => Category::NotADirectory,
            0x0D => Category::IsADirectory,
            0x05 | 0x0E | 0x13 => Category::InvalidArgument,
            0x0F => Category::TableOverflow,
            0x10 | 0x1D => Category::TooManyOpen,
            0x11 => Category::TooLarge,
            0x12 | 0x1E => Category::NoSpace,
            0x14 => Category::ReadOnlyFs,
            0x16 => Category::Unimplemented,
            0x17 => Category::NotEmpty,
            0x18 => Category::TooManyLinks,
            0x19 | 0x1A => Category::NoData,
            0x1B => Category::ProtocolError,
            0x20 => Category::StaleHandle,
            0x21 => Category::EndOfFile,
            0x06 | 0x1C | 0xFF => Category::InvalidHandle,
            _ => Category::Unknown,
        }
    }

    /// POSIX errno the code was numbered after
    pub fn errno(&self) -> nix::errno::Errno {
        match self.0 {
            0x01 => EPERM,
            0x02 => ENOENT,
            0x03 => EIO,
            0x04 => ENXIO,
            0x05 => E2BIG,
            0x06 => EBADF,
            0x07 => EAGAIN,
            0x08 => ENOMEM,
            0x09 => EACCES,
            0x0A => EBUSY,
            0x0B => EEXIST,
            0x0C => ENOTDIR,
            0x0D => EISDIR,
            0x0E => EINVAL,
            0x0F => ENFILE,
            0x10 => EMFILE,
            0x11 => EFBIG,
            0x12 => ENOSPC,
            0x13 => ESPIPE,
            0x14 => EROFS,
            0x15 => ENAMETOOLONG,
            0x16 => ENOSYS,
            0x17 => ENOTEMPTY,
            0x18 => ELOOP,
            0x19 => ENODATA,
            0x1A => ENOSTR,
            0x1B => EPROTO,
            0x1C => EBADFD,
            0x1D => EUSERS,
            0x1E => ENOBUFS,
            0x1F => EALREADY,
            0x20 => ESTALE,
            0xFF => EBADF,
            _ => UnknownErrno,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            0x00 => string::SUCCESS,
            0x01 => string::EPERM,
            0x02 => string::ENOENT,
            0x03 => string::EIO,
            0x04 => string::ENXIO,
            0x05 => string::E2BIG,
            0x06 => string::EBADF,
            0x07 => string::EAGAIN,
            0x08 => string::ENOMEM,
            0x09 => string::EACCES,
            0x0A => string::EBUSY,
            0x0B => string::EEXIST,
            0x0C => string::ENOTDIR,
            0x0D => string::EISDIR,
            0x0E => string::EINVAL,
            0x0F => string::ENFILE,
            0x10 => string::EMFILE,
            0x11 => string::EFBIG,
            0x12 => string::ENOSPC,
            0x13 => string::ESPIPE,
            0x14 => string::EROFS,
            0x15 => string::ENAMETOOLONG,
            0x16 => string::ENOSYS,
            0x17 => string::ENOTEMPTY,
            0x18 => string::ELOOP,
            0x19 => string::ENODATA,
            0x1A => string::ENOSTR,
            0x1B => string::EPROTO,
            0x1C => string::EBADFD,
            0x1D => string::EUSERS,
            0x1E => string::ENOBUFS,
            0x1F => string::EALREADY,
            0x20 => string::ESTALE,
            0x21 => string::EOF,
            0xFF => string::INVALID_HANDLE,
            _ => string::UNKNOWN,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.description())
    }
}

bitflags! {
    /// File mode bits in a STAT response, POSIX layout
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FileMode: u16 {
        #[doc = "Mask of the file type bits"]
        const S_IFMT    = 0o170000;
        const S_IFSOCK  = 0o140000;
        const S_IFLNK   = 0o120000;
        const S_IFREG   = 0o100000;
        const S_IFBLK   = 0o060000;
        const S_IFDIR   = 0o040000;
        const S_IFCHR   = 0o020000;
        const S_IFIFO   = 0o010000;

        const S_ISUID   = 0o004000;
        const S_ISGID   = 0o002000;
        const S_ISVTX   = 0o001000;
        const S_IRWXU   = 0o000700;
        const S_IRUSR   = 0o000400;
        const S_IWUSR   = 0o000200;
        const S_IXUSR   = 0o000100;
        const S_IRWXG   = 0o000070;
        const S_IRGRP   = 0o000040;
        const S_IWGRP   = 0o000020;
        const S_IXGRP   = 0o000010;
        const S_IRWXO   = 0o000007;
        const S_IROTH   = 0o000004;
        const S_IWOTH   = 0o000002;
        const S_IXOTH   = 0o000001;
    }
}

impl FileMode {
    fn file_type(&self) -> u16 {
        self.bits() & FileMode::S_IFMT.bits()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileMode::S_IFDIR.bits()
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileMode::S_IFREG.bits()
    }
}

bitflags! {
    /// Flags of an OPEN request
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct OpenFlags: u16 {
        const RDONLY    = 0x0001;
        const WRONLY    = 0x0002;
        const RDWR      = 0x0003;
        const APPEND    = 0x0008;
        const CREAT     = 0x0100;
        const TRUNC     = 0x0200;
        const EXCL      = 0x0400;
    }
}

impl OpenFlags {
    /// Flags to reopen a file after a session loss without touching its contents
    pub fn for_reopen(&self) -> OpenFlags {
        *self - (OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::EXCL)
    }
}

enum_from_primitive! {
    #[doc = "Reference point of an LSEEK"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Whence {
        Set = 0,
        Cur = 1,
        End = 2,
    }
}

/// Decoded STAT response.
///
/// Fields a server does not track are sent as zero. The name strings are
/// optional trailers only some servers send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: FileMode,
    pub uid: u16,
    pub gid: u16,
    /// File length in bytes
    pub size: u32,
    /// Last access, seconds since the epoch
    pub atime: u32,
    /// Last modification, seconds since the epoch
    pub mtime: u32,
    /// Last status change, seconds since the epoch
    pub ctime: u32,
    pub uid_name: Option<String>,
    pub gid_name: Option<String>,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

/// Successful MOUNT response
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MountReply {
    pub session: u16,
    pub version: Version,
    /// Minimum spacing the server wants between retries
    pub min_retry_ms: u16,
}

/// Fixed packet header
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub session: u16,
    pub sequence: u8,
    pub opcode: Opcode,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:04x} {:02x} {:02x}] {}",
            self.session, self.sequence, self.opcode as u8, self.opcode
        )
    }
}

/// A datagram as it travels on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} len {}:", self.header, self.payload.len())?;
        for b in self.payload.iter() {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

/// Typed TNFS requests
///
/// Paths are expected to be normalized already (see [`crate::utils::normalize_path`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Mount {
        version: Version,
        path: String,
        user: String,
        password: String,
    },
    Umount,
    OpenDir {
        path: String,
    },
    ReadDir {
        handle: u8,
    },
    CloseDir {
        handle: u8,
    },
    MkDir {
        path: String,
    },
    RmDir {
        path: String,
    },
    Stat {
        path: String,
    },
    Open {
        flags: OpenFlags,
        mode: FileMode,
        path: String,
    },
    Read {
        handle: u8,
        count: u16,
    },
    Write {
        handle: u8,
        data: Bytes,
    },
    Close {
        handle: u8,
    },
    LSeek {
        handle: u8,
        whence: Whence,
        offset: i32,
    },
    Unlink {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

impl<'a> From<&'a Request> for Opcode {
    fn from(request: &'a Request) -> Opcode {
        match *request {
            Request::Mount { .. } => Opcode::Mount,
            Request::Umount => Opcode::Umount,
            Request::OpenDir { .. } => Opcode::OpenDir,
            Request::ReadDir { .. } => Opcode::ReadDir,
            Request::CloseDir { .. } => Opcode::CloseDir,
            Request::MkDir { .. } => Opcode::MkDir,
            Request::RmDir { .. } => Opcode::RmDir,
            Request::Stat { .. } => Opcode::Stat,
            Request::Open { .. } => Opcode::Open,
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::Close { .. } => Opcode::Close,
            Request::LSeek { .. } => Opcode::LSeek,
            Request::Unlink { .. } => Opcode::Unlink,
            Request::Rename { .. } => Opcode::Rename,
        }
    }
}

impl Request {
    /// The handle this request operates on, if any
    pub fn handle(&self) -> Option<u8> {
        match *self {
            Request::ReadDir { handle }
            | Request::CloseDir { handle }
            | Request::Read { handle, .. }
            | Request::Write { handle, .. }
            | Request::Close { handle }
            | Request::LSeek { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// A response accepted by the transaction engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub header: Header,
    pub code: ResultCode,
    /// Payload following the result code
    pub body: Bytes,
}

impl Reply {
    /// Turn a non-success code into a protocol error
    pub fn check(self) -> crate::Result<Reply> {
        if self.code.is_success() {
            Ok(self)
        } else {
            Err(crate::Error::Tnfs(self.code))
        }
    }
}
