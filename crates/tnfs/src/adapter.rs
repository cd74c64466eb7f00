//! Storage backend interface consumed by the device layer.
//!
//! A device talks to remote storage only through [`Protocol`]: open a
//! [`Target`], stream bytes with `read`/`write`, poll `status`, and issue
//! special commands after asking `special_inquiry` which way their payload
//! flows. TNFS is one backend ([`crate::tnfs_adapter::TnfsProtocol`]); others
//! only have to implement the same trait.

use {
    crate::{
        error::Error,
        fcall::Category,
        io_err,
        utils::{Result, parse_url},
    },
    async_trait::async_trait,
    bytes::Bytes,
    enum_primitive::*,
    std::{fmt, str::FromStr},
};

/// Parsed `scheme://host[:port]/path` target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Always starts with `/`
    pub path: String,
}

impl Target {
    pub fn parse(url: &str) -> Result<Target> {
        match parse_url(url) {
            Some((scheme, host, port, path)) => Ok(Target {
                scheme: scheme.to_ascii_lowercase(),
                host: host.to_owned(),
                port,
                path: path.to_owned(),
            }),
            None => Err(io_err!(InvalidInput, format!("malformed target {:?}", url)).into()),
        }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// A trailing separator names a directory
    pub fn names_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Target> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&self.path)
    }
}

enum_from_primitive! {
    #[doc = "Open mode, numbered like the device layer's aux1 byte"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub enum OpenMode {
        Read        = 4,
        Directory   = 6,
        Write       = 8,
        Append      = 9,
        ReadWrite   = 12,
    }
}

impl OpenMode {
    pub fn writes(&self) -> bool {
        matches!(*self, OpenMode::Write | OpenMode::Append | OpenMode::ReadWrite)
    }
}

enum_from_primitive! {
    #[doc = "Payload direction of a special command"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub enum SpecialDirection {
        NoPayload   = 0x00,
        ToCaller    = 0x40,
        FromCaller  = 0x80,
        Unsupported = 0xFF,
    }
}

/// Device level status codes
pub mod status {
    pub const SUCCESS: u8 = 1;
    pub const TIMEOUT: u8 = 138;
    pub const END_OF_FILE: u8 = 136;
    pub const GENERAL: u8 = 144;
    pub const NOT_IMPLEMENTED: u8 = 146;
    pub const FILE_EXISTS: u8 = 151;
    pub const NO_SPACE: u8 = 162;
    pub const ACCESS_DENIED: u8 = 167;
    pub const FILE_NOT_FOUND: u8 = 170;
    pub const NOT_CONNECTED: u8 = 207;
}

/// Collapse an error to the status byte a device reports.
pub fn status_code(err: &Error) -> u8 {
    match *err {
        Error::NoResponse { .. } => status::TIMEOUT,
        Error::NotMounted => status::NOT_CONNECTED,
        _ => match err.category() {
            Category::Success => status::SUCCESS,
            Category::EndOfFile => status::END_OF_FILE,
            Category::Unimplemented => status::NOT_IMPLEMENTED,
            Category::Exists => status::FILE_EXISTS,
            Category::NoSpace => status::NO_SPACE,
            Category::PermissionDenied | Category::ReadOnlyFs => status::ACCESS_DENIED,
            Category::NotFound => status::FILE_NOT_FOUND,
            _ => status::GENERAL,
        },
    }
}

/// Snapshot returned by [`Protocol::status`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Bytes a `read` can return without another round trip
    pub bytes_waiting: u16,
    pub connected: bool,
    /// Status of the last operation, see [`status`]
    pub error: u8,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus {
            bytes_waiting: 0,
            connected: false,
            error: status::SUCCESS,
        }
    }
}

/// Capability set every storage backend offers the device layer.
///
/// Only one target is open at a time. The trait is object safe, so a device
/// can hold any backend as `Box<dyn Protocol>`.
#[async_trait]
pub trait Protocol: Send {
    /// Open `target` as a file or directory listing, depending on `mode`
    /// and on what the target turns out to be.
    async fn open(&mut self, target: &Target, mode: OpenMode) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    /// Up to `len` bytes; an empty block at the end of the data.
    async fn read(&mut self, len: usize) -> Result<Bytes>;

    /// Write `data`, returning how much was accepted.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    async fn status(&mut self) -> Result<DeviceStatus>;

    /// Which way the payload of special command `cmd` flows
    fn special_inquiry(&self, _cmd: u8) -> SpecialDirection {
        SpecialDirection::Unsupported
    }

    async fn special_no_payload(&mut self, _cmd: u8) -> Result<()> {
        Err(Error::Unsupported)
    }

    async fn special_to_caller(&mut self, _cmd: u8, _len: usize) -> Result<Bytes> {
        Err(Error::Unsupported)
    }

    async fn special_from_caller(&mut self, _cmd: u8, _payload: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::ResultCode;

    #[test]
    fn targets() {
        let target: Target = "TNFS://irata.online:16385/games/".parse().unwrap();
        assert_eq!(target.scheme, "tnfs");
        assert_eq!(target.host, "irata.online");
        assert_eq!(target.port_or(16384), 16385);
        assert!(target.names_dir());
        assert_eq!(target.to_string(), "tnfs://irata.online:16385/games/");

        let bare = Target::parse("tnfs://host").unwrap();
        assert_eq!(bare.path, "/");
        assert_eq!(bare.port_or(16384), 16384);

        assert!(Target::parse("host/file").is_err());
    }

    #[test]
    fn open_modes_follow_aux1() {
        assert_eq!(OpenMode::from_u8(6), Some(OpenMode::Directory));
        assert_eq!(OpenMode::from_u8(12), Some(OpenMode::ReadWrite));
        assert_eq!(OpenMode::from_u8(5), None);
        assert!(OpenMode::Append.writes());
        assert!(!OpenMode::Read.writes());
    }

    #[test]
    fn status_codes() {
        assert_eq!(status_code(&Error::Tnfs(ResultCode::NOT_FOUND)), status::FILE_NOT_FOUND);
        assert_eq!(status_code(&Error::Tnfs(ResultCode::EXISTS)), status::FILE_EXISTS);
        assert_eq!(status_code(&Error::Tnfs(ResultCode::END_OF_FILE)), status::END_OF_FILE);
        assert_eq!(status_code(&Error::Tnfs(ResultCode::READ_ONLY_FS)), status::ACCESS_DENIED);
        assert_eq!(status_code(&Error::Tnfs(ResultCode(0x77))), status::GENERAL);
        assert_eq!(status_code(&Error::NoResponse { attempts: 5 }), status::TIMEOUT);
        assert_eq!(status_code(&Error::NotMounted), status::NOT_CONNECTED);
        assert_eq!(status_code(&Error::Unsupported), status::NOT_IMPLEMENTED);
    }

    struct Null;

    #[async_trait]
    impl Protocol for Null {
        async fn open(&mut self, _: &Target, _: OpenMode) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        async fn read(&mut self, _: usize) -> Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn write(&mut self, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }
        async fn status(&mut self) -> Result<DeviceStatus> {
            Ok(DeviceStatus::default())
        }
    }

    #[tokio::test]
    async fn specials_default_to_unsupported() {
        let mut backend: Box<dyn Protocol> = Box::new(Null);
        assert_eq!(backend.special_inquiry(0x20), SpecialDirection::Unsupported);
        assert!(matches!(backend.special_no_payload(0x20).await, Err(Error::Unsupported)));
        assert!(matches!(
            backend.special_from_caller(0x20, b"x").await,
            Err(Error::Unsupported)
        ));
    }
}
