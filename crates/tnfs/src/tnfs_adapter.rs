//! TNFS backend for the device storage interface.
//!
//! The mount is established lazily by the first `open` and kept across
//! `close`, so a device walking a directory tree does not remount for every
//! file. Opening a different host replaces it.

use {
    crate::{
        adapter::{DeviceStatus, OpenMode, Protocol, SpecialDirection, Target, status, status_code},
        error::Error,
        fcall::*,
        io_err, res,
        session::{MountOptions, Session},
        transport::{Connector, Transport, UdpConnector},
        utils::Result,
    },
    async_trait::async_trait,
    bytes::{BufMut, Bytes, BytesMut},
    log::{debug, info, warn},
};

/// Special commands, all carrying a path from the caller
pub mod special {
    /// `path/old,new`
    pub const RENAME: u8 = 0x20;
    pub const DELETE: u8 = 0x21;
    pub const MKDIR: u8 = 0x2A;
    pub const RMDIR: u8 = 0x2B;
}

/// Permissions for files created by an open
const NEW_FILE_MODE: FileMode = FileMode::from_bits_retain(0o644);

/// Atari end-of-line, terminates device specs
const EOL: u8 = 0x9B;

#[derive(Debug)]
struct OpenFile {
    path: String,
    flags: OpenFlags,
    handle: u8,
    /// Offset the next read or write happens at, restored after a remount
    position: u32,
    size: u32,
}

#[derive(Debug)]
enum Opened {
    File(OpenFile),
    /// Rest of a directory listing, one `\n`-terminated name per entry
    Listing(Bytes),
}

fn open_flags(mode: OpenMode) -> OpenFlags {
    match mode {
        OpenMode::Read | OpenMode::Directory => OpenFlags::RDONLY,
        OpenMode::Write => OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
        OpenMode::Append => OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::APPEND,
        OpenMode::ReadWrite => OpenFlags::RDWR | OpenFlags::CREAT,
    }
}

/// Directory listing without `.` and `..`
async fn listing<T: Transport>(session: &mut Session<T>, path: &str) -> Result<Bytes> {
    let mut listing = BytesMut::new();
    for name in session.list_dir(path).await? {
        if name == "." || name == ".." {
            continue;
        }
        listing.extend_from_slice(name.as_bytes());
        listing.put_u8(b'\n');
    }
    Ok(listing.freeze())
}

/// Text of a special command payload, up to its terminator
fn devicespec(payload: &[u8]) -> Result<String> {
    let end = payload
        .iter()
        .position(|&b| matches!(b, 0 | EOL | b'\n' | b'\r'))
        .unwrap_or(payload.len());
    let spec = String::from_utf8_lossy(&payload[..end]).trim().to_owned();
    if spec.is_empty() {
        return res!(io_err!(InvalidInput, "empty device spec"));
    }
    Ok(spec)
}

/// Split `dir/old,new` into both paths; a bare new name stays in the old
/// name's directory.
fn rename_paths(spec: &str) -> Result<(String, String)> {
    let (from, to) = match spec.split_once(',') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => (from, to),
        _ => return res!(io_err!(InvalidInput, format!("rename needs old,new: {:?}", spec))),
    };

    let to = if to.starts_with('/') {
        to.to_owned()
    } else {
        let dir = from.rfind('/').map_or("", |i| &from[..=i]);
        format!("{}{}", dir, to)
    };
    Ok((from.to_owned(), to))
}

/// [`Protocol`] over a TNFS mount.
pub struct TnfsProtocol<C: Connector = UdpConnector> {
    connector: C,
    /// Credentials and timing for every mount this backend makes
    options: MountOptions,
    session: Option<Session<C::Transport>>,
    opened: Option<Opened>,
    last_status: u8,
}

impl TnfsProtocol<UdpConnector> {
    pub fn new(options: MountOptions) -> TnfsProtocol<UdpConnector> {
        TnfsProtocol::with_connector(UdpConnector, options)
    }
}

impl<C: Connector> TnfsProtocol<C> {
    pub fn with_connector(connector: C, options: MountOptions) -> TnfsProtocol<C> {
        TnfsProtocol {
            connector,
            options,
            session: None,
            opened: None,
            last_status: status::SUCCESS,
        }
    }

    /// The current mount, if any
    pub fn session(&self) -> Option<&Session<C::Transport>> {
        self.session.as_ref()
    }

    /// Close whatever is open and end the mount.
    pub async fn unmount(&mut self) -> Result<()> {
        if let Err(e) = self.close_target().await {
            debug!("close before unmount: {}", e);
        }

        match self.session.take() {
            Some(mut session) if session.is_mounted() => {
                let r = session.umount().await;
                if r.is_err() {
                    self.session = Some(session);
                }
                r
            }
            _ => Ok(()),
        }
    }

    fn track<T>(&mut self, r: Result<T>) -> Result<T> {
        self.last_status = match r {
            Ok(_) => status::SUCCESS,
            Err(ref e) => status_code(e),
        };
        r
    }

    fn mounted(&mut self) -> Result<&mut Session<C::Transport>> {
        self.session
            .as_mut()
            .filter(|session| session.is_mounted())
            .ok_or(Error::NotMounted)
    }

    fn file(&self) -> Result<&OpenFile> {
        match self.opened {
            Some(Opened::File(ref file)) => Ok(file),
            _ => Err(Error::BadHandle),
        }
    }

    fn file_mut(&mut self) -> Result<&mut OpenFile> {
        match self.opened {
            Some(Opened::File(ref mut file)) => Ok(file),
            _ => Err(Error::BadHandle),
        }
    }

    /// The mount serving `target`, mounting its host first if needed
    async fn mount_for(&mut self, target: &Target) -> Result<&mut Session<C::Transport>> {
        let port = target.port_or(TNFS_PORT);
        let reusable = self.session.as_ref().is_some_and(|session| {
            let options = session.mount_info().options();
            session.is_mounted() && options.host == target.host && options.port == port
        });

        if !reusable {
            if let Some(mut old) = self.session.take() {
                if old.is_mounted() {
                    if let Err(e) = old.umount().await {
                        debug!("leaving session {:04x}: {}", old.mount_info().session(), e);
                    }
                }
            }

            let transport = self.connector.connect(&target.host, port).await?;
            let options = MountOptions {
                host: target.host.clone(),
                port,
                ..self.options.clone()
            };
            let mut session = Session::new(transport, options);
            session.mount().await?;
            self.session = Some(session);
        }

        self.mounted()
    }

    async fn open_target(&mut self, target: &Target, mode: OpenMode) -> Result<()> {
        if let Err(e) = self.close_target().await {
            debug!("closing previous target: {}", e);
        }

        let session = self.mount_for(target).await?;
        let path = target.path.as_str();

        let wants_listing = mode == OpenMode::Directory || target.names_dir();
        let stat = if wants_listing {
            None
        } else {
            match session.stat(path).await {
                Ok(stat) => Some(stat),
                Err(e) if e.category() == Category::NotFound && mode.writes() => None,
                Err(e) => return Err(e),
            }
        };

        let opened = if wants_listing || stat.as_ref().is_some_and(Stat::is_dir) {
            if mode.writes() {
                return Err(Error::Tnfs(ResultCode::IS_A_DIRECTORY));
            }
            Opened::Listing(listing(session, path).await?)
        } else {
            let flags = open_flags(mode);
            let handle = session.open(path, flags, NEW_FILE_MODE).await?;
            let size = match (mode, stat) {
                (OpenMode::Write, _) | (_, None) => 0,
                (_, Some(stat)) => stat.size,
            };
            Opened::File(OpenFile {
                path: path.to_owned(),
                flags,
                handle,
                position: if mode == OpenMode::Append { size } else { 0 },
                size,
            })
        };

        info!("opened {} ({:?})", target, mode);
        self.opened = Some(opened);
        Ok(())
    }

    async fn close_target(&mut self) -> Result<()> {
        match self.opened.take() {
            Some(Opened::File(file)) => match self.mounted()?.close(file.handle).await {
                // the handle died with the session
                Err(e) if e.is_session_loss() => {
                    debug!("close {}: {}", file.path, e);
                    Ok(())
                }
                r => r,
            },
            _ => Ok(()),
        }
    }

    /// Remount after the server forgot the session, then reopen the file
    /// at its tracked position.
    async fn recover(&mut self, cause: &Error) -> Result<()> {
        warn!("session lost ({}), remounting", cause);
        let session = self.session.as_mut().ok_or(Error::NotMounted)?;
        session.reset();
        session.mount().await?;

        let (path, flags, position) = {
            let file = self.file()?;
            (file.path.clone(), file.flags.for_reopen(), file.position)
        };
        let session = self.mounted()?;
        let handle = session.open(&path, flags, NEW_FILE_MODE).await?;
        if position > 0 {
            let offset = i32::try_from(position).map_err(|_| Error::Tnfs(ResultCode::FILE_TOO_LARGE))?;
            session.lseek(handle, Whence::Set, offset).await?;
        }
        self.file_mut()?.handle = handle;
        Ok(())
    }

    async fn read_chunk(&mut self, len: usize) -> Result<Bytes> {
        let handle = self.file()?.handle;
        self.mounted()?.read(handle, len).await
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.file()?.handle;
        self.mounted()?.write(handle, data).await
    }

    async fn read_file(&mut self, len: usize) -> Result<Bytes> {
        let mut data = BytesMut::with_capacity(len);
        while data.len() < len {
            let want = (len - data.len()).min(MAX_IO_SIZE);
            let chunk = match self.read_chunk(want).await {
                Err(e) if e.is_session_loss() => {
                    self.recover(&e).await?;
                    self.read_chunk(want).await?
                }
                r => r?,
            };
            if chunk.is_empty() {
                break;
            }

            self.file_mut()?.position += chunk.len() as u32;
            data.extend_from_slice(&chunk);
        }
        Ok(data.freeze())
    }

    async fn write_file(&mut self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        for chunk in data.chunks(MAX_IO_SIZE) {
            let n = match self.write_chunk(chunk).await {
                Err(e) if e.is_session_loss() => {
                    self.recover(&e).await?;
                    self.write_chunk(chunk).await?
                }
                r => r?,
            };

            let file = self.file_mut()?;
            file.position += n as u32;
            file.size = file.size.max(file.position);
            written += n;
            if n < chunk.len() {
                break;
            }
        }
        Ok(written)
    }

    async fn run_special(&mut self, cmd: u8, payload: &[u8]) -> Result<()> {
        if self.special_inquiry(cmd) != SpecialDirection::FromCaller {
            return Err(Error::Unsupported);
        }

        let spec = devicespec(payload)?;
        let path = match Target::parse(&spec) {
            Ok(target) => {
                self.mount_for(&target).await?;
                target.path
            }
            Err(_) => spec,
        };

        let session = self.mounted()?;
        let code = match cmd {
            special::RENAME => {
                let (from, to) = rename_paths(&path)?;
                session.rename(&from, &to).await?
            }
            special::DELETE => session.unlink(&path).await?,
            special::MKDIR => session.mkdir(&path).await?,
            _ => session.rmdir(&path).await?,
        };

        match code {
            ResultCode::SUCCESS => Ok(()),
            code => Err(Error::Tnfs(code)),
        }
    }
}

#[async_trait]
impl<C: Connector> Protocol for TnfsProtocol<C> {
    async fn open(&mut self, target: &Target, mode: OpenMode) -> Result<()> {
        let r = self.open_target(target, mode).await;
        self.track(r)
    }

    async fn close(&mut self) -> Result<()> {
        let r = self.close_target().await;
        self.track(r)
    }

    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let r = match self.opened {
            Some(Opened::Listing(ref mut rest)) => Ok(rest.split_to(len.min(rest.len()))),
            Some(Opened::File(_)) => self.read_file(len).await,
            None => Err(Error::BadHandle),
        };

        let r = self.track(r);
        if matches!(r, Ok(ref data) if data.is_empty() && len > 0) {
            self.last_status = status::END_OF_FILE;
        }
        r
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let r = match self.opened {
            Some(Opened::File(_)) => self.write_file(data).await,
            Some(Opened::Listing(_)) => Err(Error::Unsupported),
            None => Err(Error::BadHandle),
        };
        self.track(r)
    }

    async fn status(&mut self) -> Result<DeviceStatus> {
        let waiting = match self.opened {
            Some(Opened::Listing(ref rest)) => rest.len(),
            Some(Opened::File(ref file)) if file.flags.contains(OpenFlags::RDONLY) => {
                file.size.saturating_sub(file.position) as usize
            }
            _ => 0,
        };

        Ok(DeviceStatus {
            bytes_waiting: waiting.min(u16::MAX as usize) as u16,
            connected: self.session.as_ref().is_some_and(|s| s.is_mounted()),
            error: self.last_status,
        })
    }

    fn special_inquiry(&self, cmd: u8) -> SpecialDirection {
        match cmd {
            special::RENAME | special::DELETE | special::MKDIR | special::RMDIR => {
                SpecialDirection::FromCaller
            }
            _ => SpecialDirection::Unsupported,
        }
    }

    async fn special_from_caller(&mut self, cmd: u8, payload: &[u8]) -> Result<()> {
        let r = self.run_special(cmd, payload).await;
        self.track(r)
    }
}
