//! Mount state and the session lifecycle.
//!
//! A [`Session`] pairs one transport with the [`MountInfo`] describing what is
//! mounted over it. `MountInfo` is the only mutable protocol state: the
//! session id, the next sequence number, the negotiated version and retry
//! interval, and the directory and file handles currently open.

use {
    crate::{
        error::Error,
        fcall::*,
        serialize::decode_body,
        transaction,
        transport::{Transport, UdpTransport},
        utils::Result,
    },
    log::{debug, info},
    std::time::Duration,
};

/// Where and how to mount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountOptions {
    pub host: String,
    pub port: u16,
    /// Server side mount point; sent verbatim, so `a:` style roots work too
    pub path: String,
    pub user: String,
    pub password: String,
    /// Version announced in MOUNT
    pub version: Version,
    /// How long one attempt waits for its answer
    pub timeout: Duration,
    /// Total transmissions per request
    pub max_retries: u32,
    /// Spacing between attempts until the server announces its own
    pub min_retry: Duration,
}

impl MountOptions {
    pub fn new<S: Into<String>>(host: S) -> MountOptions {
        MountOptions {
            host: host.into(),
            port: TNFS_PORT,
            path: "/".to_owned(),
            user: String::new(),
            password: String::new(),
            version: Version::V1_2,
            timeout: Duration::from_millis(6000),
            max_retries: 5,
            min_retry: Duration::from_millis(1000),
        }
    }
}

impl Default for MountOptions {
    fn default() -> MountOptions {
        MountOptions::new("localhost")
    }
}

/// Per-mount protocol state.
#[derive(Clone, Debug)]
pub struct MountInfo {
    options: MountOptions,
    session: u16,
    sequence: u8,
    server_version: Option<Version>,
    min_retry: Duration,
    pub(crate) dir_handle: Option<u8>,
    pub(crate) file_handle: Option<u8>,
}

impl MountInfo {
    pub fn new(options: MountOptions) -> MountInfo {
        let min_retry = options.min_retry;
        MountInfo {
            options,
            session: NO_SESSION,
            sequence: 0,
            server_version: None,
            min_retry,
            dir_handle: None,
            file_handle: None,
        }
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Current session id, [`NO_SESSION`] when not mounted
    pub fn session(&self) -> u16 {
        self.session
    }

    pub fn is_mounted(&self) -> bool {
        self.session != NO_SESSION
    }

    /// Version the server announced in its MOUNT answer
    pub fn server_version(&self) -> Option<Version> {
        self.server_version
    }

    pub fn min_retry(&self) -> Duration {
        self.min_retry
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.options.max_retries
    }

    /// Most recently opened directory handle
    pub fn dir_handle(&self) -> Option<u8> {
        self.dir_handle
    }

    /// Most recently opened file handle
    pub fn file_handle(&self) -> Option<u8> {
        self.file_handle
    }

    /// Take the next sequence number, wrapping after 255.
    pub(crate) fn next_sequence(&mut self) -> u8 {
        let sequence = self.sequence;
        self.sequence = sequence.wrapping_add(1);
        sequence
    }

    pub(crate) fn establish(&mut self, reply: &MountReply) {
        self.session = reply.session;
        self.server_version = Some(reply.version);
        self.min_retry = Duration::from_millis(u64::from(reply.min_retry_ms));
    }

    /// Forget the session and every handle that belonged to it.
    pub(crate) fn clear(&mut self) {
        self.session = NO_SESSION;
        self.server_version = None;
        self.min_retry = self.options.min_retry;
        self.dir_handle = None;
        self.file_handle = None;
    }
}

/// A transport plus the mount carried over it.
///
/// Commands borrow the session mutably, so only one transaction is ever in
/// flight on a mount.
#[derive(Debug)]
pub struct Session<T> {
    pub(crate) transport: T,
    pub(crate) mount: MountInfo,
}

impl Session<UdpTransport> {
    /// Open a UDP transport to `options.host`; nothing is mounted yet.
    pub async fn connect(options: MountOptions) -> Result<Session<UdpTransport>> {
        let transport = UdpTransport::connect(&options.host, options.port).await?;
        Ok(Session::new(transport, options))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, options: MountOptions) -> Session<T> {
        Session {
            transport,
            mount: MountInfo::new(options),
        }
    }

    pub fn mount_info(&self) -> &MountInfo {
        &self.mount
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_mounted()
    }

    /// Run a raw request on this mount.
    pub async fn transact(&mut self, request: &Request) -> Result<Reply> {
        transaction::execute(&mut self.transport, &mut self.mount, request).await
    }

    /// Establish a session.
    ///
    /// An existing session is unmounted first. Whether or not the server
    /// confirms that, the local state is cleared before the new MOUNT.
    pub async fn mount(&mut self) -> Result<MountReply> {
        if self.mount.is_mounted() {
            if let Err(e) = self.umount().await {
                debug!("dropping session {:04x}: {}", self.mount.session(), e);
            }
            self.mount.clear();
        }

        let options = self.mount.options();
        let request = Request::Mount {
            version: options.version,
            path: options.path.clone(),
            user: options.user.clone(),
            password: options.password.clone(),
        };
        let reply = self.transact(&request).await?.check()?;

        let (version, min_retry_ms): (Version, u16) = decode_body(&reply.body, "MOUNT")?;
        if reply.header.session == NO_SESSION {
            return Err(Error::Malformed("MOUNT without a session id"));
        }
        let mounted = MountReply {
            session: reply.header.session,
            version,
            min_retry_ms,
        };
        self.mount.establish(&mounted);

        info!(
            "mounted {}:{}{} session {:04x}, server version {}, min retry {} ms",
            self.mount.options.host,
            self.mount.options.port,
            self.mount.options.path,
            mounted.session,
            version,
            min_retry_ms
        );
        Ok(mounted)
    }

    /// End the session.
    ///
    /// Without a session this is [`Error::NotMounted`] and nothing is sent.
    /// The local state is only cleared once the server confirms.
    pub async fn umount(&mut self) -> Result<()> {
        if !self.mount.is_mounted() {
            return Err(Error::NotMounted);
        }

        self.transact(&Request::Umount).await?.check()?;
        info!("unmounted session {:04x}", self.mount.session());
        self.mount.clear();
        Ok(())
    }

    /// Drop the session locally, for a session the server has already
    /// forgotten. The next [`Session::mount`] then skips the UMOUNT.
    pub fn reset(&mut self) {
        self.mount.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ScriptedTransport, answer};

    fn options() -> MountOptions {
        MountOptions {
            path: "/home/tnfs".to_owned(),
            ..MountOptions::new("tnfs.example")
        }
    }

    #[test]
    fn defaults() {
        let options = MountOptions::new("host");
        assert_eq!(options.port, 16384);
        assert_eq!(options.version, Version::V1_2);
        assert_eq!(options.timeout, Duration::from_millis(6000));
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.path, "/");
        assert_eq!(MountOptions::default().port, TNFS_PORT);
    }

    #[tokio::test(start_paused = true)]
    async fn mount_decodes_session_version_and_retry() {
        let transport = ScriptedTransport::new(|req| {
            assert_eq!(req.header.session, NO_SESSION);
            assert_eq!(&req.payload[..], b"\x02\x01/home/tnfs\0\0\0");
            vec![answer(req, 0xBEEF, &[0x00, 0x06, 0x02, 0x88, 0x13])]
        });
        let mut session = Session::new(transport, options());

        let reply = session.mount().await.unwrap();
        assert_eq!(
            reply,
            MountReply {
                session: 0xBEEF,
                version: Version { major: 2, minor: 6 },
                min_retry_ms: 5000,
            }
        );

        let info = session.mount_info();
        assert_eq!(info.session(), 0xBEEF);
        assert_eq!(info.server_version().map(|v| v.as_u16()), Some(0x0206));
        assert_eq!(info.min_retry(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn mount_failure_leaves_no_session() {
        let transport = ScriptedTransport::new(|req| vec![answer(req, 0, &[0x09])]);
        let mut session = Session::new(transport, options());

        let r = session.mount().await;
        assert!(matches!(r, Err(Error::Tnfs(ResultCode::ACCESS_DENIED))));
        assert!(!session.is_mounted());
    }

    #[tokio::test(start_paused = true)]
    async fn umount_without_session_sends_nothing() {
        let transport = ScriptedTransport::new(|_| Vec::new());
        let mut session = Session::new(transport.clone(), options());

        assert!(matches!(session.umount().await, Err(Error::NotMounted)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remount_unmounts_first() {
        let mut next_session = 0x0100;
        let transport = ScriptedTransport::new(move |req| match req.header.opcode {
            Opcode::Mount => {
                next_session += 1;
                vec![answer(req, next_session, &[0x00, 0x02, 0x01, 0xE8, 0x03])]
            }
            _ => vec![answer(req, req.header.session, &[0x00])],
        });
        let mut session = Session::new(transport.clone(), options());

        session.mount().await.unwrap();
        session.mount.dir_handle = Some(3);
        session.mount().await.unwrap();

        assert_eq!(transport.sent_opcodes(), [Opcode::Mount, Opcode::Umount, Opcode::Mount]);
        assert_eq!(transport.sent()[1].1.header.session, 0x0101);
        assert_eq!(session.mount_info().session(), 0x0102);
        assert_eq!(session.mount_info().dir_handle(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_umount_keeps_the_session() {
        let transport = ScriptedTransport::new(|req| match req.header.opcode {
            Opcode::Mount => vec![answer(req, 0xBEEF, &[0x00, 0x02, 0x01, 0xE8, 0x03])],
            _ => Vec::new(),
        });
        let mut session = Session::new(
            transport,
            MountOptions {
                max_retries: 2,
                ..options()
            },
        );

        session.mount().await.unwrap();
        assert!(matches!(session.umount().await, Err(Error::NoResponse { attempts: 2 })));
        assert!(session.is_mounted());
    }
}
