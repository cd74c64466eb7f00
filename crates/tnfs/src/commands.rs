//! Directory and file commands.
//!
//! Every command normalizes its paths, runs one transaction and interprets
//! the result code. Directory mutations hand the raw result code back so the
//! caller can tell, for example, "already exists" from success; everything
//! else turns a non-zero code into [`Error::Tnfs`].

use {
    crate::{
        error::Error,
        fcall::*,
        serialize::decode_body,
        session::Session,
        transport::Transport,
        utils::{Result, normalize_path},
    },
    bytes::Bytes,
    log::{debug, warn},
};

impl<T: Transport> Session<T> {
    /// Open a directory for listing.
    pub async fn opendir(&mut self, path: &str) -> Result<u8> {
        let path = normalize_path(path)?;
        debug!("opendir {:?}", path);

        let reply = self.transact(&Request::OpenDir { path }).await?.check()?;
        let handle = decode_body(&reply.body, "OPENDIR")?;
        self.mount.dir_handle = Some(handle);
        Ok(handle)
    }

    /// Next entry name, `None` once the listing is exhausted.
    ///
    /// Entries come back in server order, `.` and `..` included.
    pub async fn readdir(&mut self, handle: u8) -> Result<Option<String>> {
        let reply = self.transact(&Request::ReadDir { handle }).await?;
        match reply.code {
            ResultCode::SUCCESS => decode_body(&reply.body, "READDIR").map(Some),
            ResultCode::END_OF_FILE => Ok(None),
            code => Err(Error::Tnfs(code)),
        }
    }

    pub async fn closedir(&mut self, handle: u8) -> Result<()> {
        self.transact(&Request::CloseDir { handle }).await?.check()?;
        if self.mount.dir_handle == Some(handle) {
            self.mount.dir_handle = None;
        }
        Ok(())
    }

    /// Every entry of a directory, `.` and `..` included.
    pub async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let handle = self.opendir(path).await?;

        let mut entries = Vec::new();
        let listing = loop {
            match self.readdir(handle).await {
                Ok(Some(name)) => entries.push(name),
                Ok(None) => break Ok(entries),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.closedir(handle).await {
            warn!("closedir {}: {}", handle, e);
        }
        listing
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<ResultCode> {
        let path = normalize_path(path)?;
        debug!("mkdir {:?}", path);
        Ok(self.transact(&Request::MkDir { path }).await?.code)
    }

    pub async fn rmdir(&mut self, path: &str) -> Result<ResultCode> {
        let path = normalize_path(path)?;
        debug!("rmdir {:?}", path);
        Ok(self.transact(&Request::RmDir { path }).await?.code)
    }

    pub async fn stat(&mut self, path: &str) -> Result<Stat> {
        let path = normalize_path(path)?;
        let reply = self.transact(&Request::Stat { path }).await?.check()?;
        decode_body(&reply.body, "STAT")
    }

    pub async fn open(&mut self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<u8> {
        let path = normalize_path(path)?;
        debug!("open {:?} {:?}", path, flags);

        let reply = self
            .transact(&Request::Open { flags, mode, path })
            .await?
            .check()?;
        let handle = decode_body(&reply.body, "OPEN")?;
        self.mount.file_handle = Some(handle);
        Ok(handle)
    }

    /// Read up to `count` bytes, at most [`MAX_IO_SIZE`] at a time.
    ///
    /// End of file reads as an empty block.
    pub async fn read(&mut self, handle: u8, count: usize) -> Result<Bytes> {
        let count = count.min(MAX_IO_SIZE) as u16;
        let reply = self.transact(&Request::Read { handle, count }).await?;
        match reply.code {
            ResultCode::SUCCESS => {
                let len: u16 = decode_body(&reply.body, "READ")?;
                let data = reply.body.slice(2..);
                if len > count || data.len() < len as usize {
                    return Err(Error::Malformed("READ"));
                }
                Ok(data.slice(..len as usize))
            }
            ResultCode::END_OF_FILE => Ok(Bytes::new()),
            code => Err(Error::Tnfs(code)),
        }
    }

    /// Write at most [`MAX_IO_SIZE`] bytes of `data`, returning how many the
    /// server accepted.
    pub async fn write(&mut self, handle: u8, data: &[u8]) -> Result<usize> {
        let data = Bytes::copy_from_slice(&data[..data.len().min(MAX_IO_SIZE)]);
        let reply = self.transact(&Request::Write { handle, data: data.clone() }).await?.check()?;
        let written = decode_body::<u16>(&reply.body, "WRITE")? as usize;
        if written > data.len() {
            return Err(Error::Malformed("WRITE"));
        }
        Ok(written)
    }

    pub async fn close(&mut self, handle: u8) -> Result<()> {
        self.transact(&Request::Close { handle }).await?.check()?;
        if self.mount.file_handle == Some(handle) {
            self.mount.file_handle = None;
        }
        Ok(())
    }

    pub async fn lseek(&mut self, handle: u8, whence: Whence, offset: i32) -> Result<()> {
        self.transact(&Request::LSeek {
            handle,
            whence,
            offset,
        })
        .await?
        .check()?;
        Ok(())
    }

    pub async fn unlink(&mut self, path: &str) -> Result<ResultCode> {
        let path = normalize_path(path)?;
        debug!("unlink {:?}", path);
        Ok(self.transact(&Request::Unlink { path }).await?.code)
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<ResultCode> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        debug!("rename {:?} -> {:?}", from, to);
        Ok(self.transact(&Request::Rename { from, to }).await?.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MountOptions;
    use crate::transport::mock::{ScriptedTransport, answer};
    use std::collections::VecDeque;

    const SESSION: u16 = 0xBEEF;

    /// Mounts, then answers everything else through `handler`
    fn server(
        mut handler: impl FnMut(&Packet) -> Vec<u8> + Send + 'static,
    ) -> ScriptedTransport {
        ScriptedTransport::new(move |req| {
            let payload = match req.header.opcode {
                Opcode::Mount => vec![0x00, 0x02, 0x01, 0xE8, 0x03],
                _ => handler(req),
            };
            vec![answer(req, SESSION, &payload)]
        })
    }

    async fn mounted(transport: ScriptedTransport) -> Session<ScriptedTransport> {
        let mut session = Session::new(transport, MountOptions::new("tnfs.example"));
        session.mount().await.unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn readdir_enumerates_until_end_of_file() {
        let mut names: VecDeque<&[u8]> = VecDeque::from(vec![&b".\0"[..], b"..\0", b"foo\0"]);
        let transport = server(move |req| match req.header.opcode {
            Opcode::OpenDir => {
                assert_eq!(&req.payload[..], b"/games\0");
                vec![0x00, 0x04]
            }
            Opcode::ReadDir => match names.pop_front() {
                Some(name) => [&[0x00][..], name].concat(),
                None => vec![0x21],
            },
            Opcode::CloseDir => vec![0x00],
            _ => vec![0x16],
        });
        let mut session = mounted(transport.clone()).await;

        let handle = session.opendir("games").await.unwrap();
        assert_eq!(handle, 4);
        assert_eq!(session.mount_info().dir_handle(), Some(4));

        let mut seen = Vec::new();
        while let Some(name) = session.readdir(handle).await.unwrap() {
            seen.push(name);
        }
        assert_eq!(seen, [".", "..", "foo"]);

        session.closedir(handle).await.unwrap();
        assert_eq!(session.mount_info().dir_handle(), None);

        let readdirs = transport
            .sent()
            .iter()
            .filter(|(_, p)| p.header.opcode == Opcode::ReadDir)
            .count();
        assert_eq!(readdirs, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn closedir_failure_keeps_the_handle() {
        let transport = server(|req| match req.header.opcode {
            Opcode::OpenDir => vec![0x00, 0x02],
            _ => vec![0x06],
        });
        let mut session = mounted(transport).await;

        let handle = session.opendir("/").await.unwrap();
        let r = session.closedir(handle).await;
        assert!(matches!(r, Err(Error::Tnfs(ResultCode::BAD_FILENUM))));
        assert_eq!(session.mount_info().dir_handle(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn list_dir_closes_after_a_failed_read() {
        let transport = server(|req| match req.header.opcode {
            Opcode::OpenDir => vec![0x00, 0x01],
            Opcode::ReadDir => vec![0x03],
            _ => vec![0x00],
        });
        let mut session = mounted(transport.clone()).await;

        let r = session.list_dir("/").await;
        assert!(matches!(r, Err(Error::Tnfs(ResultCode::IO_ERROR))));
        assert_eq!(transport.sent_opcodes().last(), Some(&Opcode::CloseDir));
    }

    #[tokio::test(start_paused = true)]
    async fn stat_decodes_a_directory() {
        let transport = server(|req| match req.header.opcode {
            Opcode::Stat if &req.payload[..] == b"/dir\0" => {
                let mut body = vec![0x00, 0x00, 0x40];
                body.resize(1 + 22, 0);
                body
            }
            _ => vec![0x02],
        });
        let mut session = mounted(transport).await;

        let stat = session.stat("dir").await.unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.size, 0);
        assert_eq!((stat.atime, stat.mtime, stat.ctime), (0, 0, 0));

        let missing = session.stat("nope").await;
        assert!(matches!(missing, Err(Error::Tnfs(ResultCode::NOT_FOUND))));
    }

    #[tokio::test(start_paused = true)]
    async fn mkdir_reports_existing_paths() {
        let mut existing = vec![b"/a\0".to_vec()];
        let transport = server(move |req| match req.header.opcode {
            Opcode::MkDir if existing.contains(&req.payload.to_vec()) => vec![0x0B],
            Opcode::MkDir => {
                existing.push(req.payload.to_vec());
                vec![0x00]
            }
            _ => vec![0x16],
        });
        let mut session = mounted(transport).await;

        assert_eq!(session.mkdir("/b").await.unwrap(), ResultCode::SUCCESS);
        assert_eq!(session.mkdir("a").await.unwrap(), ResultCode::EXISTS);
        assert_eq!(session.mkdir("b").await.unwrap(), ResultCode::EXISTS);
    }

    #[tokio::test(start_paused = true)]
    async fn file_io() {
        let transport = server(|req| match req.header.opcode {
            Opcode::Open => vec![0x00, 0x07],
            Opcode::Read => match req.payload[1] {
                // count 3 reads the tail, anything else is past the end
                3 => vec![0x00, 0x03, 0x00, b'a', b'b', b'c'],
                _ => vec![0x21],
            },
            Opcode::Write => {
                let len = u16::from_le_bytes([req.payload[1], req.payload[2]]);
                let mut body = vec![0x00];
                body.extend_from_slice(&len.to_le_bytes());
                body
            }
            _ => vec![0x00],
        });
        let mut session = mounted(transport.clone()).await;

        let handle = session
            .open("f.txt", OpenFlags::RDWR | OpenFlags::CREAT, FileMode::from_bits_retain(0o644))
            .await
            .unwrap();
        assert_eq!(session.mount_info().file_handle(), Some(7));

        assert_eq!(&session.read(handle, 3).await.unwrap()[..], b"abc");
        assert!(session.read(handle, 100).await.unwrap().is_empty());

        let big = vec![0x55u8; 600];
        assert_eq!(session.write(handle, &big).await.unwrap(), MAX_IO_SIZE);

        session.lseek(handle, Whence::Set, 0).await.unwrap();
        session.close(handle).await.unwrap();
        assert_eq!(session.mount_info().file_handle(), None);

        let write = transport
            .sent()
            .into_iter()
            .find(|(_, p)| p.header.opcode == Opcode::Write)
            .unwrap()
            .1;
        assert_eq!(write.payload.len(), 3 + MAX_IO_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_read_is_malformed() {
        let transport = server(|_| vec![0x00, 0x10, 0x00, b'x']);
        let mut session = mounted(transport).await;

        assert!(matches!(session.read(1, 16).await, Err(Error::Malformed("READ"))));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_beyond_the_request_are_malformed() {
        let transport = server(|req| match req.header.opcode {
            Opcode::Read => vec![0x00, 0x05, 0x00, b'h', b'e', b'l', b'l', b'o'],
            Opcode::Write => vec![0x00, 0x00, 0x02],
            _ => vec![0x00],
        });
        let mut session = mounted(transport).await;

        assert!(matches!(session.read(1, 2).await, Err(Error::Malformed("READ"))));
        assert!(matches!(session.write(1, b"abc").await, Err(Error::Malformed("WRITE"))));
    }

    #[tokio::test(start_paused = true)]
    async fn rename_and_unlink_return_raw_codes() {
        let transport = server(|req| match req.header.opcode {
            Opcode::Rename => {
                assert_eq!(&req.payload[..], b"/old\0/new\0");
                vec![0x00]
            }
            _ => vec![0x02],
        });
        let mut session = mounted(transport).await;

        assert_eq!(session.rename("old", "/new").await.unwrap(), ResultCode::SUCCESS);
        assert_eq!(session.unlink("gone").await.unwrap(), ResultCode::NOT_FOUND);
    }
}
