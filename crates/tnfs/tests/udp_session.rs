use {
    std::time::Duration,
    tnfs::{
        adapter::{OpenMode, Protocol, Target},
        session::{MountOptions, Session},
        tnfs_adapter::TnfsProtocol,
        *,
    },
    tokio::{net::UdpSocket, task::JoinHandle},
};

const SESSION: u16 = 0x4242;

/// Response payload for everything but READDIR
fn respond(opcode: u8, payload: &[u8]) -> Vec<u8> {
    match opcode {
        // MOUNT: version 1.2, retry after 20 ms
        0x00 => vec![0x00, 0x02, 0x01, 20, 0],
        0x01 => vec![0x00],
        0x10 if payload == b"/\0" => vec![0x00, 0x01],
        0x10 => vec![0x02],
        0x12 => vec![0x00],
        0x13 if payload == b"/games\0" => vec![0x0B],
        0x13 => vec![0x00],
        0x24 if payload == b"/hello.txt\0" => {
            let mut body = vec![0x00, 0xA4, 0x81, 0, 0, 0, 0, 5, 0, 0, 0];
            body.extend_from_slice(&[0; 12]);
            body
        }
        0x24 => vec![0x02],
        0x29 => vec![0x00, 0x09],
        0x21 => vec![0x00, 5, 0, b'h', b'e', b'l', b'l', b'o'],
        0x23 => vec![0x00],
        _ => vec![0x16],
    }
}

/// A TNFS server on a localhost socket. READDIR walks a fixed listing and
/// the first READDIR request is dropped to force a retry.
async fn spawn_server() -> (u16, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let names: [&[u8]; 4] = [b".\0", b"..\0", b"games\0", b"hello.txt\0"];
        let mut cursor = 0;
        let mut dropped = false;
        let mut buf = [0u8; 1024];

        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let (header, payload) = buf[..n].split_at(4);
            let (sequence, opcode) = (header[2], header[3]);

            let body = if opcode == 0x11 {
                if !dropped {
                    dropped = true;
                    continue;
                }
                match names.get(cursor) {
                    Some(&name) => {
                        cursor += 1;
                        [&[0x00u8][..], name].concat()
                    }
                    None => vec![0x21],
                }
            } else {
                respond(opcode, payload)
            };

            let mut datagram = SESSION.to_le_bytes().to_vec();
            datagram.extend_from_slice(&[sequence, opcode]);
            datagram.extend_from_slice(&body);
            socket.send_to(&datagram, peer).await.unwrap();
        }
    });

    (port, handle)
}

fn options(port: u16) -> MountOptions {
    MountOptions {
        port,
        timeout: Duration::from_millis(300),
        max_retries: 3,
        ..MountOptions::new("127.0.0.1")
    }
}

#[tokio::test]
async fn session_over_udp() {
    let (port, server) = spawn_server().await;

    let mut session = Session::connect(options(port)).await.unwrap();
    let mounted = session.mount().await.unwrap();
    assert_eq!(mounted.session, SESSION);
    assert_eq!(mounted.version, Version::V1_2);
    assert_eq!(session.mount_info().min_retry(), Duration::from_millis(20));

    let names = session.list_dir("").await.unwrap();
    assert_eq!(names, [".", "..", "games", "hello.txt"]);

    let stat = session.stat("hello.txt").await.unwrap();
    assert!(!stat.is_dir());
    assert_eq!(stat.size, 5);

    assert_eq!(session.mkdir("games").await.unwrap(), ResultCode::EXISTS);
    assert!(matches!(
        session.stat("missing").await,
        Err(Error::Tnfs(ResultCode::NOT_FOUND))
    ));

    session.umount().await.unwrap();
    assert!(!session.is_mounted());
    assert!(matches!(session.umount().await, Err(Error::NotMounted)));

    server.abort();
}

#[tokio::test]
async fn adapter_over_udp() {
    let (port, server) = spawn_server().await;

    let mut backend = TnfsProtocol::new(options(port));
    let target = Target::parse(&format!("tnfs://127.0.0.1:{}/hello.txt", port)).unwrap();
    backend.open(&target, OpenMode::Read).await.unwrap();

    let status = backend.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.bytes_waiting, 5);

    let data = backend.read(5).await.unwrap();
    assert_eq!(&data[..], b"hello");

    backend.close().await.unwrap();
    backend.unmount().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn silent_server_exhausts_retries() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();

    let mut session = Session::connect(MountOptions {
        timeout: Duration::from_millis(50),
        max_retries: 2,
        min_retry: Duration::from_millis(10),
        ..options(port)
    })
    .await
    .unwrap();

    let r = session.mount().await;
    assert!(matches!(r, Err(Error::NoResponse { attempts: 2 })));

    let mut buf = [0u8; 64];
    let (_, _) = socket.recv_from(&mut buf).await.unwrap();
    let (_, _) = socket.recv_from(&mut buf).await.unwrap();
}
