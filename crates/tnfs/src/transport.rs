//! Datagram transports carrying TNFS packets.

use {
    crate::{fcall::Packet, io_err, res, serialize::TnfsCodec, utils::Result},
    async_trait::async_trait,
    futures::sink::SinkExt,
    log::{debug, warn},
    std::{io::ErrorKind, net::SocketAddr},
    tokio::net::{UdpSocket, lookup_host},
    tokio_stream::StreamExt,
    tokio_util::udp::UdpFramed,
};

/// Unreliable, unordered packet exchange with one server.
///
/// The transaction engine owns retries, timeouts and sequence matching; a
/// transport only moves whole packets. `recv` must be cancel safe because the
/// engine drops it when a deadline passes.
#[async_trait]
pub trait Transport: Send {
    /// Send one packet to the server.
    async fn send(&mut self, packet: Packet) -> Result<()>;

    /// Wait for the next packet from the server.
    async fn recv(&mut self) -> Result<Packet>;
}

/// Opens transports to a host, so a mount can be (re)established lazily.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Transport>;
}

/// TNFS over UDP
pub struct UdpTransport {
    framed: UdpFramed<TnfsCodec>,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Resolve `host` and bind an ephemeral socket of the matching family.
    pub async fn connect(host: &str, port: u16) -> Result<UdpTransport> {
        let peer = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| io_err!(NotFound, format!("cannot resolve {}", host)))?;

        let bind_addr = match peer {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!("TNFS socket {} bound for {}", socket.local_addr()?, peer);

        Ok(UdpTransport {
            framed: UdpFramed::new(socket, TnfsCodec),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, packet: Packet) -> Result<()> {
        let peer = self.peer;
        self.framed.send((packet, peer)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Packet> {
        loop {
            match self.framed.next().await {
                Some(Ok((packet, src))) if src == self.peer => return Ok(packet),
                Some(Ok((_, src))) => debug!("ignoring datagram from {}", src),
                Some(Err(e)) if e.kind() == ErrorKind::InvalidData => {
                    warn!("dropping undecodable datagram: {}", e)
                }
                Some(Err(e)) => return Err(e.into()),
                None => return res!(io_err!(UnexpectedEof, "socket closed")),
            }
        }
    }
}

/// Connects every mount over UDP
#[derive(Copy, Clone, Debug, Default)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    type Transport = UdpTransport;

    async fn connect(&self, host: &str, port: u16) -> Result<UdpTransport> {
        UdpTransport::connect(host, port).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::{Header, Opcode};
    use bytes::Bytes;

    #[tokio::test]
    async fn udp_transport_filters_foreign_and_garbage_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let mut transport = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        let request = Packet {
            header: Header {
                session: 0,
                sequence: 7,
                opcode: Opcode::Mount,
            },
            payload: Bytes::from_static(b"\x02\x01/\0\0\0"),
        };
        transport.send(request).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, client) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x00\x00\x07\x00\x02\x01/\0\0\0");

        stranger.send_to(&[0xEF, 0xBE, 0x07, 0x00, 0x00], client).await.unwrap();
        server.send_to(&[0xEF, 0xBE], client).await.unwrap();
        server
            .send_to(&[0xEF, 0xBE, 0x07, 0x00, 0x00, 0x06, 0x02, 0x88, 0x13], client)
            .await
            .unwrap();

        let reply = transport.recv().await.unwrap();
        assert_eq!(reply.header.session, 0xBEEF);
        assert_eq!(reply.header.sequence, 7);
        assert_eq!(&reply.payload[..], [0x00, 0x06, 0x02, 0x88, 0x13]);
    }
}
