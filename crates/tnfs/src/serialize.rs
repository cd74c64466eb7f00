//! Serialize/deserialize TNFS packets into/from binary.
//!
//! Every layout is written as a field list chained with `<<`, in wire order.
//! Multi-byte fields are little-endian and strings are NUL-terminated.

use crate::{fcall::*, io_err, res};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use std::io::{Read, Result};
use std::mem;
use std::ops::Shl;
use tokio_util::codec;

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_retain(decode!($buf))
    };
}

/// Read a NUL-terminated string, `None` if the reader is already exhausted.
///
/// A trailing string that runs to the end of the datagram without its NUL is
/// accepted as is.
fn read_cstr<R: Read + ?Sized>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte)? {
            0 if buf.is_empty() => return Ok(None),
            0 => return Ok(Some(buf)),
            _ if byte[0] == 0 => return Ok(Some(buf)),
            _ => buf.push(byte[0]),
        }
    }
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable + ?Sized>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<'a, T: Encodable + ?Sized, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable + ?Sized, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<W> SResult<Encoder<W>> {
    fn bytes_written(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes)
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for i32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_i32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for str {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_all(self.as_bytes())?;
        w.write_u8(0)?;
        Ok(self.len() + 1)
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.as_str().encode(w)
    }
}

/// Raw bytes, no length prefix and no terminator
impl Encodable for [u8] {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_all(self).and(Ok(self.len()))
    }
}

impl Encodable for Bytes {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self[..].encode(w)
    }
}

impl Encodable for Version {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.minor << &self.major).bytes_written()
    }
}

impl Encodable for Header {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.session << &self.sequence << &(self.opcode as u8)).bytes_written()
    }
}

impl Encodable for Packet {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.header << &self.payload).bytes_written()
    }
}

impl Encodable for Stat {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let buf = Encoder::new(w)
            << &self.mode.bits()
            << &self.uid
            << &self.gid
            << &self.size
            << &self.atime
            << &self.mtime
            << &self.ctime;

        let buf = match (&self.uid_name, &self.gid_name) {
            (None, None) => buf,
            (uid, gid) => {
                buf << uid.as_deref().unwrap_or_default() << gid.as_deref().unwrap_or_default()
            }
        };
        buf.bytes_written()
    }
}

/// Request payload, header excluded
impl Encodable for Request {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let buf = Encoder::new(w);

        let buf = match *self {
            Request::Mount {
                ref version,
                ref path,
                ref user,
                ref password,
            } => buf << version << path << user << password,
            Request::Umount => SResult(Ok(buf)),
            Request::OpenDir { ref path } => buf << path,
            Request::ReadDir { ref handle } => buf << handle,
            Request::CloseDir { ref handle } => buf << handle,
            Request::MkDir { ref path } => buf << path,
            Request::RmDir { ref path } => buf << path,
            Request::Stat { ref path } => buf << path,
            Request::Open {
                ref flags,
                ref mode,
                ref path,
            } => buf << &flags.bits() << &mode.bits() << path,
            Request::Read {
                ref handle,
                ref count,
            } => buf << handle << count,
            Request::Write {
                ref handle,
                ref data,
            } => buf << handle << &(data.len() as u16) << data,
            Request::Close { ref handle } => buf << handle,
            Request::LSeek {
                ref handle,
                ref whence,
                ref offset,
            } => buf << handle << &(*whence as u8) << offset,
            Request::Unlink { ref path } => buf << path,
            Request::Rename { ref from, ref to } => buf << from << to,
        };

        buf.bytes_written()
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

/// Entry names may come from 8-bit systems; invalid UTF-8 is replaced, not rejected
impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        match read_cstr(r)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => res!(io_err!(UnexpectedEof, "missing string")),
        }
    }
}

/// Optional trailing string; absent and empty both decode to `None`
impl Decodable for Option<String> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(read_cstr(r)?
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl<A: Decodable, B: Decodable> Decodable for (A, B) {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok((decode!(*r), decode!(*r)))
    }
}

impl Decodable for Version {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let (minor, major) = (decode!(*r), decode!(*r));
        Ok(Version { major, minor })
    }
}

impl Decodable for Header {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let session = decode!(*r);
        let sequence = decode!(*r);
        let opcode: u8 = decode!(*r);
        match Opcode::from_u8(opcode) {
            Some(opcode) => Ok(Header {
                session,
                sequence,
                opcode,
            }),
            None => res!(io_err!(InvalidData, format!("unknown opcode {:#04x}", opcode))),
        }
    }
}

impl Decodable for Stat {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Stat {
            mode: decode!(FileMode, *r),
            uid: Decodable::decode(r)?,
            gid: Decodable::decode(r)?,
            size: Decodable::decode(r)?,
            atime: Decodable::decode(r)?,
            mtime: Decodable::decode(r)?,
            ctime: Decodable::decode(r)?,
            uid_name: Decodable::decode(r)?,
            gid_name: Decodable::decode(r)?,
        })
    }
}

/// Encode a request payload
pub fn encode_request(request: &Request) -> Result<Bytes> {
    let mut writer = BytesMut::with_capacity(MAX_PAYLOAD_SIZE).writer();
    request.encode(&mut writer)?;
    Ok(writer.into_inner().freeze())
}

/// Split a received datagram into header and payload
pub fn read_packet(datagram: Bytes) -> Result<Packet> {
    if datagram.len() < HEADER_SIZE {
        return res!(io_err!(
            InvalidData,
            format!("{} byte datagram is shorter than a header", datagram.len())
        ));
    }

    let header = Decodable::decode(&mut &datagram[..HEADER_SIZE])?;
    Ok(Packet {
        header,
        payload: datagram.slice(HEADER_SIZE..),
    })
}

/// Helper function to write a packet into a byte-oriented stream
pub fn write_packet<W: WriteBytesExt>(w: &mut W, packet: &Packet) -> Result<usize> {
    packet.encode(w)
}

/// Separate the leading result code of a response
pub fn read_reply(packet: Packet) -> Result<Reply> {
    match packet.payload.first() {
        Some(&code) => Ok(Reply {
            header: packet.header,
            code: ResultCode(code),
            body: packet.payload.slice(1..),
        }),
        None => res!(io_err!(InvalidData, "response without a result code")),
    }
}

/// Decode an opcode specific response body
pub fn decode_body<T: Decodable>(body: &[u8], what: &'static str) -> crate::Result<T> {
    let mut r = body;
    Decodable::decode(&mut r).map_err(|_| crate::Error::Malformed(what))
}

/// Datagram codec for `tokio_util::udp::UdpFramed`.
///
/// A datagram always holds exactly one packet, so decoding consumes the
/// whole buffer.
#[derive(Copy, Clone, Debug, Default)]
pub struct TnfsCodec;

impl codec::Decoder for TnfsCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.is_empty() {
            return Ok(None);
        }
        read_packet(src.split().freeze()).map(Some)
    }
}

impl codec::Encoder<Packet> for TnfsCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let len = HEADER_SIZE + item.payload.len();
        if len > MAX_PACKET_SIZE {
            return res!(io_err!(
                InvalidInput,
                format!("{} byte packet exceeds {} bytes", len, MAX_PACKET_SIZE)
            ));
        }

        let mut writer = BytesMut::with_capacity(len).writer();
        write_packet(&mut writer, &item)?;
        dst.extend_from_slice(&writer.into_inner());
        Ok(())
    }
}

#[test]
fn encoder_test1() {
    let expected: Vec<u8> = (0..10).collect();
    let mut encoder = Vec::new();
    for i in 0..10 {
        (&(i as u8)).encode(&mut encoder).unwrap();
    }
    assert_eq!(expected, encoder);
}

#[test]
fn header_is_little_endian() {
    let mut buf = Vec::new();
    let header = Header {
        session: 0xBEEF,
        sequence: 0x17,
        opcode: Opcode::ReadDir,
    };
    header.encode(&mut buf).unwrap();
    assert_eq!(buf, [0xEF, 0xBE, 0x17, 0x11]);
}

#[test]
fn mount_request_layout() {
    let payload = encode_request(&Request::Mount {
        version: Version::V1_2,
        path: "/home/tnfs".to_owned(),
        user: "example".to_owned(),
        password: "password".to_owned(),
    })
    .unwrap();

    let mut expected = vec![0x02, 0x01];
    expected.extend_from_slice(b"/home/tnfs\0example\0password\0");
    assert_eq!(&payload[..], &expected[..]);

    let anonymous = encode_request(&Request::Mount {
        version: Version::V1_2,
        path: "a:".to_owned(),
        user: String::new(),
        password: String::new(),
    })
    .unwrap();
    assert_eq!(&anonymous[..], b"\x02\x01a:\0\0\0");
}

#[test]
fn opendir_paths_are_normalized_before_encoding() {
    use crate::utils::normalize_path;

    let relative = encode_request(&Request::OpenDir {
        path: normalize_path("relative/path").unwrap(),
    })
    .unwrap();
    let absolute = encode_request(&Request::OpenDir {
        path: normalize_path("/relative/path").unwrap(),
    })
    .unwrap();
    assert_eq!(relative, absolute);
    assert_eq!(&relative[..], b"/relative/path\0");
}

#[test]
fn file_request_layouts() {
    let open = encode_request(&Request::Open {
        flags: OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
        mode: FileMode::from_bits_retain(0o644),
        path: "/a".to_owned(),
    })
    .unwrap();
    assert_eq!(&open[..], b"\x02\x03\xa4\x01/a\0");

    let seek = encode_request(&Request::LSeek {
        handle: 3,
        whence: Whence::End,
        offset: -2,
    })
    .unwrap();
    assert_eq!(&seek[..], [3, 2, 0xFE, 0xFF, 0xFF, 0xFF]);

    let write = encode_request(&Request::Write {
        handle: 1,
        data: Bytes::from_static(b"hi"),
    })
    .unwrap();
    assert_eq!(&write[..], [1, 2, 0, b'h', b'i']);

    let rename = encode_request(&Request::Rename {
        from: "/a".to_owned(),
        to: "/b".to_owned(),
    })
    .unwrap();
    assert_eq!(&rename[..], b"/a\0/b\0");

    assert!(encode_request(&Request::Umount).unwrap().is_empty());
}

#[test]
fn stat_body_decodes_directory() {
    let body = [0x00, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let stat: Stat = decode_body(&body, "STAT").unwrap();
    assert!(stat.is_dir());
    assert_eq!(stat.size, 0);
    assert_eq!((stat.atime, stat.mtime, stat.ctime), (0, 0, 0));
    assert_eq!(stat.uid_name, None);
}

#[test]
fn stat_body_with_names() {
    let stat = Stat {
        mode: FileMode::S_IFREG | FileMode::from_bits_retain(0o600),
        uid: 1000,
        gid: 100,
        size: 0x0102_0304,
        atime: 1,
        mtime: 2,
        ctime: 3,
        uid_name: Some("tnfs".to_owned()),
        gid_name: Some("users".to_owned()),
    };
    let mut buf = Vec::new();
    stat.encode(&mut buf).unwrap();
    assert_eq!(&buf[6..10], [0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&buf[22..], b"tnfs\0users\0");

    let decoded: Stat = decode_body(&buf, "STAT").unwrap();
    assert_eq!(decoded, stat);
}

#[test]
fn short_stat_body_is_malformed() {
    let r: crate::Result<Stat> = decode_body(&[0x00, 0x40, 0x00], "STAT");
    assert!(matches!(r, Err(crate::Error::Malformed("STAT"))));
}

#[test]
fn datagram_codec() {
    use tokio_util::codec::{Decoder as _, Encoder as _};

    let packet = Packet {
        header: Header {
            session: 0xBEEF,
            sequence: 2,
            opcode: Opcode::OpenDir,
        },
        payload: Bytes::from_static(&[0x00, 0x04]),
    };

    let mut buf = BytesMut::new();
    TnfsCodec.encode(packet.clone(), &mut buf).unwrap();
    assert_eq!(&buf[..], [0xEF, 0xBE, 0x02, 0x10, 0x00, 0x04]);

    let decoded = TnfsCodec.decode(&mut buf).unwrap();
    assert_eq!(decoded, Some(packet));
    assert!(buf.is_empty());

    let mut short = BytesMut::from(&[0xEF, 0xBE, 0x02][..]);
    assert!(TnfsCodec.decode(&mut short).is_err());

    let mut unknown = BytesMut::from(&[0xEF, 0xBE, 0x02, 0x7F, 0x00][..]);
    assert!(TnfsCodec.decode(&mut unknown).is_err());
}

#[test]
fn reply_splits_result_code() {
    let packet = read_packet(Bytes::from_static(&[0xEF, 0xBE, 0x19, 0x11, 0x00, b'f', b'o', b'o', 0])).unwrap();
    let reply = read_reply(packet).unwrap();
    assert_eq!(reply.code, ResultCode::SUCCESS);
    let name: String = decode_body(&reply.body, "READDIR").unwrap();
    assert_eq!(name, "foo");

    let empty = read_packet(Bytes::from_static(&[0xEF, 0xBE, 0x19, 0x11])).unwrap();
    assert!(read_reply(empty).is_err());
}
