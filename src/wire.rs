//! Byte-level framing shared by every link.
//!
//! All integers travel as 4-byte signed values in host byte order; peers are
//! assumed to share an architecture. Frames carry no tag, so meaning is
//! purely positional.
//!
//! | Frame | Layout |
//! |-------|--------|
//! | int | `i32` |
//! | array | `i32 n`, then `n * i32` |
//! | string | `i32 n` (terminator included), then `n` bytes, NUL-terminated |
//! | registration | `REGISTRATION:<ip>:<port>` + NUL |
//! | neighbor | `i32 flag`, then if set: 16-byte NUL-padded IP, `i32 port` |

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Width of the fixed IP field in a neighbor record (`INET_ADDRSTRLEN`).
pub const INET_ADDRSTRLEN: usize = 16;

/// Prefix every worker registration starts with.
pub const REGISTRATION_PREFIX: &str = "REGISTRATION:";

/// Upper bound on a registration message, terminator included.
const REGISTRATION_MAX_LEN: usize = 1024;

const INT_WIDTH: usize = std::mem::size_of::<i32>();

pub(crate) fn write_int<W: Write>(w: &mut W, value: i32) -> Result<()> {
    w.write_all(&value.to_ne_bytes())?;
    Ok(())
}

pub(crate) fn read_int<R: Read>(r: &mut R) -> Result<i32> {
    let mut raw = [0u8; INT_WIDTH];
    r.read_exact(&mut raw)?;
    Ok(i32::from_ne_bytes(raw))
}

fn read_len<R: Read>(r: &mut R) -> Result<usize> {
    let n = read_int(r)?;
    usize::try_from(n).map_err(|_| Error::InvalidCount(i64::from(n)))
}

fn wire_len(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::InvalidCount(n as i64))
}

pub(crate) fn write_ints<W: Write>(w: &mut W, data: &[i32]) -> Result<()> {
    let mut frame = BytesMut::with_capacity(INT_WIDTH * (data.len() + 1));
    frame.put_i32_ne(wire_len(data.len())?);
    for &v in data {
        frame.put_i32_ne(v);
    }
    w.write_all(&frame)?;
    Ok(())
}

/// Reads an array frame into a buffer sized exactly to the received count.
pub(crate) fn read_ints<R: Read>(r: &mut R) -> Result<Vec<i32>> {
    let n = read_len(r)?;
    let mut raw = vec![0u8; n * INT_WIDTH];
    r.read_exact(&mut raw)?;
    let mut buf = &raw[..];
    let mut out = Vec::with_capacity(n);
    while buf.has_remaining() {
        out.push(buf.get_i32_ne());
    }
    Ok(out)
}

pub(crate) fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let mut frame = BytesMut::with_capacity(INT_WIDTH + s.len() + 1);
    frame.put_i32_ne(wire_len(s.len() + 1)?);
    frame.put_slice(s.as_bytes());
    frame.put_u8(0);
    w.write_all(&frame)?;
    Ok(())
}

pub(crate) fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let n = read_len(r)?;
    let mut raw = vec![0u8; n];
    r.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw.truncate(end);
    String::from_utf8(raw).map_err(|_| Error::Protocol("broadcast is not valid UTF-8".into()))
}

pub(crate) fn write_registration<W: Write>(w: &mut W, addr: SocketAddrV4) -> Result<()> {
    let text = format!("{REGISTRATION_PREFIX}{}:{}", addr.ip(), addr.port());
    let mut frame = BytesMut::with_capacity(text.len() + 1);
    frame.put_slice(text.as_bytes());
    frame.put_u8(0);
    w.write_all(&frame)?;
    Ok(())
}

/// Reads one registration with a single bounded read and returns the
/// advertised ring address.
///
/// Whatever arrived is cut at the first NUL (or taken whole when there is
/// none) and parsed; the reader's timeout bounds how long a silent peer can
/// hold the caller.
pub(crate) fn read_registration<R: Read>(r: &mut R) -> Result<SocketAddrV4> {
    let mut raw = [0u8; REGISTRATION_MAX_LEN];
    let n = loop {
        match r.read(&mut raw) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };
    if n == 0 {
        return Err(Error::Registration("peer closed before registering".into()));
    }
    let end = raw[..n].iter().position(|&b| b == 0).unwrap_or(n);
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| Error::Registration("registration is not valid UTF-8".into()))?;
    parse_registration(text)
}

pub(crate) fn parse_registration(text: &str) -> Result<SocketAddrV4> {
    let body = text
        .strip_prefix(REGISTRATION_PREFIX)
        .ok_or_else(|| Error::Registration(format!("missing prefix in {text:?}")))?;
    let (ip, port) = body
        .rsplit_once(':')
        .ok_or_else(|| Error::Registration(format!("missing port in {text:?}")))?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::Registration(format!("bad IPv4 address {ip:?}")))?;
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| Error::Registration(format!("bad port {port:?}")))?;
    Ok(SocketAddrV4::new(ip, port))
}

pub(crate) fn write_neighbor<W: Write>(w: &mut W, right: Option<SocketAddrV4>) -> Result<()> {
    let mut frame = BytesMut::with_capacity(2 * INT_WIDTH + INET_ADDRSTRLEN);
    match right {
        None => frame.put_i32_ne(0),
        Some(addr) => {
            frame.put_i32_ne(1);
            let ip = addr.ip().to_string();
            let mut field = [0u8; INET_ADDRSTRLEN];
            field[..ip.len()].copy_from_slice(ip.as_bytes());
            frame.put_slice(&field);
            frame.put_i32_ne(i32::from(addr.port()));
        }
    }
    w.write_all(&frame)?;
    Ok(())
}

pub(crate) fn read_neighbor<R: Read>(r: &mut R) -> Result<Option<SocketAddrV4>> {
    if read_int(r)? == 0 {
        return Ok(None);
    }
    let mut field = [0u8; INET_ADDRSTRLEN];
    r.read_exact(&mut field)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(INET_ADDRSTRLEN);
    let ip: Ipv4Addr = std::str::from_utf8(&field[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Registration("bad neighbor address".into()))?;
    let port = read_int(r)?;
    let port = u16::try_from(port)
        .map_err(|_| Error::Registration(format!("bad neighbor port {port}")))?;
    Ok(Some(SocketAddrV4::new(ip, port)))
}

/// Narrows a socket address to the IPv4 form the neighbor record can carry.
pub(crate) fn as_v4(addr: SocketAddr) -> Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(v6) => v6
            .ip()
            .to_ipv4_mapped()
            .map(|ip| SocketAddrV4::new(ip, v6.port()))
            .ok_or_else(|| Error::Registration(format!("{addr} is not IPv4"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn int_is_four_host_order_bytes() {
        let mut out = Vec::new();
        write_int(&mut out, -2).unwrap();
        assert_eq!(out, (-2i32).to_ne_bytes());
        assert_eq!(read_int(&mut Cursor::new(out)).unwrap(), -2);
    }

    #[test]
    fn array_frame_is_length_prefixed() {
        let mut out = Vec::new();
        write_ints(&mut out, &[5, 3, 8]).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &3i32.to_ne_bytes());
        assert_eq!(read_ints(&mut Cursor::new(out)).unwrap(), vec![5, 3, 8]);
    }

    #[test]
    fn empty_array_is_just_a_length() {
        let mut out = Vec::new();
        write_ints(&mut out, &[]).unwrap();
        assert_eq!(out, 0i32.to_ne_bytes());
        assert!(read_ints(&mut Cursor::new(out)).unwrap().is_empty());
    }

    #[test]
    fn negative_array_length_is_rejected() {
        let raw = (-4i32).to_ne_bytes().to_vec();
        assert!(matches!(
            read_ints(&mut Cursor::new(raw)),
            Err(Error::InvalidCount(-4))
        ));
    }

    #[test]
    fn string_length_counts_terminator() {
        let mut out = Vec::new();
        write_str(&mut out, "ODD").unwrap();
        assert_eq!(&out[..4], &4i32.to_ne_bytes());
        assert_eq!(&out[4..], b"ODD\0");
        assert_eq!(read_str(&mut Cursor::new(out)).unwrap(), "ODD");
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let mut out = Vec::new();
        write_ints(&mut out, &[1, 2]).unwrap();
        out.truncate(9);
        let err = read_ints(&mut Cursor::new(out)).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn registration_text() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 8555);
        let mut out = Vec::new();
        write_registration(&mut out, addr).unwrap();
        assert_eq!(out, b"REGISTRATION:10.0.0.7:8555\0");
        assert_eq!(read_registration(&mut Cursor::new(out)).unwrap(), addr);
    }

    #[test]
    fn registration_without_terminator_is_taken_whole() {
        let raw = b"REGISTRATION:127.0.0.1:5555".to_vec();
        assert_eq!(
            read_registration(&mut Cursor::new(raw)).unwrap(),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5555)
        );
    }

    #[test]
    fn registration_reads_at_most_one_buffer() {
        let mut raw = b"REGISTRATION:".to_vec();
        raw.resize(REGISTRATION_MAX_LEN * 2, b'9');
        let mut cursor = Cursor::new(raw);
        assert!(matches!(
            read_registration(&mut cursor),
            Err(Error::Registration(_))
        ));
        assert_eq!(cursor.position() as usize, REGISTRATION_MAX_LEN);
    }

    #[test]
    fn closed_peer_is_not_a_registration() {
        assert!(matches!(
            read_registration(&mut Cursor::new(Vec::new())),
            Err(Error::Registration(_))
        ));
    }

    #[test]
    fn malformed_registration() {
        assert!(parse_registration("HELLO:1.2.3.4:5").is_err());
        assert!(parse_registration("REGISTRATION:1.2.3.4").is_err());
        assert!(parse_registration("REGISTRATION:nothost:80").is_err());
        assert!(parse_registration("REGISTRATION:1.2.3.4:99999").is_err());
    }

    #[test]
    fn neighbor_record_layout() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 100, 200), 9001);
        let mut out = Vec::new();
        write_neighbor(&mut out, Some(addr)).unwrap();
        assert_eq!(out.len(), 4 + INET_ADDRSTRLEN + 4);
        assert_eq!(read_neighbor(&mut Cursor::new(out)).unwrap(), Some(addr));

        let mut none = Vec::new();
        write_neighbor(&mut none, None).unwrap();
        assert_eq!(none.len(), 4);
        assert_eq!(read_neighbor(&mut Cursor::new(none)).unwrap(), None);
    }
}
