//! Protocol message encoding

use super::constants::{capabilities, commands, MAX_PACKET_SIZE};
use super::message::{FrontendMessage, HandshakeResponse};
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into a packet payload (no header)
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::HandshakeResponse(resp) => {
            encode_handshake_response(&mut buf, resp)?;
        }
        FrontendMessage::SslRequest {
            capabilities,
            max_packet_size,
            collation,
        } => {
            encode_ssl_request(&mut buf, *capabilities, *max_packet_size, *collation);
        }
        FrontendMessage::AuthData(data) => {
            buf.put_slice(data);
        }
        FrontendMessage::InfileData(data) => {
            buf.put_slice(data);
        }
        FrontendMessage::Quit => {
            buf.put_u8(commands::QUIT);
        }
        FrontendMessage::InitDb(database) => {
            buf.put_u8(commands::INIT_DB);
            buf.put_slice(database.as_bytes());
        }
        FrontendMessage::Query(query) => {
            buf.put_u8(commands::QUERY);
            buf.put_slice(query.as_bytes());
        }
        FrontendMessage::Ping => {
            buf.put_u8(commands::PING);
        }
    }

    Ok(buf)
}

fn encode_ssl_request(buf: &mut BytesMut, caps: u32, max_packet_size: u32, collation: u8) {
    buf.put_u32_le(caps);
    buf.put_u32_le(max_packet_size);
    buf.put_u8(collation);
    buf.put_bytes(0, 23);
}

fn encode_handshake_response(buf: &mut BytesMut, resp: &HandshakeResponse) -> io::Result<()> {
    if resp.user.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "user name contains NUL byte",
        ));
    }

    encode_ssl_request(buf, resp.capabilities, resp.max_packet_size, resp.collation);

    buf.put_slice(resp.user.as_bytes());
    buf.put_u8(0);

    if resp.capabilities & capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        put_lenenc_bytes(buf, &resp.auth_response);
    } else {
        let len = u8::try_from(resp.auth_response.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "auth response too long")
        })?;
        buf.put_u8(len);
        buf.put_slice(&resp.auth_response);
    }

    if resp.capabilities & capabilities::CONNECT_WITH_DB != 0 {
        if let Some(db) = &resp.database {
            buf.put_slice(db.as_bytes());
        }
        buf.put_u8(0);
    }

    if resp.capabilities & capabilities::PLUGIN_AUTH != 0 {
        buf.put_slice(resp.auth_plugin.as_bytes());
        buf.put_u8(0);
    }

    Ok(())
}

/// Write a length-encoded integer
pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    match value {
        0..=250 => buf.put_u8(value as u8),
        251..=0xFFFF => {
            buf.put_u8(0xFC);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            buf.put_u8(0xFD);
            buf.put_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            buf.put_u8(0xFE);
            buf.put_u64_le(value);
        }
    }
}

/// Write a length-encoded byte string
pub fn put_lenenc_bytes(buf: &mut BytesMut, data: &[u8]) {
    put_lenenc_int(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Frame a payload into one or more packets.
///
/// Payloads of `MAX_PACKET_SIZE` bytes or more are split; an exact multiple is
/// followed by an empty packet. `seq` is advanced once per packet written.
pub fn frame_packets(buf: &mut BytesMut, seq: &mut u8, payload: &[u8]) {
    let mut chunks = payload.chunks(MAX_PACKET_SIZE);

    loop {
        let chunk = chunks.next().unwrap_or(&[]);
        put_header(buf, chunk.len(), *seq);
        buf.put_slice(chunk);
        *seq = seq.wrapping_add(1);

        // An undersized (possibly empty) packet terminates the payload
        if chunk.len() < MAX_PACKET_SIZE {
            break;
        }
    }
}

fn put_header(buf: &mut BytesMut, len: usize, seq: u8) {
    let len = len as u32;
    buf.put_slice(&len.to_le_bytes()[..3]);
    buf.put_u8(seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DEFAULT_COLLATION;

    #[test]
    fn test_encode_ping() {
        let buf = encode_message(&FrontendMessage::Ping).unwrap();
        assert_eq!(&buf[..], &[commands::PING]);
    }

    #[test]
    fn test_encode_query() {
        let buf = encode_message(&FrontendMessage::Query("SELECT 1".into())).unwrap();
        assert_eq!(buf[0], commands::QUERY);
        assert_eq!(&buf[1..], b"SELECT 1");
    }

    #[test]
    fn test_encode_ssl_request_is_32_bytes() {
        let buf = encode_message(&FrontendMessage::SslRequest {
            capabilities: capabilities::SSL | capabilities::PROTOCOL_41,
            max_packet_size: MAX_PACKET_SIZE as u32,
            collation: DEFAULT_COLLATION,
        })
        .unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(buf[8], DEFAULT_COLLATION);
    }

    #[test]
    fn test_encode_handshake_response() {
        let caps = capabilities::PROTOCOL_41
            | capabilities::SECURE_CONNECTION
            | capabilities::PLUGIN_AUTH
            | capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA
            | capabilities::CONNECT_WITH_DB;
        let resp = HandshakeResponse {
            capabilities: caps,
            max_packet_size: MAX_PACKET_SIZE as u32,
            collation: DEFAULT_COLLATION,
            user: "root".into(),
            auth_response: vec![1, 2, 3],
            database: Some("test".into()),
            auth_plugin: "mysql_native_password".into(),
        };
        let buf = encode_message(&FrontendMessage::HandshakeResponse(resp)).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"root\0");
        expected.extend_from_slice(&[3, 1, 2, 3]);
        expected.extend_from_slice(b"test\0");
        expected.extend_from_slice(b"mysql_native_password\0");
        assert_eq!(&buf[32..], &expected[..]);
    }

    #[test]
    fn test_handshake_response_rejects_nul_user() {
        let resp = HandshakeResponse {
            capabilities: 0,
            max_packet_size: 0,
            collation: 0,
            user: "ro\0ot".into(),
            auth_response: Vec::new(),
            database: None,
            auth_plugin: String::new(),
        };
        assert!(encode_message(&FrontendMessage::HandshakeResponse(resp)).is_err());
    }

    #[test]
    fn test_lenenc_int() {
        let mut buf = BytesMut::new();
        put_lenenc_int(&mut buf, 250);
        put_lenenc_int(&mut buf, 251);
        put_lenenc_int(&mut buf, 0x10000);
        assert_eq!(&buf[..], &[250, 0xFC, 251, 0, 0xFD, 0, 0, 1]);
    }

    #[test]
    fn test_frame_small_packet() {
        let mut buf = BytesMut::new();
        let mut seq = 0;
        frame_packets(&mut buf, &mut seq, &[commands::PING]);
        assert_eq!(&buf[..], &[1, 0, 0, 0, commands::PING]);
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_frame_exact_max_size_adds_empty_packet() {
        let payload = vec![0u8; MAX_PACKET_SIZE];
        let mut buf = BytesMut::new();
        let mut seq = 5;
        frame_packets(&mut buf, &mut seq, &payload);
        assert_eq!(seq, 7);
        assert_eq!(buf.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&buf[buf.len() - 4..], &[0, 0, 0, 6]);
    }
}
