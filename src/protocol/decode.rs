//! Protocol message decoding

use super::constants::{auth, headers, HEADER_LEN};
use super::message::{
    AuthMessage, ColumnDefinition, CommandResponse, EofPacket, ErrPacket, Handshake, OkPacket,
    RowMessage,
};
use bytes::{Bytes, BytesMut};
use std::io;

/// Raw packet: sequence id and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence id
    pub seq: u8,
    /// Payload (header stripped)
    pub payload: Bytes,
}

fn eof(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
}

fn invalid(what: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, what)
}

/// Decode one packet from the front of the buffer.
///
/// Returns the packet and the number of bytes consumed; the caller advances the
/// buffer. Incomplete input yields `UnexpectedEof`.
pub fn decode_packet(data: &BytesMut) -> io::Result<(Packet, usize)> {
    if data.len() < HEADER_LEN {
        return Err(eof("incomplete packet header"));
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], 0]) as usize;
    let seq = data[3];

    if data.len() < HEADER_LEN + len {
        return Err(eof("incomplete packet body"));
    }

    let payload = Bytes::copy_from_slice(&data[HEADER_LEN..HEADER_LEN + len]);
    Ok((Packet { seq, payload }, HEADER_LEN + len))
}

/// Cursor over a packet payload
pub struct PayloadReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes left
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Peek the next byte
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// Read one byte
    pub fn u8(&mut self) -> io::Result<u8> {
        let b = self.peek().ok_or_else(|| eof("u8"))?;
        self.offset += 1;
        Ok(b)
    }

    /// Read a little-endian u16
    pub fn u16(&mut self) -> io::Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32
    pub fn u32(&mut self) -> io::Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read `n` bytes
    pub fn bytes(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(eof("fixed-length bytes"));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Read everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.offset..];
        self.offset = self.data.len();
        slice
    }

    /// Read a NUL-terminated string; a missing terminator consumes the rest
    pub fn null_str(&mut self) -> String {
        let rest = &self.data[self.offset..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.offset += end + 1;
                String::from_utf8_lossy(&rest[..end]).into_owned()
            }
            None => {
                self.offset = self.data.len();
                String::from_utf8_lossy(rest).into_owned()
            }
        }
    }

    /// Read a length-encoded integer
    pub fn lenenc_int(&mut self) -> io::Result<u64> {
        let first = self.u8()?;
        match first {
            0x00..=0xFA => Ok(first as u64),
            0xFC => Ok(self.u16()? as u64),
            0xFD => {
                let b = self.bytes(3)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64)
            }
            0xFE => {
                let b = self.bytes(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                Ok(u64::from_le_bytes(buf))
            }
            other => Err(invalid(format!(
                "invalid length-encoded integer prefix: 0x{:02X}",
                other
            ))),
        }
    }

    /// Read a length-encoded byte string
    pub fn lenenc_bytes(&mut self) -> io::Result<&'a [u8]> {
        let len = self.lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| invalid("string length overflow".into()))?;
        self.bytes(len)
    }

    /// Read a length-encoded string
    pub fn lenenc_str(&mut self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(self.lenenc_bytes()?).into_owned())
    }
}

/// Decode the initial handshake (protocol version 10)
pub fn decode_handshake(data: &[u8]) -> io::Result<Handshake> {
    use super::constants::capabilities::{PLUGIN_AUTH, SECURE_CONNECTION};

    let mut r = PayloadReader::new(data);
    let protocol_version = r.u8()?;
    if protocol_version != super::constants::PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported handshake protocol version: {}", protocol_version),
        ));
    }

    let server_version = r.null_str();
    let connection_id = r.u32()?;
    let mut scramble = r.bytes(8)?.to_vec();
    r.u8()?; // filler
    let mut capabilities = r.u16()? as u32;

    let mut collation = 0;
    let mut status = 0;
    let mut auth_plugin = auth::NATIVE_PASSWORD.to_string();

    if r.remaining() > 0 {
        collation = r.u8()?;
        status = r.u16()?;
        capabilities |= (r.u16()? as u32) << 16;
        let auth_data_len = r.u8()? as usize;
        r.bytes(10)?; // reserved

        if capabilities & SECURE_CONNECTION != 0 {
            let part2_len = auth_data_len.saturating_sub(8).max(13).min(r.remaining());
            let part2 = r.bytes(part2_len)?;
            let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
            scramble.extend_from_slice(part2);
        }

        if capabilities & PLUGIN_AUTH != 0 {
            let plugin = r.null_str();
            if !plugin.is_empty() {
                auth_plugin = plugin;
            }
        }
    }

    Ok(Handshake {
        protocol_version,
        server_version,
        connection_id,
        scramble,
        capabilities,
        collation,
        status,
        auth_plugin,
    })
}

/// Decode an OK packet (header byte included)
pub fn decode_ok(data: &[u8]) -> io::Result<OkPacket> {
    let mut r = PayloadReader::new(data);
    r.u8()?; // header
    let affected_rows = r.lenenc_int()?;
    let last_insert_id = r.lenenc_int()?;
    let status = r.u16()?;
    let warnings = r.u16()?;
    let info = String::from_utf8_lossy(r.rest()).into_owned();
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status,
        warnings,
        info,
    })
}

/// Decode an error packet (header byte included)
pub fn decode_err(data: &[u8]) -> io::Result<ErrPacket> {
    let mut r = PayloadReader::new(data);
    r.u8()?; // header
    let code = r.u16()?;
    let state = if r.peek() == Some(b'#') {
        r.u8()?;
        String::from_utf8_lossy(r.bytes(5)?).into_owned()
    } else {
        "HY000".to_string()
    };
    let message = String::from_utf8_lossy(r.rest()).into_owned();
    Ok(ErrPacket {
        code,
        state,
        message,
    })
}

/// Decode an EOF packet (header byte included)
pub fn decode_eof(data: &[u8]) -> io::Result<EofPacket> {
    let mut r = PayloadReader::new(data);
    r.u8()?; // header
    if r.remaining() < 4 {
        return Ok(EofPacket::default());
    }
    let warnings = r.u16()?;
    let status = r.u16()?;
    Ok(EofPacket { warnings, status })
}

fn is_eof(data: &[u8]) -> bool {
    data.first() == Some(&headers::EOF) && data.len() < 9
}

/// Decode a server packet received during authentication
pub fn decode_auth_message(data: &[u8]) -> io::Result<AuthMessage> {
    let header = *data.first().ok_or_else(|| eof("auth packet header"))?;
    match header {
        headers::OK => Ok(AuthMessage::Ok(decode_ok(data)?)),
        headers::ERR => Ok(AuthMessage::Error(decode_err(data)?)),
        headers::EOF => {
            let mut r = PayloadReader::new(&data[1..]);
            let plugin = r.null_str();
            let rest = r.rest();
            let data = rest.strip_suffix(&[0]).unwrap_or(rest).to_vec();
            Ok(AuthMessage::Switch { plugin, data })
        }
        headers::AUTH_MORE_DATA => Ok(AuthMessage::MoreData(data[1..].to_vec())),
        other => Err(invalid(format!(
            "unexpected packet during authentication: 0x{:02X}",
            other
        ))),
    }
}

/// Decode the first response packet to COM_QUERY
pub fn decode_command_response(data: &[u8]) -> io::Result<CommandResponse> {
    let header = *data.first().ok_or_else(|| eof("response header"))?;
    match header {
        headers::OK => Ok(CommandResponse::Ok(decode_ok(data)?)),
        headers::ERR => Ok(CommandResponse::Error(decode_err(data)?)),
        headers::LOCAL_INFILE => Ok(CommandResponse::LocalInfile(
            String::from_utf8_lossy(&data[1..]).into_owned(),
        )),
        _ => {
            let column_count = PayloadReader::new(data).lenenc_int()?;
            Ok(CommandResponse::ResultSet { column_count })
        }
    }
}

/// Decode a column definition (4.1 format)
pub fn decode_column_definition(data: &[u8]) -> io::Result<ColumnDefinition> {
    let mut r = PayloadReader::new(data);
    r.lenenc_bytes()?; // catalog ("def")
    let schema = r.lenenc_str()?;
    let table = r.lenenc_str()?;
    r.lenenc_bytes()?; // org_table
    let name = r.lenenc_str()?;
    let org_name = r.lenenc_str()?;
    r.lenenc_int()?; // length of fixed fields (0x0c)
    let collation = r.u16()?;
    let length = r.u32()?;
    let column_type = r.u8()?;
    let flags = r.u16()?;
    let decimals = r.u8()?;
    Ok(ColumnDefinition {
        schema,
        table,
        name,
        org_name,
        collation,
        length,
        column_type,
        flags,
        decimals,
    })
}

/// Decode a packet inside a text result set
pub fn decode_row(data: &[u8], column_count: usize) -> io::Result<RowMessage> {
    if is_eof(data) {
        return Ok(RowMessage::Eof(decode_eof(data)?));
    }
    if data.first() == Some(&headers::ERR) {
        return Ok(RowMessage::Error(decode_err(data)?));
    }

    let mut r = PayloadReader::new(data);
    let mut values = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if r.peek() == Some(headers::LOCAL_INFILE) {
            r.u8()?;
            values.push(None);
        } else {
            values.push(Some(Bytes::copy_from_slice(r.lenenc_bytes()?)));
        }
    }
    Ok(RowMessage::Row(values))
}

/// Whether a result-set terminator announces more result sets
pub fn has_more_results(status: u16) -> bool {
    status & super::constants::status::MORE_RESULTS_EXISTS != 0
}
