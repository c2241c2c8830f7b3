//! Protocol message types

use bytes::Bytes;
use std::fmt;

/// Initial handshake (server → client)
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Protocol version (always 10)
    pub protocol_version: u8,
    /// Human-readable server version
    pub server_version: String,
    /// Server thread id
    pub connection_id: u32,
    /// Authentication scramble (parts 1 and 2 joined)
    pub scramble: Vec<u8>,
    /// Server capability flags
    pub capabilities: u32,
    /// Server default collation
    pub collation: u8,
    /// Server status flags
    pub status: u16,
    /// Default authentication plugin
    pub auth_plugin: String,
}

/// Handshake response (client → server)
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// Client capability flags
    pub capabilities: u32,
    /// Max packet size the client accepts
    pub max_packet_size: u32,
    /// Connection collation
    pub collation: u8,
    /// Username
    pub user: String,
    /// Scrambled password
    pub auth_response: Vec<u8>,
    /// Initial schema
    pub database: Option<String>,
    /// Plugin that produced `auth_response`
    pub auth_plugin: String,
}

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Handshake response
    HandshakeResponse(HandshakeResponse),

    /// SSL request sent before upgrading to TLS
    SslRequest {
        /// Client capability flags (includes CLIENT_SSL)
        capabilities: u32,
        /// Max packet size
        max_packet_size: u32,
        /// Connection collation
        collation: u8,
    },

    /// Raw authentication data (auth switch response, cleartext password)
    AuthData(Vec<u8>),

    /// Chunk of a LOCAL INFILE upload; empty marks the end
    InfileData(Bytes),

    /// COM_QUIT
    Quit,

    /// COM_INIT_DB
    InitDb(String),

    /// COM_QUERY
    Query(String),

    /// COM_PING
    Ping,
}

/// OK packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows affected
    pub affected_rows: u64,
    /// Last AUTO_INCREMENT id
    pub last_insert_id: u64,
    /// Server status flags
    pub status: u16,
    /// Warning count
    pub warnings: u16,
    /// Human-readable info
    pub info: String,
}

/// EOF packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    /// Warning count
    pub warnings: u16,
    /// Server status flags
    pub status: u16,
}

/// Error packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrPacket {
    /// MySQL error number
    pub code: u16,
    /// SQLSTATE (`HY000` when the server sent none)
    pub state: String,
    /// Human-readable message
    pub message: String,
}

impl fmt::Display for ErrPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.state, self.message)
    }
}

impl From<ErrPacket> for crate::Error {
    fn from(err: ErrPacket) -> Self {
        crate::Error::Server {
            code: err.code,
            state: err.state,
            message: err.message,
        }
    }
}

/// Server message during authentication
#[derive(Debug, Clone)]
pub enum AuthMessage {
    /// Authentication succeeded
    Ok(OkPacket),

    /// Authentication rejected
    Error(ErrPacket),

    /// Server asks to restart with another plugin
    Switch {
        /// Plugin name
        plugin: String,
        /// New scramble
        data: Vec<u8>,
    },

    /// Plugin-specific continuation
    MoreData(Vec<u8>),
}

/// Server response to COM_QUERY
#[derive(Debug, Clone)]
pub enum CommandResponse {
    /// Statement without result set
    Ok(OkPacket),

    /// Statement failed
    Error(ErrPacket),

    /// Server requests a client-side file
    LocalInfile(String),

    /// Result set header
    ResultSet {
        /// Number of column definitions that follow
        column_count: u64,
    },
}

/// Column definition (4.1 format)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Schema name
    pub schema: String,
    /// Table alias
    pub table: String,
    /// Column alias
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Character set / collation id
    pub collation: u16,
    /// Maximum display length
    pub length: u32,
    /// Column type
    pub column_type: u8,
    /// Column flags
    pub flags: u16,
    /// Decimal digits
    pub decimals: u8,
}

/// Packet inside a result set after the column definitions
#[derive(Debug, Clone)]
pub enum RowMessage {
    /// Text row (`None` is SQL NULL)
    Row(Vec<Option<Bytes>>),

    /// End of rows
    Eof(EofPacket),

    /// Query failed while streaming rows
    Error(ErrPacket),
}
