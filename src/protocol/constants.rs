//! MySQL protocol constants

/// Handshake protocol version 10
pub const PROTOCOL_VERSION: u8 = 10;

/// Largest payload carried by a single packet; bigger payloads are split
pub const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

/// Packet header: 3-byte little-endian length + 1-byte sequence id
pub const HEADER_LEN: usize = 4;

/// Length of the authentication scramble sent in the handshake
pub const SCRAMBLE_LEN: usize = 20;

/// utf8mb4_general_ci
pub const DEFAULT_COLLATION: u8 = 45;

/// Capability flags
pub mod capabilities {
    /// Use the improved version of old password authentication
    pub const LONG_PASSWORD: u32 = 0x0000_0001;

    /// Report found rows instead of affected rows
    pub const FOUND_ROWS: u32 = 0x0000_0002;

    /// Longer flags in column definitions
    pub const LONG_FLAG: u32 = 0x0000_0004;

    /// Database name in the handshake response
    pub const CONNECT_WITH_DB: u32 = 0x0000_0008;

    /// `LOAD DATA LOCAL` support
    pub const LOCAL_FILES: u32 = 0x0000_0080;

    /// 4.1 protocol
    pub const PROTOCOL_41: u32 = 0x0000_0200;

    /// Switch to TLS after the handshake
    pub const SSL: u32 = 0x0000_0800;

    /// Transaction status flags in OK/EOF packets
    pub const TRANSACTIONS: u32 = 0x0000_2000;

    /// 4.1 authentication
    pub const SECURE_CONNECTION: u32 = 0x0000_8000;

    /// Multiple statements per COM_QUERY
    pub const MULTI_STATEMENTS: u32 = 0x0001_0000;

    /// Multiple result sets
    pub const MULTI_RESULTS: u32 = 0x0002_0000;

    /// Pluggable authentication
    pub const PLUGIN_AUTH: u32 = 0x0008_0000;

    /// Length-encoded auth response in the handshake response
    pub const PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
}

/// Command bytes
pub mod commands {
    /// Close the connection
    pub const QUIT: u8 = 0x01;

    /// Change the default schema
    pub const INIT_DB: u8 = 0x02;

    /// Text protocol query
    pub const QUERY: u8 = 0x03;

    /// Liveness check
    pub const PING: u8 = 0x0E;
}

/// First payload byte of server responses
pub mod headers {
    /// OK packet
    pub const OK: u8 = 0x00;

    /// Extra authentication data
    pub const AUTH_MORE_DATA: u8 = 0x01;

    /// LOCAL INFILE request; also the NULL marker in text rows
    pub const LOCAL_INFILE: u8 = 0xFB;

    /// EOF packet; also the auth switch request during authentication
    pub const EOF: u8 = 0xFE;

    /// Error packet
    pub const ERR: u8 = 0xFF;
}

/// Server status flags
pub mod status {
    /// Another result set follows
    pub const MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Authentication plugin names and `caching_sha2_password` status bytes
pub mod auth {
    /// mysql_native_password
    pub const NATIVE_PASSWORD: &str = "mysql_native_password";

    /// caching_sha2_password
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

    /// mysql_clear_password
    pub const CLEAR_PASSWORD: &str = "mysql_clear_password";

    /// Scramble matched the server cache
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;

    /// Server wants the password itself
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

const COLLATIONS: &[(&str, u8)] = &[
    ("big5_chinese_ci", 1),
    ("latin1_swedish_ci", 8),
    ("ascii_general_ci", 11),
    ("gbk_chinese_ci", 28),
    ("utf8_general_ci", 33),
    ("utf8mb3_general_ci", 33),
    ("utf8mb4_general_ci", 45),
    ("utf8mb4_bin", 46),
    ("latin1_bin", 47),
    ("binary", 63),
    ("utf8_bin", 83),
    ("utf8mb3_bin", 83),
    ("gbk_bin", 87),
    ("utf8mb4_unicode_ci", 224),
    ("utf8mb4_0900_ai_ci", 255),
];

/// Look up a collation id by name
pub fn collation_id(name: &str) -> Option<u8> {
    COLLATIONS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}
