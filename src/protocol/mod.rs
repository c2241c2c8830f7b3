//! MySQL client/server protocol
//!
//! This module handles:
//! * Packet framing (3-byte length + sequence id)
//! * Handshake and authentication messages
//! * Text-protocol command responses

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::{decode_packet, Packet, PayloadReader};
pub use encode::{encode_message, frame_packets};
pub use message::{
    AuthMessage, ColumnDefinition, CommandResponse, EofPacket, ErrPacket, FrontendMessage,
    Handshake, HandshakeResponse, OkPacket, RowMessage,
};
