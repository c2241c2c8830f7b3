#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use mysqltest_conn::protocol::decode::{
    decode_auth_message, decode_command_response, decode_handshake,
};
use mysqltest_conn::protocol::decode_packet;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Several packets may arrive in a single TCP segment
    while !buf.is_empty() {
        match decode_packet(&buf) {
            Ok((packet, consumed)) => {
                if consumed == 0 {
                    break;
                }
                buf.advance(consumed);

                let _ = decode_handshake(&packet.payload);
                let _ = decode_auth_message(&packet.payload);
                let _ = decode_command_response(&packet.payload);
            }
            Err(_) => break,
        }
    }
});
