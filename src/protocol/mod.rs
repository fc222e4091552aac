//! Wire protocol: handshake and packet framing
//!
//! Pure (de)serialization, no I/O.

pub mod handshake;
pub mod packet;

pub use handshake::{
    decode_handshake, encode_handshake, handshake_length, StreamHandshake, StreamInfo, StreamMode,
};
pub use packet::{decode_frame, encode_frame, MediaPacket, PacketHeader};
