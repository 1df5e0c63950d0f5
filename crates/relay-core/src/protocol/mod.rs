//! Protocol module containing frame types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_header, decode_roster, encode_frame, encode_header, encode_roster, ProtocolError,
};
pub use messages::*;
