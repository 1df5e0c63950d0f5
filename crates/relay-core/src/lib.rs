//! # relay-core
//!
//! Shared library for the relay message broker containing the wire protocol
//! codec and the reliable transmission primitives.
//!
//! This crate is used by both the broker (server) and client crates.  It has
//! no networking policy of its own: it defines how frames look on the wire
//! and how to move an exact number of bytes over an async stream, nothing
//! more.
//!
//! # Architecture overview
//!
//! The relay is a minimal message broker over TCP.  A process runs one or
//! more independently addressable servers; each server accepts client
//! connections, assigns each client an identifier, and routes typed frames
//! between clients (unicast or broadcast).
//!
//! This crate defines the two leaf layers everything else builds on:
//!
//! - **`protocol`** – How bytes travel over the network.  Every logical
//!   message is a 20-byte big-endian header (source, destination, payload
//!   kind, payload length, magic) followed by the payload.
//!
//! - **`transport`** – `send_all`/`recv_exact` loops that tolerate short
//!   transfers from the OS and report short counts on failure, so the
//!   layers above can reason about "exactly one frame" rather than raw
//!   socket semantics.

pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::ClientId` instead of `relay_core::protocol::messages::ClientId`.
pub use protocol::codec::{
    decode_header, decode_roster, encode_frame, encode_header, encode_roster, ProtocolError,
};
pub use protocol::messages::{
    ClientId, Destination, FrameHeader, PayloadKind, BROADCAST_DESTINATION, FRAME_MAGIC,
    HEADER_SIZE, SERVER_SOURCE,
};
pub use transport::{recv_exact, send_all};
