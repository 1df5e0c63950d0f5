//! Binary codec for relay protocol frames.
//!
//! Wire format:
//! ```text
//! [source:4][destination:4][payload_kind:4][payload_len:4][magic:4][payload:N]
//! ```
//! Total header size: 20 bytes.  All multi-byte integers are big-endian.

use thiserror::Error;

use crate::protocol::messages::{
    ClientId, FrameHeader, PayloadKind, FRAME_MAGIC, HEADER_SIZE,
};

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The magic value in the header does not match [`FRAME_MAGIC`].
    /// The stream is considered desynchronized; no recovery is attempted.
    #[error("bad frame magic: 0x{0:08X}")]
    BadMagic(u32),

    /// The payload-kind field is not a recognized value.
    #[error("unknown payload kind: 0x{0:08X}")]
    UnknownPayloadKind(u32),

    /// A roster payload whose length is not a multiple of the 4-byte
    /// identifier size.
    #[error("malformed roster payload: {0} bytes is not a whole number of identifiers")]
    MalformedRoster(usize),
}

// ── Header encoding/decoding ──────────────────────────────────────────────────

/// Encodes a [`FrameHeader`] into its 20-byte wire form.
pub fn encode_header(header: &FrameHeader) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&header.source.to_be_bytes());
    buf[4..8].copy_from_slice(&header.destination.to_be_bytes());
    buf[8..12].copy_from_slice(&(header.kind as u32).to_be_bytes());
    buf[12..16].copy_from_slice(&header.payload_len.to_be_bytes());
    buf[16..20].copy_from_slice(&FRAME_MAGIC.to_be_bytes());
    buf
}

/// Decodes one [`FrameHeader`] from the beginning of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if fewer than [`HEADER_SIZE`] bytes are
/// available, the magic check fails, or the payload kind is unknown.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let magic = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let source = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let destination = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let kind_raw = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let kind =
        PayloadKind::try_from(kind_raw).map_err(|_| ProtocolError::UnknownPayloadKind(kind_raw))?;
    let payload_len = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    Ok(FrameHeader {
        source,
        destination,
        kind,
        payload_len,
    })
}

/// Assembles a complete outbound frame (header + payload) in one buffer so
/// it can be handed to a single reliable send.
///
/// The header's `payload_len` is taken from `payload.len()`, overriding
/// whatever the caller put in the struct.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        payload_len: payload.len() as u32,
        ..*header
    };
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&encode_header(&header));
    buf.extend_from_slice(payload);
    buf
}

// ── Roster payload ────────────────────────────────────────────────────────────

/// Encodes a roster payload: each identifier as a big-endian `i32`.
pub fn encode_roster(ids: &[ClientId]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        buf.extend_from_slice(&id.0.to_be_bytes());
    }
    buf
}

/// Decodes a roster payload into the list of client identifiers.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedRoster`] if the length is not a
/// multiple of 4.
pub fn decode_roster(payload: &[u8]) -> Result<Vec<ClientId>, ProtocolError> {
    if payload.len() % 4 != 0 {
        return Err(ProtocolError::MalformedRoster(payload.len()));
    }
    let mut ids = Vec::with_capacity(payload.len() / 4);
    for chunk in payload.chunks_exact(4) {
        ids.push(ClientId(i32::from_be_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3],
        ])));
    }
    Ok(ids)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
