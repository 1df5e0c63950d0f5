//! Relay protocol frame types.
//!
//! Every logical message on a relay connection is one *frame*: a fixed
//! 20-byte header followed by `payload_len` raw bytes.  The header carries
//! the routing information (who sent it, who should receive it) and a
//! payload kind that tells the receiver how to interpret the bytes.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Magic value embedded in every frame header.
///
/// A header whose trailing four bytes do not decode to this constant is
/// treated as a framing failure: the frame is discarded and the stream is
/// considered desynchronized (no resynchronization is attempted).
pub const FRAME_MAGIC: u32 = 0x524C_5931; // "RLY1"

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Wire value naming the server itself, used as the `source` of every
/// server-originated frame and rejected as a relay destination.
pub const SERVER_SOURCE: i32 = -1;

/// Wire value meaning "deliver to every currently registered client".
pub const BROADCAST_DESTINATION: i32 = -2;

// ── Client identifiers ────────────────────────────────────────────────────────

/// Opaque identifier the server assigns to a connected client.
///
/// The server hands each accepted connection the next value of a
/// monotonically increasing per-server counter (starting at 1) and routes
/// unicast frames by this key directly — there is no separate translation
/// table between protocol identifiers and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub i32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Destinations ──────────────────────────────────────────────────────────────

/// Decoded form of the header's `destination` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Wire value `-1`.  Valid only in server-originated control frames;
    /// a client addressing a relayed message here is protocol misuse.
    Server,
    /// Wire value `-2`: fan out to every registered client.
    Broadcast,
    /// Any other value: a specific client.
    Client(ClientId),
}

impl Destination {
    /// Returns the raw wire representation.
    pub fn to_wire(self) -> i32 {
        match self {
            Destination::Server => SERVER_SOURCE,
            Destination::Broadcast => BROADCAST_DESTINATION,
            Destination::Client(id) => id.0,
        }
    }

    /// Decodes a raw wire value.
    pub fn from_wire(value: i32) -> Self {
        match value {
            SERVER_SOURCE => Destination::Server,
            BROADCAST_DESTINATION => Destination::Broadcast,
            other => Destination::Client(ClientId(other)),
        }
    }
}

// ── Payload kinds ─────────────────────────────────────────────────────────────

/// All payload kinds defined by the relay protocol.
///
/// `Message` and the three `File*` kinds are routed by the server without
/// interpretation; they differ only in how the receiving application treats
/// the bytes.  The remaining kinds are control frames exchanged with the
/// server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PayloadKind {
    /// Server → clients: the server is stopping (or, synthesized client-side,
    /// the connection was closed).  Empty payload.
    Shutdown = 0x01,
    /// Opaque application bytes, relayed as-is.
    Message = 0x02,
    /// Application-level file transfer request, relayed as-is.
    FileRequest = 0x03,
    /// Application-level file transfer answer, relayed as-is.
    FileAnswer = 0x04,
    /// Application-level file data chunk, relayed as-is.
    FileData = 0x05,
    /// Server → newly accepted client: the `destination` field carries the
    /// identifier the server assigned to it.  Empty payload.
    Welcome = 0x06,
    /// Server → existing clients: a new peer connected; the `destination`
    /// field carries the new peer's identifier.  Empty payload.
    PeerJoined = 0x07,
    /// Server → remaining clients: a peer disconnected; the `destination`
    /// field carries the departed peer's identifier.  Empty payload.
    PeerLeft = 0x08,
    /// Client → server: request the roster of connected clients.  Empty
    /// payload.
    RosterRequest = 0x09,
    /// Server → requesting client: payload is a sequence of big-endian
    /// `i32` client identifiers (`payload_len / 4` entries).
    Roster = 0x0A,
}

impl TryFrom<u32> for PayloadKind {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0x01 => Ok(PayloadKind::Shutdown),
            0x02 => Ok(PayloadKind::Message),
            0x03 => Ok(PayloadKind::FileRequest),
            0x04 => Ok(PayloadKind::FileAnswer),
            0x05 => Ok(PayloadKind::FileData),
            0x06 => Ok(PayloadKind::Welcome),
            0x07 => Ok(PayloadKind::PeerJoined),
            0x08 => Ok(PayloadKind::PeerLeft),
            0x09 => Ok(PayloadKind::RosterRequest),
            0x0A => Ok(PayloadKind::Roster),
            _ => Err(()),
        }
    }
}

impl PayloadKind {
    /// `true` for the kinds the server relays between clients without
    /// interpreting the payload.
    pub fn is_relayed(self) -> bool {
        matches!(
            self,
            PayloadKind::Message
                | PayloadKind::FileRequest
                | PayloadKind::FileAnswer
                | PayloadKind::FileData
        )
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// 20-byte header prepended to every frame on the wire.
///
/// `source` and `destination` are kept in raw wire form here; use
/// [`Destination::from_wire`] and [`ClientId`] at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender identity; [`SERVER_SOURCE`] for server-originated frames.
    /// The server overwrites this with the true sender id when relaying.
    pub source: i32,
    /// Routing target, or the subject client id in control frames
    /// (`Welcome`/`PeerJoined`/`PeerLeft`).
    pub destination: i32,
    /// Interpretation of the payload bytes.
    pub kind: PayloadKind,
    /// Length of the payload that immediately follows the header; `0` if
    /// none.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Builds a server-originated control header with an empty payload.
    pub fn control(kind: PayloadKind, destination: i32) -> Self {
        Self {
            source: SERVER_SOURCE,
            destination,
            kind,
            payload_len: 0,
        }
    }
}
