//! Client-side connection session: connect, non-blocking event polling, and
//! frame sending.
//!
//! A [`ClientSession`] owns one TCP connection to a relay server.  It has no
//! background task: the caller drives it by calling [`ClientSession::poll`],
//! which never waits for data to arrive.  Each poll yields at most one
//! [`Event`], returned by value — there is deliberately no event queue, and
//! ownership of the previous event has already passed to the caller.

use std::net::SocketAddr;

use relay_core::{
    decode_header, decode_roster, encode_frame, encode_header, recv_exact, send_all, ClientId,
    Destination, FrameHeader, PayloadKind, BROADCAST_DESTINATION, HEADER_SIZE, SERVER_SOURCE,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, warn};

/// Errors that can occur in the client session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Name resolution for the server address failed.
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: String,
        #[source]
        source: std::io::Error,
    },
    /// Every resolved candidate address refused the connection.
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The session has been disconnected (locally or by the server).
    #[error("session is not connected")]
    NotConnected,
    /// A reliable send moved fewer bytes than the full frame.
    #[error("short send: {sent} of {expected} bytes")]
    Truncated { sent: usize, expected: usize },
    /// The handle does not name an open connection in the registry.
    #[error("unknown connection handle {0}")]
    UnknownHandle(u64),
}

// ── Events ────────────────────────────────────────────────────────────────────

/// One decoded message received from the server.
///
/// Returned by value from [`ClientSession::poll`]; the session keeps no
/// reference to it, so exactly one event per poll is live and the caller
/// decides its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    header: FrameHeader,
    payload: Vec<u8>,
}

impl Event {
    pub(crate) fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn kind(&self) -> PayloadKind {
        self.header.kind
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The client that sent a relayed frame; `None` for server-originated
    /// frames.
    pub fn sender(&self) -> Option<ClientId> {
        if self.header.source == SERVER_SOURCE {
            None
        } else {
            Some(ClientId(self.header.source))
        }
    }

    /// The client a control notification is about: the identifier assigned
    /// by a `Welcome`, or the peer a `PeerJoined`/`PeerLeft` announces.
    /// `None` for every other kind.
    pub fn subject(&self) -> Option<ClientId> {
        match self.header.kind {
            PayloadKind::Welcome | PayloadKind::PeerJoined | PayloadKind::PeerLeft => {
                Some(ClientId(self.header.destination))
            }
            _ => None,
        }
    }

    /// Decodes a `Roster` payload into client identifiers; `None` for other
    /// kinds or a malformed payload.
    pub fn roster(&self) -> Option<Vec<ClientId>> {
        if self.header.kind != PayloadKind::Roster {
            return None;
        }
        decode_roster(&self.payload).ok()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One outgoing connection to a relay server.
pub struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
}

impl ClientSession {
    /// Resolves `host:port` and connects to the first candidate address that
    /// accepts.
    ///
    /// The server sends a `Welcome` frame immediately after accepting; the
    /// caller should [`poll`](Self::poll) for it before treating the session
    /// as usable.
    ///
    /// # Errors
    ///
    /// [`SessionError::Resolve`] if the lookup fails and
    /// [`SessionError::ConnectFailed`] if every candidate refuses.
    pub async fn connect(host: &str, port: &str) -> Result<Self, SessionError> {
        let target = format!("{host}:{port}");
        let addrs = lookup_host(target.as_str())
            .await
            .map_err(|e| SessionError::Resolve {
                host: host.to_string(),
                port: port.to_string(),
                source: e,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(%addr, "connected to relay server");
                    return Ok(Self {
                        stream,
                        peer: addr,
                        connected: true,
                    });
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect candidate failed");
                    last_error = Some(e);
                }
            }
        }
        Err(SessionError::ConnectFailed {
            host: host.to_string(),
            port: port.to_string(),
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
            }),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Non-blocking check for the next event.
    ///
    /// Returns `Ok(None)` immediately when no data is pending.  When the
    /// remote side has closed the connection, the session disconnects
    /// itself and returns a synthetic `Shutdown` event.  A frame that fails
    /// framing (short header, bad magic, truncated payload) is discarded
    /// with a warning and reported as `Ok(None)`; the stream is not
    /// resynchronized afterwards (known limitation).
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] once the session is disconnected, and
    /// I/O errors from the transport.
    pub async fn poll(&mut self) -> Result<Option<Event>, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        let got = match self.stream.try_read(&mut header_buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if got == 0 {
            // Remote closed.  Synthesize the shutdown the server could not
            // send and disconnect this side.
            info!(peer = %self.peer, "remote closed the connection");
            self.connected = false;
            return Ok(Some(Event::new(
                FrameHeader::control(PayloadKind::Shutdown, BROADCAST_DESTINATION),
                Vec::new(),
            )));
        }
        if got < HEADER_SIZE {
            // The bytes read are lost and the stream may be desynchronized;
            // no resynchronization is attempted.
            warn!(peer = %self.peer, got, "short header, frame discarded");
            return Ok(None);
        }

        let header = match decode_header(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "framing failure, frame discarded");
                return Ok(None);
            }
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        if !payload.is_empty() {
            // The payload follows the header on the wire immediately, so
            // this receive is bounded in practice.
            let n = recv_exact(&mut self.stream, &mut payload).await?;
            if n < payload.len() {
                warn!(
                    peer = %self.peer,
                    got = n,
                    expected = payload.len(),
                    "truncated payload, frame discarded"
                );
                // The close that truncated it surfaces on the next poll.
                return Ok(None);
            }
        }

        if header.kind == PayloadKind::Shutdown {
            info!(peer = %self.peer, "server is shutting down");
            self.connected = false;
        }

        Ok(Some(Event::new(header, payload)))
    }

    /// Frames `message` as a `Message` payload for `destination` and sends
    /// it.  The server stamps the true source; this side leaves it zero.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], I/O errors, or
    /// [`SessionError::Truncated`] when the reliable send came up short.
    pub async fn send(
        &mut self,
        destination: Destination,
        message: &[u8],
    ) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let frame = encode_frame(
            &FrameHeader {
                source: 0,
                destination: destination.to_wire(),
                kind: PayloadKind::Message,
                payload_len: 0,
            },
            message,
        );
        let sent = send_all(&mut self.stream, &frame).await?;
        if sent < frame.len() {
            return Err(SessionError::Truncated {
                sent,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    /// Asks the server for the roster of connected clients.  The reply
    /// arrives as a `Roster` event on a later poll.
    pub async fn request_roster(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let frame = encode_header(&FrameHeader {
            source: 0,
            destination: SERVER_SOURCE,
            kind: PayloadKind::RosterRequest,
            payload_len: 0,
        });
        let sent = send_all(&mut self.stream, &frame).await?;
        if sent < frame.len() {
            return Err(SessionError::Truncated {
                sent,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    /// Closes the connection.  Safe to call repeatedly; only the first call
    /// does anything.
    pub async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "shutdown after disconnect failed");
        }
        info!(peer = %self.peer, "disconnected");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
