//! The per-server engine: one task multiplexing the listening socket, every
//! client connection, and the stop signal.
//!
//! Architecture:
//! - The engine task owns the listener and the [`ClientRegistry`] (write
//!   halves of all client sockets).  Nothing else touches either, so
//!   routing and fan-out need no locks.
//! - Each accepted connection gets a dedicated reader task that decodes
//!   frames and forwards them as [`SocketEvent`]s on an `mpsc` channel.
//! - The engine's `tokio::select!` loop is the single consumer: accepts,
//!   inbound frames, and the supervisor's stop signal are processed strictly
//!   in arrival order, which is what gives broadcasts their per-peer
//!   ordering guarantee.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    decode_header, encode_frame, encode_header, encode_roster, recv_exact, send_all, ClientId,
    Destination, FrameHeader, PayloadKind, BROADCAST_DESTINATION, HEADER_SIZE, SERVER_SOURCE,
};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::registry::{ClientEntry, ClientRegistry};

/// How long a reader task waits before retrying after a hard read error.
/// A hard error does not drop the client, so without pacing a persistently
/// failing socket could spin its reader task.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// IP-version policy for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpPolicy {
    /// Bind `0.0.0.0` only.
    V4,
    /// Bind `[::]` only.
    V6,
    /// Try `[::]` first (which usually also accepts v4-mapped peers), then
    /// fall back to `0.0.0.0`.
    #[default]
    Unspecified,
}

/// Errors fatal to one server-start attempt.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No candidate address for the requested policy could be bound.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Events a reader task reports to its engine.
#[derive(Debug)]
enum SocketEvent {
    /// One complete frame: validated header plus exactly `payload_len` bytes.
    Frame {
        from: ClientId,
        header: FrameHeader,
        payload: Vec<u8>,
    },
    /// The peer closed the connection cleanly.
    Closed { from: ClientId },
    /// A frame failed framing (short header, bad magic, truncated payload).
    /// The frame is discarded; the connection is not dropped for this alone.
    Malformed { from: ClientId, detail: String },
    /// A transport error on receive.  Logged; connection state unchanged.
    ReadError {
        from: ClientId,
        error: std::io::Error,
    },
}

// ── Engine entry point ────────────────────────────────────────────────────────

/// Runs one server engine to completion.
///
/// Resolves `ready` exactly once — `Ok` immediately before entering the main
/// loop, `Err` if binding fails — and then runs until `stop` signals `true`
/// (or the supervisor drops its end).  On the way out it broadcasts
/// `Shutdown` to every connected client and closes everything.
pub(crate) async fn run(
    port: u16,
    policy: IpPolicy,
    ready: oneshot::Sender<Result<(), EngineError>>,
    mut stop: watch::Receiver<bool>,
    client_count: Arc<AtomicUsize>,
) {
    let listener = match bind_listener(port, policy).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Ok(addr) = listener.local_addr() {
        info!(port, %addr, "server listening");
    }

    let (event_tx, mut events) = mpsc::channel::<SocketEvent>(64);
    let mut registry: ClientRegistry<OwnedWriteHalf> = ClientRegistry::new();
    let mut next_id: i32 = 1;

    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            changed = stop.changed() => {
                // A dropped sender means the supervisor is gone; stop too.
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let id = ClientId(next_id);
                    next_id += 1;
                    register_client(port, &mut registry, &client_count, id, stream, addr, &event_tx)
                        .await;
                }
                Err(e) => warn!(port, error = %e, "accept failed"),
            },
            Some(event) = events.recv() => {
                handle_event(port, &mut registry, &client_count, event).await;
            }
        }
    }

    // Stopping: tell every client first, then let the listener and all
    // connections close on drop.
    let shutdown = encode_header(&FrameHeader::control(
        PayloadKind::Shutdown,
        BROADCAST_DESTINATION,
    ));
    for (peer, client) in registry.iter_mut() {
        send_frame(port, peer, &mut client.writer, &shutdown).await;
    }
    client_count.store(0, Ordering::Relaxed);
    info!(port, "server stopped");
}

async fn bind_listener(port: u16, policy: IpPolicy) -> Result<TcpListener, EngineError> {
    let candidates: Vec<SocketAddr> = match policy {
        IpPolicy::V4 => vec![(Ipv4Addr::UNSPECIFIED, port).into()],
        IpPolicy::V6 => vec![(Ipv6Addr::UNSPECIFIED, port).into()],
        IpPolicy::Unspecified => vec![
            (Ipv6Addr::UNSPECIFIED, port).into(),
            (Ipv4Addr::UNSPECIFIED, port).into(),
        ],
    };

    let mut last_error = None;
    for addr in candidates {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(port, %addr, error = %e, "bind candidate failed");
                last_error = Some(e);
            }
        }
    }
    Err(EngineError::Bind {
        port,
        source: last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no bind candidates")
        }),
    })
}

// ── Accept path ───────────────────────────────────────────────────────────────

async fn register_client(
    port: u16,
    registry: &mut ClientRegistry<OwnedWriteHalf>,
    client_count: &AtomicUsize,
    id: ClientId,
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: &mpsc::Sender<SocketEvent>,
) {
    let (reader, mut writer) = stream.into_split();

    // Welcome the new client with its assigned identifier (carried in the
    // destination field), then announce it to everyone already registered.
    let welcome = encode_header(&FrameHeader::control(PayloadKind::Welcome, id.0));
    send_frame(port, id, &mut writer, &welcome).await;

    let joined = encode_header(&FrameHeader::control(PayloadKind::PeerJoined, id.0));
    for (peer, client) in registry.iter_mut() {
        send_frame(port, peer, &mut client.writer, &joined).await;
    }

    registry.insert(id, ClientEntry { writer, addr });
    client_count.store(registry.len(), Ordering::Relaxed);
    tokio::spawn(read_frames(id, reader, event_tx.clone()));
    info!(port, client = %id, %addr, "client connected");
}

// ── Reader tasks ──────────────────────────────────────────────────────────────

/// Reads frames from one client until the connection closes, forwarding each
/// outcome to the engine.  Returns when the peer closes or the engine is
/// gone (channel closed).
async fn read_frames(from: ClientId, mut reader: OwnedReadHalf, events: mpsc::Sender<SocketEvent>) {
    loop {
        let mut header_buf = [0u8; HEADER_SIZE];
        let got = match recv_exact(&mut reader, &mut header_buf).await {
            Ok(n) => n,
            Err(e) => {
                if events
                    .send(SocketEvent::ReadError { from, error: e })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(READ_RETRY_DELAY).await;
                continue;
            }
        };

        if got == 0 {
            let _ = events.send(SocketEvent::Closed { from }).await;
            return;
        }
        if got < HEADER_SIZE {
            // The stream ended mid-header: report the framing failure, then
            // the close that caused it.
            let _ = events
                .send(SocketEvent::Malformed {
                    from,
                    detail: format!("short header: {got} of {HEADER_SIZE} bytes"),
                })
                .await;
            let _ = events.send(SocketEvent::Closed { from }).await;
            return;
        }

        let header = match decode_header(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                // Frame discarded.  The stream may now be desynchronized;
                // no resynchronization is attempted.
                if events
                    .send(SocketEvent::Malformed {
                        from,
                        detail: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        if !payload.is_empty() {
            match recv_exact(&mut reader, &mut payload).await {
                Ok(n) if n == payload.len() => {}
                Ok(n) => {
                    let _ = events
                        .send(SocketEvent::Malformed {
                            from,
                            detail: format!("truncated payload: {n} of {} bytes", payload.len()),
                        })
                        .await;
                    let _ = events.send(SocketEvent::Closed { from }).await;
                    return;
                }
                Err(e) => {
                    if events
                        .send(SocketEvent::ReadError { from, error: e })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                    continue;
                }
            }
        }

        if events
            .send(SocketEvent::Frame {
                from,
                header,
                payload,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

// ── Event handling & routing ──────────────────────────────────────────────────

async fn handle_event(
    port: u16,
    registry: &mut ClientRegistry<OwnedWriteHalf>,
    client_count: &AtomicUsize,
    event: SocketEvent,
) {
    match event {
        SocketEvent::Frame {
            from,
            header,
            payload,
        } => dispatch_frame(port, registry, from, header, payload).await,
        SocketEvent::Closed { from } => {
            if registry.remove(from).is_some() {
                client_count.store(registry.len(), Ordering::Relaxed);
                info!(port, client = %from, "client disconnected");
                let left = encode_header(&FrameHeader::control(PayloadKind::PeerLeft, from.0));
                for (peer, client) in registry.iter_mut() {
                    send_frame(port, peer, &mut client.writer, &left).await;
                }
            }
        }
        SocketEvent::Malformed { from, detail } => {
            warn!(port, client = %from, detail, "framing failure, frame discarded");
        }
        SocketEvent::ReadError { from, error } => {
            warn!(port, client = %from, error = %error, "read error, connection kept");
        }
    }
}

async fn dispatch_frame(
    port: u16,
    registry: &mut ClientRegistry<OwnedWriteHalf>,
    from: ClientId,
    header: FrameHeader,
    payload: Vec<u8>,
) {
    if header.kind.is_relayed() {
        match Destination::from_wire(header.destination) {
            Destination::Server => {
                // The server cannot be the target of a relayed frame; no
                // reply is sent to the offender.
                warn!(
                    port,
                    client = %from,
                    kind = ?header.kind,
                    "relayed frame addressed to the server, dropped"
                );
            }
            Destination::Broadcast => {
                let frame = stamp_source(from, &header, &payload);
                // Broadcast includes the sender.
                for (peer, client) in registry.iter_mut() {
                    send_frame(port, peer, &mut client.writer, &frame).await;
                }
                debug!(port, client = %from, kind = ?header.kind, "relayed broadcast");
            }
            Destination::Client(dest) => {
                let frame = stamp_source(from, &header, &payload);
                match registry.get_mut(dest) {
                    Some(client) => {
                        send_frame(port, dest, &mut client.writer, &frame).await;
                        debug!(port, client = %from, %dest, kind = ?header.kind, "relayed unicast");
                    }
                    // An unreachable target is a silent no-op at this layer.
                    None => debug!(port, client = %from, %dest, "unicast target not registered"),
                }
            }
        }
        return;
    }

    match header.kind {
        PayloadKind::RosterRequest => {
            let roster = encode_roster(&registry.ids());
            let reply = encode_frame(
                &FrameHeader {
                    source: SERVER_SOURCE,
                    destination: from.0,
                    kind: PayloadKind::Roster,
                    payload_len: 0,
                },
                &roster,
            );
            if let Some(client) = registry.get_mut(from) {
                send_frame(port, from, &mut client.writer, &reply).await;
                debug!(port, client = %from, "sent roster");
            }
        }
        other => {
            debug!(port, client = %from, kind = ?other, "ignoring server-only kind from client");
        }
    }
}

/// Re-assembles a relayed frame with the true sender stamped into `source`.
fn stamp_source(from: ClientId, header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    encode_frame(
        &FrameHeader {
            source: from.0,
            ..*header
        },
        payload,
    )
}

/// Sends one frame, logging (but not propagating) short sends and errors.
/// A dead target surfaces later as a `Closed` event from its reader task.
async fn send_frame<W>(port: u16, to: ClientId, writer: &mut W, frame: &[u8])
where
    W: AsyncWrite + Unpin,
{
    match send_all(writer, frame).await {
        Ok(n) if n == frame.len() => {}
        Ok(n) => warn!(port, client = %to, sent = n, expected = frame.len(), "short send"),
        Err(e) => warn!(port, client = %to, error = %e, "send failed"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_listener_reports_occupied_port() {
        // Occupy a port on the same wildcard address the engine will try, so
        // the collision does not depend on platform wildcard-vs-specific
        // bind semantics.
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = bind_listener(port, IpPolicy::V4).await;
        assert!(matches!(result, Err(EngineError::Bind { port: p, .. }) if p == port));
    }

    #[tokio::test]
    async fn test_bind_listener_unspecified_falls_back() {
        let listener = bind_listener(0, IpPolicy::Unspecified).await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }
}
