//! Process-wide registry of open client connections.
//!
//! An application that talks to several relay servers at once addresses each
//! connection through an opaque [`ConnectionHandle`] instead of holding the
//! session itself.  The registry hands out handles on connect, routes every
//! later operation to the right session, and forgets the handle on
//! disconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use relay_core::Destination;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::session::{ClientSession, Event, SessionError};

/// Opaque handle naming one open connection in a [`ConnectionRegistry`].
///
/// Handles are never reused within a registry, so a stale handle fails
/// cleanly instead of aliasing a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Table of open sessions keyed by handle.
///
/// The table itself is guarded by a plain mutex that is only held for map
/// lookups, never across an await.  Each session sits behind its own async
/// mutex, so operations on different connections proceed concurrently while
/// two tasks polling the same connection serialize.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<AsyncMutex<ClientSession>>>>,
    next_handle: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn get(&self, handle: ConnectionHandle) -> Result<Arc<AsyncMutex<ClientSession>>, SessionError> {
        let connections = self.connections.lock().expect("connection table poisoned");
        connections
            .get(&handle.0)
            .cloned()
            .ok_or(SessionError::UnknownHandle(handle.0))
    }

    /// Connects to `host:port` and registers the session.
    ///
    /// # Errors
    ///
    /// Propagates [`ClientSession::connect`] errors; nothing is registered on
    /// failure.
    pub async fn connect(&self, host: &str, port: &str) -> Result<ConnectionHandle, SessionError> {
        let session = ClientSession::connect(host, port).await?;
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut connections = self.connections.lock().expect("connection table poisoned");
        connections.insert(handle.0, Arc::new(AsyncMutex::new(session)));
        info!(%handle, host, port, "connection registered");
        Ok(handle)
    }

    /// Polls the named connection for its next event.  See
    /// [`ClientSession::poll`].
    pub async fn poll(&self, handle: ConnectionHandle) -> Result<Option<Event>, SessionError> {
        let session = self.get(handle)?;
        let mut session = session.lock().await;
        session.poll().await
    }

    /// Sends `message` on the named connection.  See [`ClientSession::send`].
    pub async fn send(
        &self,
        handle: ConnectionHandle,
        destination: Destination,
        message: &[u8],
    ) -> Result<(), SessionError> {
        let session = self.get(handle)?;
        let mut session = session.lock().await;
        session.send(destination, message).await
    }

    /// Requests the roster on the named connection.  See
    /// [`ClientSession::request_roster`].
    pub async fn request_roster(&self, handle: ConnectionHandle) -> Result<(), SessionError> {
        let session = self.get(handle)?;
        let mut session = session.lock().await;
        session.request_roster().await
    }

    /// Closes and forgets the named connection.  Returns `false` if the
    /// handle was unknown; disconnecting twice is a harmless no-op.
    pub async fn disconnect(&self, handle: ConnectionHandle) -> bool {
        let removed = {
            let mut connections = self.connections.lock().expect("connection table poisoned");
            connections.remove(&handle.0)
        };
        match removed {
            Some(session) => {
                session.lock().await.disconnect().await;
                info!(%handle, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Whether `handle` names an open connection.
    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        let connections = self.connections.lock().expect("connection table poisoned");
        connections.contains_key(&handle.0)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        let connections = self.connections.lock().expect("connection table poisoned");
        connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Process-facing API ────────────────────────────────────────────────────────

static CONNECTIONS: Lazy<ConnectionRegistry> = Lazy::new(ConnectionRegistry::new);

/// Connects to `host:port` through the process-global registry.
pub async fn connect(host: &str, port: &str) -> Result<ConnectionHandle, SessionError> {
    CONNECTIONS.connect(host, port).await
}

/// Polls the connection named by `handle` for its next event.
pub async fn poll(handle: ConnectionHandle) -> Result<Option<Event>, SessionError> {
    CONNECTIONS.poll(handle).await
}

/// Sends `message` to `destination` on the connection named by `handle`.
pub async fn send(
    handle: ConnectionHandle,
    destination: Destination,
    message: &[u8],
) -> Result<(), SessionError> {
    CONNECTIONS.send(handle, destination, message).await
}

/// Requests the roster on the connection named by `handle`.
pub async fn request_roster(handle: ConnectionHandle) -> Result<(), SessionError> {
    CONNECTIONS.request_roster(handle).await
}

/// Closes the connection named by `handle`; `false` if it was already gone.
pub async fn disconnect(handle: ConnectionHandle) -> bool {
    CONNECTIONS.disconnect(handle).await
}

/// Whether `handle` names an open connection in the process-global registry.
pub fn is_open(handle: ConnectionHandle) -> bool {
    CONNECTIONS.contains(handle)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_handle_fails_cleanly() {
        let registry = ConnectionRegistry::new();
        let stale = ConnectionHandle(42);
        assert!(!registry.contains(stale));
        assert!(matches!(
            registry.poll(stale).await,
            Err(SessionError::UnknownHandle(42))
        ));
        assert!(matches!(
            registry.send(stale, Destination::Broadcast, b"x").await,
            Err(SessionError::UnknownHandle(42))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_handle_is_a_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.disconnect(ConnectionHandle(7)).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_refused_port_registers_nothing() {
        let registry = ConnectionRegistry::new();
        // Bind a listener to get a free port, then drop it so connecting
        // there is refused.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = registry.connect("127.0.0.1", &port.to_string()).await;
        assert!(matches!(result, Err(SessionError::ConnectFailed { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_display_is_stable() {
        assert_eq!(ConnectionHandle(3).to_string(), "conn-3");
    }
}
