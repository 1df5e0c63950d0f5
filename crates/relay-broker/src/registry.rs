//! Server-side registry of connected clients.
//!
//! One registry belongs to exactly one server engine and is touched only by
//! that engine's task.  Single ownership is what makes broadcast fan-out
//! safe: the engine can never observe the registry changing underneath an
//! iteration, because nothing else can reach it.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use relay_core::ClientId;

/// One connected client as the engine sees it: the write side of its socket
/// plus the peer address for logging.
#[derive(Debug)]
pub struct ClientEntry<W> {
    pub writer: W,
    pub addr: SocketAddr,
}

/// Ordered collection of connected clients keyed by identifier.
///
/// Identifiers are assigned from a monotonically increasing counter, so the
/// `BTreeMap` iteration order equals accept order — the order broadcasts are
/// delivered in.
///
/// Generic over the writer type so the routing logic can be unit-tested
/// against in-memory buffers instead of sockets.
#[derive(Debug, Default)]
pub struct ClientRegistry<W> {
    clients: BTreeMap<ClientId, ClientEntry<W>>,
}

impl<W> ClientRegistry<W> {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
        }
    }

    /// Number of currently registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Registers a newly accepted client.  Returns the previous entry if the
    /// identifier was already present (which would indicate a counter bug).
    pub fn insert(&mut self, id: ClientId, entry: ClientEntry<W>) -> Option<ClientEntry<W>> {
        self.clients.insert(id, entry)
    }

    /// Removes a client, returning its entry so the caller can close the
    /// connection.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientEntry<W>> {
        self.clients.remove(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientEntry<W>> {
        self.clients.get_mut(&id)
    }

    /// Snapshot of all registered identifiers in accept order; this is the
    /// roster payload.
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Mutable iteration in accept order, used for broadcast fan-out.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ClientId, &mut ClientEntry<W>)> {
        self.clients.iter_mut().map(|(id, entry)| (*id, entry))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
