//! The server supervisor: a process-wide table of running servers keyed by
//! port, with synchronous start/stop semantics for callers.
//!
//! Multiple application tasks may call these operations concurrently; all
//! structural changes to the table go through one async mutex.  Each server
//! engine, by contrast, runs single-task and needs no locking internally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{self, EngineError, IpPolicy};

/// Errors for supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Port 0 cannot name a server (it is the stop-all sentinel).
    #[error("port {0} is not a valid server port")]
    InvalidPort(u16),
    /// A server is already running on this port in this process.
    #[error("a server is already running on port {0}")]
    AlreadyRunning(u16),
    /// No server is running on this port.
    #[error("no server is running on port {0}")]
    NotRunning(u16),
    /// The engine failed before reaching the running state.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The engine task ended without reporting readiness (it panicked or was
    /// aborted during startup).
    #[error("server on port {0} terminated during startup")]
    StartupAborted(u16),
}

/// Read-only snapshot of one running server, as returned by
/// [`Supervisor::list_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub port: u16,
    /// `false` only if the engine task died unexpectedly; a stopped server
    /// is removed from the table entirely.
    pub running: bool,
    /// Number of currently connected clients.
    pub clients: usize,
}

struct ServerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    clients: Arc<AtomicUsize>,
}

/// Table of running servers.  One instance normally exists per process (see
/// [`start_server`] and friends), but independent instances are useful in
/// tests.
#[derive(Default)]
pub struct Supervisor {
    servers: Mutex<HashMap<u16, ServerHandle>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a server on `port` and blocks until it is accepting
    /// connections.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::InvalidPort`] for port 0,
    /// [`SupervisorError::AlreadyRunning`] for a duplicate start, and the
    /// engine's bind error if no candidate address could be bound — in which
    /// case the engine task has already been joined and nothing is
    /// registered.
    pub async fn start(&self, port: u16, policy: IpPolicy) -> Result<(), SupervisorError> {
        if port == 0 {
            return Err(SupervisorError::InvalidPort(port));
        }

        // The table lock is scoped to the duplicate check so a slow bind
        // cannot block unrelated stop/list/is_running calls.
        {
            let servers = self.servers.lock().await;
            if servers.contains_key(&port) {
                return Err(SupervisorError::AlreadyRunning(port));
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let clients = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(engine::run(
            port,
            policy,
            ready_tx,
            stop_rx,
            Arc::clone(&clients),
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                let mut servers = self.servers.lock().await;
                // A racing start for the same port normally loses the bind
                // and errors out above, but if one slipped through, stop the
                // younger engine rather than clobbering the table entry.
                if servers.contains_key(&port) {
                    drop(servers);
                    let _ = stop_tx.send(true);
                    let _ = task.await;
                    return Err(SupervisorError::AlreadyRunning(port));
                }
                servers.insert(
                    port,
                    ServerHandle {
                        stop: stop_tx,
                        task,
                        clients,
                    },
                );
                Ok(())
            }
            Ok(Err(e)) => {
                // Engine reported a bind failure; let it finish before
                // reporting so no task lingers.
                let _ = task.await;
                Err(e.into())
            }
            Err(_) => {
                task.abort();
                Err(SupervisorError::StartupAborted(port))
            }
        }
    }

    /// Stops the server on `port`, blocking until its engine has exited.
    ///
    /// `port == 0` stops every running server sequentially; it succeeds even
    /// when none are running.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::NotRunning`] if a specific port has no server.
    pub async fn stop(&self, port: u16) -> Result<(), SupervisorError> {
        if port == 0 {
            self.stop_all().await;
            return Ok(());
        }

        let handle = {
            let mut servers = self.servers.lock().await;
            servers.remove(&port).ok_or(SupervisorError::NotRunning(port))?
        };
        Self::join(port, handle).await;
        Ok(())
    }

    /// Stops every running server sequentially, returning how many were
    /// stopped.
    pub async fn stop_all(&self) -> usize {
        let handles: Vec<(u16, ServerHandle)> = {
            let mut servers = self.servers.lock().await;
            servers.drain().collect()
        };
        let count = handles.len();
        for (port, handle) in handles {
            Self::join(port, handle).await;
        }
        count
    }

    async fn join(port: u16, handle: ServerHandle) {
        // Raise the stop signal and wait for the engine to broadcast
        // Shutdown and exit.  If the engine already died, joining still
        // completes.
        let _ = handle.stop.send(true);
        if let Err(e) = handle.task.await {
            warn!(port, error = %e, "engine task did not exit cleanly");
        }
        info!(port, "server stop complete");
    }

    /// Whether a server is running on `port`.
    pub async fn is_running(&self, port: u16) -> bool {
        let servers = self.servers.lock().await;
        servers
            .get(&port)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Snapshot of every registered server.
    pub async fn list_running(&self) -> Vec<ServerStatus> {
        let servers = self.servers.lock().await;
        let mut statuses: Vec<ServerStatus> = servers
            .iter()
            .map(|(port, handle)| ServerStatus {
                port: *port,
                running: !handle.task.is_finished(),
                clients: handle.clients.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by_key(|status| status.port);
        statuses
    }
}

// ── Process-facing API ────────────────────────────────────────────────────────

static SUPERVISOR: Lazy<Supervisor> = Lazy::new(Supervisor::new);

/// Starts a server on `port` using the process-global supervisor.
pub async fn start_server(port: u16, policy: IpPolicy) -> Result<(), SupervisorError> {
    SUPERVISOR.start(port, policy).await
}

/// Stops the server on `port` (`0` stops all) using the process-global
/// supervisor.
pub async fn stop_server(port: u16) -> Result<(), SupervisorError> {
    SUPERVISOR.stop(port).await
}

/// Whether the process-global supervisor has a running server on `port`.
pub async fn is_server_running(port: u16) -> bool {
    SUPERVISOR.is_running(port).await
}

/// Lists every server registered with the process-global supervisor.
pub async fn list_running_servers() -> Vec<ServerStatus> {
    SUPERVISOR.list_running().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
