//! # relay-broker
//!
//! Server side of the relay message broker.
//!
//! A process can run one or more independently addressable servers.  Each
//! server accepts TCP connections, assigns every client an identifier,
//! announces joins and departures, and routes `Message`/`File*` frames
//! between clients — unicast to a specific identifier or broadcast to all.
//!
//! The crate splits into three layers:
//!
//! - **`registry`** – the ordered table of connected clients, owned by one
//!   engine task.
//! - **`engine`** – the per-server event loop: accept, decode, route,
//!   notify, shut down.
//! - **`supervisor`** – the process-wide port table with start/stop
//!   semantics, plus the process-facing free functions
//!   ([`start_server`], [`stop_server`], [`is_server_running`],
//!   [`list_running_servers`]).

pub mod engine;
pub mod registry;
pub mod supervisor;

pub use engine::{EngineError, IpPolicy};
pub use supervisor::{
    is_server_running, list_running_servers, start_server, stop_server, ServerStatus, Supervisor,
    SupervisorError,
};
