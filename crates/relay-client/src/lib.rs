//! # relay-client
//!
//! Client side of the relay message broker.
//!
//! A [`ClientSession`] is one connection to a relay server, driven entirely
//! by the caller: [`ClientSession::poll`] checks for the next event without
//! blocking, and sends go out synchronously.  On top of that, the
//! [`connections`] module keeps a process-wide table of open sessions
//! addressed by opaque [`ConnectionHandle`]s, so an application can hold
//! connections to several servers without owning the sessions directly.
//!
//! ```no_run
//! use relay_client::{ClientSession, Destination, PayloadKind};
//!
//! # async fn run() -> Result<(), relay_client::SessionError> {
//! let mut session = ClientSession::connect("127.0.0.1", "7000").await?;
//! session.send(Destination::Broadcast, b"hello").await?;
//! while let Some(event) = session.poll().await? {
//!     if event.kind() == PayloadKind::Message {
//!         println!("{:?}", event.text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connections;
pub mod session;

pub use connections::{ConnectionHandle, ConnectionRegistry};
pub use session::{ClientSession, Event, SessionError};

// Wire-level types callers need to address messages and classify events.
pub use relay_core::{ClientId, Destination, PayloadKind};
