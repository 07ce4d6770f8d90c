//! Socket lifecycle and wire protocol.
//!
//! The connection manager owns the socket inside a task and exposes a
//! command handle; the dispatcher turns inbound frames into store actions.

pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod transport;

pub use connection::{ConnectError, ConnectionManager, SendError, SocketEvent};
pub use dispatcher::{route, spawn_dispatch_loop, ProtocolError, Routed};
pub use envelope::Envelope;
pub use transport::{Transport, TransportError, TransportFrame, TransportLink, WsTransport};
