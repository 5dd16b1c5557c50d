//! WebSocket lifecycle for live price clients
//!
//! Connections are registered on accept and removed when their socket
//! closes. The protocol is receive-only, so inbound frames are logged and
//! dropped.

mod handler;

pub use handler::ConnectionHandler;
