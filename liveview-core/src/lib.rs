//! Core types for Stock Liveview
//!
//! This crate defines the shared data structures used across the broadcaster:
//! price records, per-tick snapshots, the WebSocket wire protocol and the
//! crate-wide error type.

pub mod error;
pub mod price;
pub mod websocket;

pub use error::{LiveviewError, LiveviewResult};
pub use price::{PriceRecord, Snapshot};
pub use websocket::ServerMessage;
