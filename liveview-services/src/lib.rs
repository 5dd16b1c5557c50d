//! Services for the Stock Liveview broadcaster
//!
//! This crate wires the pieces that move prices from the datastore to
//! connected browsers: the connection registry, the timer-driven broadcast
//! loop, the per-connection WebSocket lifecycle, the SQLite snapshot
//! provider and an optional simulated price feed.

pub mod broadcaster;
pub mod price_feed;
pub mod price_store;
pub mod provider;
pub mod registry;
pub mod websocket;

pub use broadcaster::{
    BroadcastConfig, BroadcastHealth, Broadcaster, TickOutcome, TickReport,
};
pub use price_feed::{PriceBatch, PriceFeed, PriceFeedConfig, StockEvent, TradeSide};
pub use price_store::{PriceStoreError, SqlitePriceStore};
pub use provider::SnapshotProvider;
pub use registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, Membership, Payload, PushError,
};
pub use websocket::ConnectionHandler;
