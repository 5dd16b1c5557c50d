//! Connection registry for live WebSocket clients
//!
//! Tracks every connection that can currently receive pushes. Presence in
//! the registry is the liveness signal: a connection is added once on
//! accept and removed once its socket closes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::debug;

/// Serialized frame shared by every push of one tick
///
/// Reference counted, so cloning it per connection never copies the text.
pub type Payload = Utf8Bytes;

/// Unique identifier for a WebSocket client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a single push did not reach its connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("connection closed")]
    Closed,

    #[error("push timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound side of one connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Payload>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a payload for this connection's writer
    ///
    /// Waits at most `timeout` for room in the outbound buffer.
    pub async fn push(&self, payload: Payload, timeout: Duration) -> Result<(), PushError> {
        self.tx
            .send_timeout(payload, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Closed(_) => PushError::Closed,
                SendTimeoutError::Timeout(_) => PushError::Timeout(timeout),
            })
    }
}

/// Point-in-time copy of the registry's members
///
/// Taken once per tick. Connections registered afterwards are not part of
/// it; connections removed afterwards still are, and their pushes fail
/// with [`PushError::Closed`] once the socket task has gone.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    handles: Vec<ConnectionHandle>,
}

impl Membership {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.handles.iter().map(|h| h.id).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConnectionHandle> {
        self.handles.iter()
    }
}

/// Registry of live connections
pub struct ConnectionRegistry {
    /// Next connection ID to assign
    next_id: AtomicU64,
    /// Live connections keyed by ID
    connections: DashMap<ConnectionId, mpsc::Sender<Payload>>,
    /// Capacity of each connection's outbound buffer
    buffer: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose connections buffer up to `buffer` payloads
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Allocate an ID and outbound channel for a freshly accepted socket
    ///
    /// The connection is a broadcast target from the next membership
    /// snapshot onwards. IDs already taken through [`add`](Self::add) are
    /// skipped, so the returned ID always maps to the returned receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(self.buffer);

        loop {
            let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
            match self.connections.entry(id) {
                Entry::Occupied(_) => {
                    debug!("Connection {} taken, allocating another", id);
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    return (id, rx);
                }
            }
        }
    }

    /// Insert a connection
    ///
    /// Returns false and leaves the registry untouched if the ID is
    /// already present.
    pub fn add(&self, id: ConnectionId, tx: mpsc::Sender<Payload>) -> bool {
        match self.connections.entry(id) {
            Entry::Occupied(_) => {
                debug!("Connection {} already registered", id);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
                true
            }
        }
    }

    /// Remove a connection
    ///
    /// Removing an unknown or already removed ID is a no-op. Returns whether
    /// anything was removed.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of live connections
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot the current members for one broadcast
    pub fn members(&self) -> Membership {
        let handles = self
            .connections
            .iter()
            .map(|entry| ConnectionHandle {
                id: *entry.key(),
                tx: entry.value().clone(),
            })
            .collect();

        Membership { handles }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.size())
            .field("buffer", &self.buffer)
            .finish()
    }
}
