//! WebSocket message types for live price streaming
//!
//! The protocol is receive-only: the server pushes, clients never send.

use serde::{Deserialize, Serialize};

use crate::price::Snapshot;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Latest price per company
    Prices { prices: Snapshot },

    /// Any message type this build does not know about
    ///
    /// Only produced when decoding. Clients log and skip it.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Serialize to the text frame pushed to clients
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Snapshot> for ServerMessage {
    fn from(prices: Snapshot) -> Self {
        ServerMessage::Prices { prices }
    }
}
