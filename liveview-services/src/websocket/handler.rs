//! WebSocket connection handler
//!
//! Registers each accepted socket, forwards broadcast payloads to it and
//! deregisters it once either direction of the socket ends.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::registry::{ConnectionId, ConnectionRegistry};

/// Drives the lifecycle of individual client connections
#[derive(Clone)]
pub struct ConnectionHandler {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle a new WebSocket connection until it closes
    ///
    /// `sink` receives outbound frames and `stream` yields inbound ones. The
    /// connection is registered before this function first yields and is
    /// removed before it returns.
    pub async fn handle_connection<Tx, Rx, E>(&self, mut sink: Tx, mut stream: Rx)
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display,
        Rx: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display + Send,
    {
        let (client_id, mut outbound) = self.registry.register();
        info!(
            "New WebSocket connection: {} ({} connected)",
            client_id,
            self.registry.size()
        );

        // Task: Forward broadcast payloads to the socket
        let mut send_task = tokio::spawn(async move {
            while let Some(payload) = outbound.recv().await {
                if let Err(e) = sink.send(Message::Text(payload)).await {
                    debug!("Send to {} failed: {}", client_id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Inbound: watch for close, nothing else is expected from clients
        let recv_task = async {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(msg) => {
                        if !Self::handle_message(client_id, msg) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("WebSocket error for {}: {}", client_id, e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = &mut send_task => {}
            _ = recv_task => {}
        }

        self.registry.remove(client_id);
        send_task.abort();
        info!(
            "WebSocket connection closed: {} ({} remaining)",
            client_id,
            self.registry.size()
        );
    }

    /// Inspect an inbound frame
    /// Returns false if the connection should be closed
    fn handle_message(client_id: ConnectionId, msg: Message) -> bool {
        match msg {
            Message::Text(text) => {
                debug!("Ignoring text message from {}: {}", client_id, text.as_str());
                true
            }
            Message::Binary(data) => {
                debug!("Ignoring {} byte binary message from {}", data.len(), client_id);
                true
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => true,
            Message::Close(_) => {
                debug!("Received close from {}", client_id);
                false
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("registry", &self.registry)
            .finish()
    }
}
