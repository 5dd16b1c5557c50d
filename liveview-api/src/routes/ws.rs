//! WebSocket route handler
//!
//! The root path doubles as the landing page: upgrade requests become price
//! subscriptions, plain requests get `index.html` from the static directory.

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info};

use crate::AppState;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
}

/// Upgrade to a price subscription, or serve the landing page
async fn root_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(rejection) => {
            debug!("Serving landing page ({})", rejection.body_text());
            let index = ServeFile::new(state.static_dir.join("index.html"));
            match index.oneshot(request).await {
                Ok(response) => response.into_response(),
                Err(never) => match never {},
            }
        }
    }
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    // Adapt axum frames to the tungstenite frames the handler speaks
    let sink = sender.with_flat_map(|msg: TungsteniteMessage| {
        stream::iter(to_axum(msg).map(Ok::<_, axum::Error>))
    });
    let stream = receiver.map(|result| result.map(from_axum));

    state.connections.handle_connection(sink, stream).await;
}

fn from_axum(msg: Message) -> TungsteniteMessage {
    match msg {
        Message::Text(text) => TungsteniteMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => TungsteniteMessage::Binary(data.to_vec().into()),
        Message::Ping(data) => TungsteniteMessage::Ping(data.to_vec().into()),
        Message::Pong(data) => TungsteniteMessage::Pong(data.to_vec().into()),
        Message::Close(_) => TungsteniteMessage::Close(None),
    }
}

fn to_axum(msg: TungsteniteMessage) -> Option<Message> {
    match msg {
        TungsteniteMessage::Text(text) => Some(Message::Text(text.as_str().to_owned().into())),
        TungsteniteMessage::Binary(data) => Some(Message::Binary(Bytes::from(data.to_vec()))),
        TungsteniteMessage::Ping(data) => Some(Message::Ping(Bytes::from(data.to_vec()))),
        TungsteniteMessage::Pong(data) => Some(Message::Pong(Bytes::from(data.to_vec()))),
        TungsteniteMessage::Close(_) => Some(Message::Close(None)),
        TungsteniteMessage::Frame(_) => None,
    }
}
