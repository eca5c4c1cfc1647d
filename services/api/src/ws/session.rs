//! Manages the WebSocket connection lifecycle for a revision session.

use super::protocol::ServerMessage;
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket bound to one session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

#[instrument(name = "ws_session", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    info!("New WebSocket connection.");
    let (mut socket_tx, socket_rx) = socket.split();

    if let Err(e) = run_session(&state, &session_id, &mut socket_tx, socket_rx).await {
        error!(error = ?e, "WebSocket session terminated with error.");
    }
    info!("WebSocket connection closed.");
}

/// Forwards each text frame to the tutor and streams the replies back.
async fn run_session(
    state: &AppState,
    session_id: &str,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                match state.tutor.handle_input(session_id, text.as_str()).await {
                    Ok(result) => {
                        let (message, complete) = ServerMessage::from_turn(result);
                        send_msg(socket_tx, message).await?;
                        if let Some(complete) = complete {
                            info!("Session complete.");
                            send_msg(socket_tx, complete).await?;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to process message");
                        let message = "Sorry, something went wrong. Please try again.".to_string();
                        send_msg(socket_tx, ServerMessage::Error { message }).await?;
                    }
                }
            }
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame."),
            Ok(Message::Close(_)) => {
                info!("Client sent close frame.");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        }
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
async fn send_msg(socket_tx: &mut SplitSink<WebSocket, Message>, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
