mod handler;
mod protocol;

pub use handler::{ConnectionHandler, ConnectionPhase, FrameOutcome};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use sketchsync_common::protocol::ws::{ServerMessage, CURRENT_PROTOCOL_VERSION};
use tracing::{debug, info};

use crate::registry::ConnectionOutbound;
use crate::RelayState;
use protocol::{close_too_large, send_ws_message};

pub fn router(state: RelayState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(State(state): State<RelayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: RelayState, mut socket: WebSocket) {
    let (outbound, mut receivers) = ConnectionOutbound::channel(state.config.volatile_buffer);
    let connection_id = state.registry.register(outbound).await;
    let max_frame_bytes = state.config.max_frame_bytes;
    let mut handler =
        ConnectionHandler::new(connection_id, state.sessions.clone(), state.reconciler.clone());
    info!(connection_id = %connection_id, "connection opened");

    let connected = ServerMessage::Connected {
        connection_id,
        protocol: CURRENT_PROTOCOL_VERSION.to_string(),
        server_time: Utc::now().to_rfc3339(),
    };
    if send_ws_message(&mut socket, &connected).await.is_err() {
        state.sessions.disconnect(connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            biased;

            maybe_outbound = receivers.reliable.recv() => {
                let Some(outbound_message) = maybe_outbound else {
                    break;
                };
                if send_ws_message(&mut socket, &outbound_message).await.is_err() {
                    break;
                }
            }
            volatile_message = receivers.volatile.recv() => {
                if send_ws_message(&mut socket, &volatile_message).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(Ok(message)) = maybe_message else {
                    break;
                };

                let outcome = match message {
                    Message::Text(raw_message) => {
                        handler.handle_frame(raw_message.as_str().as_bytes(), max_frame_bytes).await
                    }
                    Message::Binary(raw_message) => {
                        handler.handle_frame(&raw_message, max_frame_bytes).await
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Message::Pong(_) => continue,
                    Message::Close(_) => break,
                };

                match outcome {
                    FrameOutcome::Handled => {}
                    FrameOutcome::Failed(error) => {
                        if send_ws_message(&mut socket, &error.to_message()).await.is_err() {
                            break;
                        }
                    }
                    FrameOutcome::TooLarge => {
                        debug!(connection_id = %connection_id, max_frame_bytes, "frame too large, closing");
                        close_too_large(&mut socket, max_frame_bytes).await;
                        break;
                    }
                }
            }
        }
    }

    state.sessions.disconnect(connection_id).await;
    info!(connection_id = %connection_id, "connection closed");
}
