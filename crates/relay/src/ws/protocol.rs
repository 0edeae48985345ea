use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use sketchsync_common::protocol::ws::{ClientMessage, ServerMessage};

pub fn decode_message(raw: &[u8]) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_slice::<ClientMessage>(raw)
}

pub fn encode_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub async fn send_ws_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub async fn close_too_large(socket: &mut WebSocket, max_frame_bytes: usize) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("frame exceeds {max_frame_bytes} bytes").into(),
        })))
        .await;
}
