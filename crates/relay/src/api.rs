// Read-only HTTP view of room state.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sketchsync_common::types::{normalize_room_id, RoomId};

use crate::error::{ErrorCode, RelayError, REQUEST_ID_HEADER};
use crate::RelayState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub exists: bool,
    pub member_count: usize,
    pub version: u64,
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/v1/rooms/{room_id}", get(get_room)).with_state(state)
}

async fn get_room(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomSummary>, RelayError> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);
    let with_request_id = |error: RelayError| match &request_id {
        Some(id) => error.with_request_id(id.clone()),
        None => error,
    };

    let room_id = normalize_room_id(&room_id).map_err(|error| {
        with_request_id(RelayError::new(ErrorCode::MalformedPayload, error.to_string()))
    })?;
    let not_found = || {
        with_request_id(
            RelayError::new(ErrorCode::NotFound, "room not found")
                .with_details(serde_json::json!({ "roomId": room_id })),
        )
    };
    let handle = state.rooms.get(&room_id).await.ok_or_else(not_found)?;

    let room = handle.lock().await;
    if room.is_evicted() {
        return Err(not_found());
    }
    Ok(Json(RoomSummary {
        room_id,
        exists: true,
        member_count: room.member_count(),
        version: room.version(),
    }))
}
