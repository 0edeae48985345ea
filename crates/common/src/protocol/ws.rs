// WebSocket message types for the sketchsync.v1 protocol.
//
// Frames are JSON text: `{"type": "<event-name>", ...camelCase fields}`.

use serde::{Deserialize, Serialize};

use crate::types::{AppState, ConnectionId, Element, MemberInfo, RoomId};

/// Protocol identifier announced in the `connected` frame.
pub const CURRENT_PROTOCOL_VERSION: &str = "sketchsync.v1";

/// Messages a client may send to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Attach to a room, creating it if absent.
    Join {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// Detach from the current room without closing the connection.
    Leave,

    /// Propose a new document state.
    Update {
        elements: Vec<Element>,
        #[serde(default)]
        app_state_patch: AppState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    /// Wipe the room's document.
    Clear,

    /// Pointer position; relayed best-effort.
    Cursor {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },

    /// Start following another connection's viewport.
    Follow { target: ConnectionId },

    /// Stop following another connection.
    Unfollow { target: ConnectionId },
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection.
    Connected { connection_id: ConnectionId, protocol: String, server_time: String },

    /// Snapshot pushed to a client right after it joins.
    InitialState { room_id: RoomId, elements: Vec<Element>, app_state: AppState, version: u64 },

    /// Full member list of a room.
    MembershipChanged { room_id: RoomId, members: Vec<MemberInfo> },

    /// An accepted update from another member.
    Update { elements: Vec<Element>, app_state: AppState, version: u64, from: ConnectionId },

    /// The sender's update was stale; this is the authoritative state.
    ResyncRequired { elements: Vec<Element>, app_state: AppState, version: u64 },

    /// The document was wiped. Delivered to every member, sender included.
    Cleared { version: u64 },

    /// Another member's pointer position.
    Cursor {
        connection_id: ConnectionId,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },

    /// Sent to a followed connection whenever its follower set changes.
    FollowersChanged { followers: Vec<ConnectionId> },

    /// Sent to a followed connection when its last follower disconnected.
    FollowEnded,

    /// Connection-local failure. The connection stays open.
    Error { code: String, message: String, retryable: bool },
}

impl ServerMessage {
    /// Wire name of the frame, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::InitialState { .. } => "initial-state",
            Self::MembershipChanged { .. } => "membership-changed",
            Self::Update { .. } => "update",
            Self::ResyncRequired { .. } => "resync-required",
            Self::Cleared { .. } => "cleared",
            Self::Cursor { .. } => "cursor",
            Self::FollowersChanged { .. } => "followers-changed",
            Self::FollowEnded => "follow-ended",
            Self::Error { .. } => "error",
        }
    }
}
