use serde_json::{json, Value};
use sketchsync_common::protocol::ws::{ClientMessage, ServerMessage, CURRENT_PROTOCOL_VERSION};
use sketchsync_common::types::{AppState, MemberInfo};
use uuid::Uuid;

#[test]
fn protocol_version_is_sketchsync_v1() {
    assert_eq!(CURRENT_PROTOCOL_VERSION, "sketchsync.v1");
}

#[test]
fn server_message_shapes_match_event_table() {
    let connection_id = Uuid::new_v4();

    let samples = [
        (
            ServerMessage::Connected {
                connection_id,
                protocol: CURRENT_PROTOCOL_VERSION.to_string(),
                server_time: "2026-10-19T00:00:00Z".to_string(),
            },
            "connected",
            &["type", "connectionId", "protocol", "serverTime"][..],
        ),
        (
            ServerMessage::InitialState {
                room_id: "R1".to_string(),
                elements: vec![],
                app_state: AppState::document_defaults(),
                version: 0,
            },
            "initial-state",
            &["type", "roomId", "elements", "appState", "version"][..],
        ),
        (
            ServerMessage::MembershipChanged {
                room_id: "R1".to_string(),
                members: vec![MemberInfo { connection_id, display_name: "Ada".to_string() }],
            },
            "membership-changed",
            &["type", "roomId", "members"][..],
        ),
        (
            ServerMessage::Update {
                elements: vec![],
                app_state: AppState::default(),
                version: 1,
                from: connection_id,
            },
            "update",
            &["type", "elements", "appState", "version", "from"][..],
        ),
        (
            ServerMessage::ResyncRequired {
                elements: vec![],
                app_state: AppState::default(),
                version: 5,
            },
            "resync-required",
            &["type", "elements", "appState", "version"][..],
        ),
        (ServerMessage::Cleared { version: 2 }, "cleared", &["type", "version"][..]),
        (
            ServerMessage::Cursor { connection_id, x: 1.0, y: 2.0, tool: Some("pen".to_string()) },
            "cursor",
            &["type", "connectionId", "x", "y", "tool"][..],
        ),
        (
            ServerMessage::FollowersChanged { followers: vec![connection_id] },
            "followers-changed",
            &["type", "followers"][..],
        ),
        (ServerMessage::FollowEnded, "follow-ended", &["type"][..]),
        (
            ServerMessage::Error {
                code: "INVALID_SESSION".to_string(),
                message: "join a room first".to_string(),
                retryable: false,
            },
            "error",
            &["type", "code", "message", "retryable"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(&message).expect("server message should serialize");
        assert_eq!(value["type"], expected_type);
        assert_eq!(object_keys(&value), sorted(expected_keys));
    }
}

#[test]
fn client_messages_decode_from_event_table_payloads() {
    let target = Uuid::new_v4();
    let samples = [
        json!({ "type": "join", "roomId": "R1", "displayName": "Ada" }),
        json!({ "type": "leave" }),
        json!({ "type": "update", "elements": [], "appStatePatch": {}, "version": 0 }),
        json!({ "type": "clear" }),
        json!({ "type": "cursor", "x": 1.5, "y": -3.0, "tool": "selection" }),
        json!({ "type": "follow", "target": target }),
        json!({ "type": "unfollow", "target": target }),
    ];

    for sample in samples {
        let decoded: ClientMessage = serde_json::from_value(sample.clone())
            .unwrap_or_else(|error| panic!("`{sample}` should decode: {error}"));
        let reencoded = serde_json::to_value(&decoded).expect("client message should serialize");
        assert_eq!(reencoded["type"], sample["type"]);
    }
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let cursor = ServerMessage::Cursor { connection_id: Uuid::new_v4(), x: 0.0, y: 0.0, tool: None };
    let value = serde_json::to_value(cursor).expect("cursor should serialize");
    assert!(!object_keys(&value).contains(&"tool".to_string()));
}

#[test]
fn unknown_message_type_is_rejected() {
    assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "teleport" })).is_err());
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn sorted(keys: &[&str]) -> Vec<String> {
    let mut keys = keys.iter().map(|key| key.to_string()).collect::<Vec<_>>();
    keys.sort();
    keys
}
