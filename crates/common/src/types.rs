// Core domain types shared by the relay and its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Identity of one live transport connection. Never reused across reconnects.
pub type ConnectionId = Uuid;

/// Opaque room identifier chosen by whoever creates the room.
pub type RoomId = String;

/// Maximum allowed room id length in characters.
pub const MAX_ROOM_ID_CHARS: usize = 128;

/// Background color a fresh or cleared document starts with.
pub const DEFAULT_BACKGROUND_COLOR: &str = "#ffffff";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,

    #[error("room id exceeds maximum length of {MAX_ROOM_ID_CHARS} characters")]
    TooLong,

    #[error("room id contains control characters")]
    ControlCharacter,
}

/// Trim and validate a client-supplied room id.
pub fn normalize_room_id(raw: &str) -> Result<RoomId, RoomIdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RoomIdError::Empty);
    }
    if trimmed.chars().count() > MAX_ROOM_ID_CHARS {
        return Err(RoomIdError::TooLong);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(RoomIdError::ControlCharacter);
    }
    Ok(trimmed.to_owned())
}

/// Display name used when a client joins without one.
pub fn default_display_name(connection_id: ConnectionId) -> String {
    let simple = connection_id.simple().to_string();
    format!("Guest-{}", &simple[..8])
}

/// One drawing element. The relay treats it as an opaque JSON object and only
/// reads `id`, `version` and `versionNonce` when reconciling element lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Element(Map<String, Value>);

impl Element {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Per-element edit counter; missing or non-numeric values count as 0.
    pub fn version(&self) -> u64 {
        self.0.get("version").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn version_nonce(&self) -> i64 {
        self.0.get("versionNonce").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Stable textual form used as the last-resort tie breaker.
    pub fn canonical_json(&self) -> String {
        // serde_json maps are key-ordered without `preserve_order`.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Document-wide settings. Every field is independently optional so a patch
/// carries only what changed; see [`AppState::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_stroke_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_fill_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_roughness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_font_family: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

macro_rules! overwrite_present {
    ($target:ident, $patch:ident, $($field:ident),+ $(,)?) => {
        $(
            if $patch.$field.is_some() {
                $target.$field = $patch.$field;
            }
        )+
    };
}

impl AppState {
    /// State of a brand-new or freshly cleared document.
    pub fn document_defaults() -> Self {
        Self { view_background_color: Some(DEFAULT_BACKGROUND_COLOR.to_owned()), ..Self::default() }
    }

    /// Shallow merge: every field set in `patch` replaces the stored value,
    /// unset fields leave the stored value alone.
    pub fn merge(&mut self, patch: AppState) {
        overwrite_present!(
            self,
            patch,
            view_background_color,
            current_item_stroke_color,
            current_item_background_color,
            current_item_fill_style,
            current_item_stroke_width,
            current_item_roughness,
            current_item_opacity,
            current_item_font_family,
            current_item_font_size,
            grid_size,
            theme,
            name,
        );
    }
}

/// Last known pointer position of a room member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Entry of a `membership-changed` presence event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// The full `(elements, appState, version)` triple of a room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub elements: Vec<Element>,
    pub app_state: AppState,
    pub version: u64,
}
