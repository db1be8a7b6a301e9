//! Typed accessors over the fixed sub-paths of the attribute tree.
//!
//! DESIGN
//! ======
//! Every read is a path lookup; every write goes through `Room::safe_update`.
//! Nothing here validates shape beyond decoding into the typed structs:
//! values that fail to decode read as absent. Idempotency of
//! `setup_app_attributes` is the caller's job; calling it twice for the
//! same id simply rewrites the entry (last write wins).
//!
//! Persisted layout of one registry entry:
//!
//! ```text
//! apps/{appId} = { kind, options: { scenePath?, title?, scenes? },
//!                  isDynamicPPT, src?,
//!                  state: { size, position, SnapshotRect, SceneIndex } }
//! ```

#[cfg(test)]
#[path = "delegate_test.rs"]
mod delegate_test;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::camera::{Camera, Point, Size};
use crate::consts::{
    APPS, BOX_STATE, BROADCASTER, CURSOR_STATE, CURSORS, FOCUS, MAIN_SCENE_INDEX, MAIN_SCENE_PATH, MAIN_VIEW_CAMERA,
    MAIN_VIEW_SIZE, POSITION, STATE,
};
use crate::room::Room;

// =============================================================================
// TYPES
// =============================================================================

/// One page of a static scene list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppt: Option<Value>,
}

/// Window options kept in the registry. Other host options are not replicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenes: Option<Vec<SceneDefinition>>,
}

/// Request to open a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddAppParams {
    pub kind: String,
    pub options: AppOptions,
    pub src: Option<String>,
}

/// Registry entry of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSyncAttributes {
    pub kind: String,
    #[serde(default)]
    pub options: AppOptions,
    #[serde(default, rename = "isDynamicPPT")]
    pub is_dynamic_ppt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Keys of an app's state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAttribute {
    Size,
    Position,
    SnapshotRect,
    SceneIndex,
}

impl AppAttribute {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Position => "position",
            Self::SnapshotRect => "SnapshotRect",
            Self::SceneIndex => "SceneIndex",
        }
    }
}

/// Shared window box state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxState {
    Normal,
    Minimized,
    Maximized,
}

// =============================================================================
// DELEGATE
// =============================================================================

/// Accessor facade over the shared attribute tree.
#[derive(Clone)]
pub struct AttributesDelegate {
    room: Room,
}

fn decode<T: DeserializeOwned>(path: &[&str], value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!(error = %e, path = %path.join("/"), "attribute did not decode; treating as absent");
            None
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            debug!(error = %e, "attribute did not encode");
            None
        }
    }
}

impl AttributesDelegate {
    #[must_use]
    pub fn new(room: Room) -> Self {
        Self { room }
    }

    #[must_use]
    pub fn room(&self) -> &Room {
        &self.room
    }

    fn read<T: DeserializeOwned>(&self, path: &[&str]) -> Option<T> {
        decode(path, self.room.get(path))
    }

    // --- Apps registry ---

    /// Raw registry, keyed by application id.
    #[must_use]
    pub fn apps(&self) -> Map<String, Value> {
        match self.room.get(&[APPS]) {
            Some(Value::Object(apps)) => apps,
            _ => Map::new(),
        }
    }

    #[must_use]
    pub fn app_attributes(&self, id: &str) -> Option<AppSyncAttributes> {
        self.read(&[APPS, id])
    }

    #[must_use]
    pub fn app_state(&self, id: &str) -> Option<Value> {
        self.room.get(&[APPS, id, STATE])
    }

    #[must_use]
    pub fn app_scene_index(&self, id: &str) -> Option<u64> {
        self.read(&[APPS, id, STATE, AppAttribute::SceneIndex.as_str()])
    }

    #[must_use]
    pub fn app_scene_path(&self, id: &str) -> Option<String> {
        self.app_attributes(id)?.options.scene_path
    }

    /// Create the registry entry and its default state block.
    pub fn setup_app_attributes(&self, params: &AddAppParams, id: &str, is_dynamic_ppt: bool) {
        if self.room.get(&[APPS]).is_none() {
            self.room.safe_set([(APPS, Some(json!({})))]);
        }

        let mut options = params.options.clone();
        if is_dynamic_ppt {
            options.scenes = None;
        }
        let attrs = AppSyncAttributes {
            kind: params.kind.clone(),
            options,
            is_dynamic_ppt,
            src: params.src.clone(),
            state: None,
        };
        self.room.safe_update(&[APPS, id], encode(&attrs));
        self.room.safe_update(
            &[APPS, id, STATE],
            Some(json!({
                "size": {},
                "position": {},
                "SnapshotRect": {},
                "SceneIndex": 0,
            })),
        );
    }

    /// Update one key of an app's state block. Skipped if the block is gone.
    pub fn update_app_state(&self, app_id: &str, attribute: AppAttribute, value: Value) -> bool {
        if self.app_state(app_id).is_none() {
            return false;
        }
        self.room
            .safe_update(&[APPS, app_id, STATE, attribute.as_str()], Some(value))
    }

    /// Remove a window's registry entry and namespace, releasing focus it held.
    pub fn clean_app_attributes(&self, id: &str) {
        self.room.safe_update(&[APPS, id], None);
        self.room.safe_set([(id, None)]);
        if self.focus().as_deref() == Some(id) {
            self.clean_focus();
        }
    }

    /// Drop every window-manager field from the tree.
    pub fn clean_attributes(&self) {
        self.room.safe_set([
            (APPS, None),
            (BOX_STATE, None),
            (FOCUS, None),
            (MAIN_SCENE_PATH, None),
            (MAIN_SCENE_INDEX, None),
        ]);
    }

    // --- Focus / broadcaster ---

    #[must_use]
    pub fn focus(&self) -> Option<String> {
        self.read(&[FOCUS])
    }

    pub fn set_app_focus(&self, app_id: &str, focus: bool) -> bool {
        let value = focus.then(|| Value::String(app_id.to_string()));
        self.room.safe_set([(FOCUS, value)])
    }

    pub fn clean_focus(&self) -> bool {
        self.room.safe_set([(FOCUS, None)])
    }

    #[must_use]
    pub fn broadcaster(&self) -> Option<String> {
        self.read(&[BROADCASTER])
    }

    pub fn set_broadcaster(&self, participant_id: Option<&str>) -> bool {
        self.room
            .safe_set([(BROADCASTER, participant_id.map(|id| Value::String(id.to_string())))])
    }

    // --- Box / scenes ---

    #[must_use]
    pub fn box_state(&self) -> Option<BoxState> {
        self.read(&[BOX_STATE])
    }

    pub fn set_box_state(&self, state: Option<BoxState>) -> bool {
        self.room
            .safe_set([(BOX_STATE, state.as_ref().and_then(encode))])
    }

    #[must_use]
    pub fn main_view_scene_path(&self) -> Option<String> {
        self.read(&[MAIN_SCENE_PATH])
    }

    pub fn set_main_view_scene_path(&self, scene_path: &str) -> bool {
        self.room
            .safe_set([(MAIN_SCENE_PATH, Some(Value::String(scene_path.to_string())))])
    }

    #[must_use]
    pub fn main_view_scene_index(&self) -> Option<u64> {
        self.read(&[MAIN_SCENE_INDEX])
    }

    pub fn set_main_view_scene_index(&self, index: u64) -> bool {
        self.room.safe_set([(MAIN_SCENE_INDEX, Some(json!(index)))])
    }

    // --- Main view camera / size ---

    #[must_use]
    pub fn main_view_camera(&self) -> Option<Camera> {
        self.read(&[MAIN_VIEW_CAMERA])
    }

    pub fn set_main_view_camera(&self, camera: Camera) -> bool {
        self.room.safe_set([(MAIN_VIEW_CAMERA, encode(&camera))])
    }

    #[must_use]
    pub fn main_view_size(&self) -> Option<Size> {
        self.read(&[MAIN_VIEW_SIZE])
    }

    pub fn set_main_view_size(&self, size: Size) -> bool {
        self.room.safe_set([(MAIN_VIEW_SIZE, encode(&size))])
    }

    // --- Cursors ---

    fn ensure_cursor(&self, participant_id: &str) {
        if self.room.get(&[CURSORS, participant_id]).is_none() {
            self.room.safe_update(&[CURSORS, participant_id], Some(json!({})));
        }
    }

    pub fn update_cursor(&self, participant_id: &str, position: Point) -> bool {
        self.ensure_cursor(participant_id);
        self.room
            .safe_update(&[CURSORS, participant_id, POSITION], encode(&position))
    }

    pub fn update_cursor_state(&self, participant_id: &str, cursor_state: Option<&str>) -> bool {
        self.ensure_cursor(participant_id);
        self.room.safe_update(
            &[CURSORS, participant_id, CURSOR_STATE],
            cursor_state.map(|s| Value::String(s.to_string())),
        )
    }

    #[must_use]
    pub fn cursor_position(&self, participant_id: &str) -> Option<Point> {
        self.read(&[CURSORS, participant_id, POSITION])
    }

    #[must_use]
    pub fn cursor_state(&self, participant_id: &str) -> Option<String> {
        self.read(&[CURSORS, participant_id, CURSOR_STATE])
    }

    pub fn clean_cursor(&self, participant_id: &str) -> bool {
        self.room.safe_update(&[CURSORS, participant_id], None)
    }
}
