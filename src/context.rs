//! Per-window facade handed to application code.
//!
//! DESIGN
//! ======
//! `AppContext` has no state of its own beyond the ids it was built with.
//! Reads go to the delegate or the view manager; writes go through the
//! room's safe layer, which owns the writability check. Window attributes
//! live at the top-level key `{appId}` of the tree.

use serde_json::Value;
use tracing::debug;

use crate::config::SyncConfig;
use crate::delegate::{AppOptions, AttributesDelegate, BoxState, SceneDefinition};
use crate::event::ListenerId;
use crate::room::Room;
use crate::storage::{Storage, StorageError};
use crate::view::{EventMessage, ViewMode};
use crate::view_manager::ViewManager;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("box for app {0} has not been created")]
    BoxNotCreated(String),
}

#[derive(Clone)]
pub struct AppContext {
    app_id: String,
    room: Room,
    delegate: AttributesDelegate,
    views: ViewManager,
    config: SyncConfig,
}

impl AppContext {
    #[must_use]
    pub fn new(app_id: impl Into<String>, delegate: AttributesDelegate, views: ViewManager, config: SyncConfig) -> Self {
        let room = delegate.room().clone();
        Self { app_id: app_id.into(), room, delegate, views, config }
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn room(&self) -> &Room {
        &self.room
    }

    #[must_use]
    pub fn delegate(&self) -> &AttributesDelegate {
        &self.delegate
    }

    #[must_use]
    pub fn views(&self) -> &ViewManager {
        &self.views
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.room.can_operate()
    }

    // --- Window attributes ---

    /// The whole window namespace.
    #[must_use]
    pub fn attributes(&self) -> Option<Value> {
        self.room.get(&[self.app_id.as_str()])
    }

    /// Value at `keys` below the window namespace.
    #[must_use]
    pub fn attributes_at(&self, keys: &[&str]) -> Option<Value> {
        let mut path = Vec::with_capacity(keys.len() + 1);
        path.push(self.app_id.as_str());
        path.extend_from_slice(keys);
        self.room.get(&path)
    }

    /// Replace the whole window namespace.
    pub fn set_attributes(&self, attributes: Value) -> bool {
        self.room.safe_update(&[self.app_id.as_str()], Some(attributes))
    }

    /// Write below the window namespace. Skipped once the window is closed,
    /// so late writes do not recreate its namespace.
    pub fn update_attributes(&self, keys: &[&str], value: Option<Value>) -> bool {
        if self.attributes().is_none() {
            debug!(app_id = %self.app_id, "window namespace gone; attribute write skipped");
            return false;
        }
        let mut path = Vec::with_capacity(keys.len() + 1);
        path.push(self.app_id.as_str());
        path.extend_from_slice(keys);
        self.room.safe_update(&path, value)
    }

    // --- Scenes / box ---

    /// Static scene list from the window options. Dynamic PPT windows have none.
    #[must_use]
    pub fn scenes(&self) -> Option<Vec<SceneDefinition>> {
        let attrs = self.delegate.app_attributes(&self.app_id)?;
        if attrs.is_dynamic_ppt {
            return None;
        }
        attrs.options.scenes
    }

    /// Options the window was added with.
    #[must_use]
    pub fn app_options(&self) -> Option<AppOptions> {
        Some(self.delegate.app_attributes(&self.app_id)?.options)
    }

    #[must_use]
    pub fn init_scene_path(&self) -> Option<String> {
        self.delegate.app_scene_path(&self.app_id)
    }

    /// # Errors
    ///
    /// Returns [`ContextError::BoxNotCreated`] while the window has no view.
    pub fn box_state(&self) -> Result<BoxState, ContextError> {
        if !self.views.has_view(&self.app_id) {
            return Err(ContextError::BoxNotCreated(self.app_id.clone()));
        }
        Ok(self.delegate.box_state().unwrap_or(BoxState::Normal))
    }

    #[must_use]
    pub fn view_mode(&self) -> Option<ViewMode> {
        self.views.app_view_mode(&self.app_id)
    }

    #[must_use]
    pub fn main_view_mode(&self) -> ViewMode {
        self.views.main_view_mode()
    }

    /// Focus this window if needed, wait for the focus switch to commit plus
    /// `focus_scene_wait`, then point the room at `scene_path`. The switch
    /// restores the window's initial scene path, so the requested one must
    /// land after it.
    pub async fn set_scene_path(&self, scene_path: &str) {
        if !self.views.has_view(&self.app_id) {
            return;
        }
        if self.delegate.focus().as_deref() != Some(self.app_id.as_str()) {
            let committed = self.views.focus_app(&self.app_id).wait().await;
            if committed != Some(true) {
                debug!(app_id = %self.app_id, ?committed, "focus switch did not commit; setting scene path anyway");
            }
            tokio::time::sleep(self.config.focus_scene_wait).await;
        }
        self.views.set_scene_path(scene_path);
    }

    // --- Room messaging ---

    /// Send a room message. Only participants with write access may send.
    pub fn dispatch_event(&self, event: &str, payload: Value) -> bool {
        if !self.is_writable() {
            debug!(app_id = %self.app_id, event, "read-only participant; message dropped");
            return false;
        }
        self.views.displayer().dispatch_event(event, payload);
        true
    }

    pub fn add_event_listener(&self, event: &str, listener: impl Fn(&EventMessage) + Send + Sync + 'static) -> ListenerId {
        self.views
            .displayer()
            .add_event_listener(event, Box::new(listener))
    }

    pub fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool {
        self.views.displayer().remove_event_listener(event, id)
    }

    // --- Storage ---

    /// Open storage `id` in this window's namespace.
    ///
    /// # Errors
    ///
    /// See [`Storage::new`].
    pub fn create_storage(&self, id: &str, default_state: Option<Value>) -> Result<Storage, StorageError> {
        Storage::new(self, id, default_state)
    }
}
