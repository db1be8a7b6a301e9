//! Contract of the host rendering layer's views, and a headless
//! implementation that records what was asked of it.
//!
//! DESIGN
//! ======
//! The host owns real views (canvas surfaces). The session only needs to
//! flip their mode, move their camera, and point them at a scene path.
//! Camera and size callbacks flow the other way: the host calls
//! `ViewManager::on_*_updated` when a view reports a change.
//!
//! The displayer also carries the host's room messaging (named events with
//! a JSON payload). Windows reach it through `AppContext::dispatch_event`
//! and its listener methods.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::camera::{Camera, Size};
use crate::event::{EventEmitter, ListenerId};

/// Input/camera authority of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Receives input; camera follows local interaction.
    Writable,
    /// Read-only camera that follows replicated state.
    Freedom,
}

/// One host view.
pub trait View: Send {
    fn mode(&self) -> ViewMode;
    fn set_mode(&mut self, mode: ViewMode);
    fn camera(&self) -> Camera;
    fn move_camera(&mut self, camera: Camera);
    fn move_camera_to_contain(&mut self, size: Size);
    fn focus_scene_path(&self) -> Option<String>;
    fn set_focus_scene_path(&mut self, path: &str);
    /// Release host resources. Must tolerate repeated calls.
    fn release(&mut self);
}

/// One room message.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub event: String,
    pub payload: Value,
}

pub type MessageListener = Box<dyn Fn(&EventMessage) + Send + Sync>;

/// Host that creates views, owns the room-wide scene path, and relays
/// room messages.
pub trait Displayer: Send + Sync {
    fn create_view(&self) -> Box<dyn View>;
    fn set_scene_path(&self, path: &str);
    fn scene_path(&self) -> Option<String>;
    fn dispatch_event(&self, event: &str, payload: Value);
    fn add_event_listener(&self, event: &str, listener: MessageListener) -> ListenerId;
    /// Returns false if no such listener was registered for `event`.
    fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool;
}

// =============================================================================
// HEADLESS HOST
// =============================================================================

/// Observable state of a [`HeadlessView`].
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    pub mode: ViewMode,
    pub camera: Camera,
    pub focus_scene_path: Option<String>,
    pub contained: Option<Size>,
    pub released: bool,
    /// Number of `set_mode` calls, to catch redundant switches.
    pub mode_writes: usize,
}

impl Default for ViewRecord {
    fn default() -> Self {
        Self {
            mode: ViewMode::Freedom,
            camera: Camera::default(),
            focus_scene_path: None,
            contained: None,
            released: false,
            mode_writes: 0,
        }
    }
}

/// View with no surface. Its record is shared with the displayer so callers
/// can inspect it after handing the view to a `ViewManager`.
pub struct HeadlessView {
    record: Arc<Mutex<ViewRecord>>,
}

impl HeadlessView {
    fn record(&self) -> MutexGuard<'_, ViewRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl View for HeadlessView {
    fn mode(&self) -> ViewMode {
        self.record().mode
    }

    fn set_mode(&mut self, mode: ViewMode) {
        let mut record = self.record();
        record.mode = mode;
        record.mode_writes += 1;
    }

    fn camera(&self) -> Camera {
        self.record().camera
    }

    fn move_camera(&mut self, camera: Camera) {
        self.record().camera = camera;
    }

    fn move_camera_to_contain(&mut self, size: Size) {
        self.record().contained = Some(size);
    }

    fn focus_scene_path(&self) -> Option<String> {
        self.record().focus_scene_path.clone()
    }

    fn set_focus_scene_path(&mut self, path: &str) {
        self.record().focus_scene_path = Some(path.to_string());
    }

    fn release(&mut self) {
        self.record().released = true;
    }
}

/// Displayer producing [`HeadlessView`]s, in creation order.
#[derive(Default)]
pub struct HeadlessDisplayer {
    views: Mutex<Vec<Arc<Mutex<ViewRecord>>>>,
    scene_path: Mutex<Option<String>>,
    scene_path_writes: Mutex<Vec<String>>,
    /// Messages loop back to this displayer's own listeners.
    channels: Mutex<HashMap<String, Arc<EventEmitter<EventMessage>>>>,
}

impl HeadlessDisplayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the `index`-th created view (0 is the first, usually the main view).
    #[must_use]
    pub fn view(&self, index: usize) -> Option<ViewRecord> {
        let views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        views
            .get(index)
            .map(|record| record.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    #[must_use]
    pub fn view_count(&self) -> usize {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every scene path set on the room, oldest first.
    #[must_use]
    pub fn scene_path_history(&self) -> Vec<String> {
        self.scene_path_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn channel(&self, event: &str) -> Option<Arc<EventEmitter<EventMessage>>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
    }
}

impl Displayer for HeadlessDisplayer {
    fn create_view(&self) -> Box<dyn View> {
        let record = Arc::new(Mutex::new(ViewRecord::default()));
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Box::new(HeadlessView { record })
    }

    fn set_scene_path(&self, path: &str) {
        *self.scene_path.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.to_string());
        self.scene_path_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }

    fn scene_path(&self) -> Option<String> {
        self.scene_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch_event(&self, event: &str, payload: Value) {
        if let Some(channel) = self.channel(event) {
            channel.dispatch(&EventMessage { event: event.to_string(), payload });
        }
    }

    fn add_event_listener(&self, event: &str, listener: MessageListener) -> ListenerId {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .add_listener(listener)
    }

    fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool {
        self.channel(event)
            .is_some_and(|channel| channel.remove_listener(id))
    }
}
