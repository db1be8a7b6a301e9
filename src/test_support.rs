//! Builders shared by the unit tests.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::SyncConfig;
use crate::context::AppContext;
use crate::delegate::{AddAppParams, AppOptions, AttributesDelegate};
use crate::memory::MemoryTree;
use crate::room::{Room, WriteGate};
use crate::view::{HeadlessDisplayer, ViewRecord};
use crate::view_manager::ViewManager;

/// One participant wired to a `MemoryTree`, with a headless displayer.
pub struct Participant {
    pub tree: Arc<MemoryTree>,
    pub displayer: Arc<HeadlessDisplayer>,
    pub gate: WriteGate,
    pub room: Room,
    pub delegate: AttributesDelegate,
    pub views: ViewManager,
}

impl Participant {
    /// Writable participant on a fresh tree.
    #[must_use]
    pub fn new(participant_id: &str) -> Self {
        Self::join(Arc::new(MemoryTree::new()), participant_id, true)
    }

    /// Participant on an existing (possibly shared) tree.
    #[must_use]
    pub fn join(tree: Arc<MemoryTree>, participant_id: &str, writable: bool) -> Self {
        let gate = WriteGate::new(writable);
        let room = Room::new(tree.clone(), gate.clone(), participant_id);
        let delegate = AttributesDelegate::new(room.clone());
        let displayer = Arc::new(HeadlessDisplayer::new());
        let views = ViewManager::new(room.clone(), delegate.clone(), displayer.clone(), SyncConfig::default());
        Self { tree, displayer, gate, room, delegate, views }
    }

    /// Register a window with a scene path, create its namespace and view.
    pub fn open_app(&self, app_id: &str, scene_path: &str) -> AppContext {
        let params = AddAppParams {
            kind: "Slide".into(),
            options: AppOptions { scene_path: Some(scene_path.into()), title: None, scenes: None },
            src: None,
        };
        self.delegate.setup_app_attributes(&params, app_id, false);
        self.room.safe_update(&[app_id], Some(Value::Object(Map::new())));
        self.views.create_view(app_id);
        self.context(app_id)
    }

    #[must_use]
    pub fn context(&self, app_id: &str) -> AppContext {
        AppContext::new(app_id, self.delegate.clone(), self.views.clone(), SyncConfig::default())
    }

    /// Record of the main view (always the first one created).
    #[must_use]
    pub fn main_view(&self) -> ViewRecord {
        self.displayer.view(0).unwrap_or_default()
    }

    /// Record of the `n`-th app view created, counting from 1.
    #[must_use]
    pub fn app_view(&self, n: usize) -> ViewRecord {
        self.displayer.view(n).unwrap_or_default()
    }
}
