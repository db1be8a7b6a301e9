//! One participant's window-manager session.
//!
//! DESIGN
//! ======
//! `Session` wires a participant to the shared tree: it builds the room,
//! the attribute delegate and the view manager, and opens or closes windows
//! by keeping the registry, the window namespace and the window's view in
//! step. It owns no replicated state itself.
//!
//! Remote changes do not drive views on their own. After the host applies
//! a batch of replicated changes it calls [`Session::sync`], which
//! re-derives the writable view from `focus` and follows the broadcaster.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::context::AppContext;
use crate::delegate::{AddAppParams, AttributesDelegate};
use crate::room::{Room, WriteGate};
use crate::tree::AttributeTree;
use crate::view::Displayer;
use crate::view_manager::ViewManager;

pub struct Session {
    delegate: AttributesDelegate,
    views: ViewManager,
    config: SyncConfig,
}

impl Session {
    #[must_use]
    pub fn new(
        tree: Arc<dyn AttributeTree>,
        gate: WriteGate,
        participant_id: impl Into<String>,
        displayer: Arc<dyn Displayer>,
        config: SyncConfig,
    ) -> Self {
        let room = Room::new(tree, gate, participant_id);
        let delegate = AttributesDelegate::new(room.clone());
        let views = ViewManager::new(room, delegate.clone(), displayer, config);
        info!(participant_id = %delegate.room().participant_id(), "session started");
        Self { delegate, views, config }
    }

    #[must_use]
    pub fn room(&self) -> &Room {
        self.delegate.room()
    }

    #[must_use]
    pub fn participant_id(&self) -> &str {
        self.room().participant_id()
    }

    #[must_use]
    pub fn delegate(&self) -> &AttributesDelegate {
        &self.delegate
    }

    #[must_use]
    pub fn views(&self) -> &ViewManager {
        &self.views
    }

    /// Ids of every registered window, sorted.
    #[must_use]
    pub fn app_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.delegate.apps().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a window, create its namespace and its view.
    pub fn add_app(&self, params: &AddAppParams, app_id: &str, is_dynamic_ppt: bool) -> AppContext {
        if self.room().can_operate() {
            self.delegate.setup_app_attributes(params, app_id, is_dynamic_ppt);
            if self.room().get(&[app_id]).is_none() {
                self.room().safe_update(&[app_id], Some(Value::Object(Map::new())));
            }
        }
        self.open_app(app_id)
    }

    /// Create the local view of a window another participant registered.
    pub fn open_app(&self, app_id: &str) -> AppContext {
        if !self.views.has_view(app_id) {
            self.views.create_view(app_id);
        }
        debug!(%app_id, "window opened");
        self.context(app_id)
    }

    /// Facade for `app_id`, whether or not the window is open locally.
    #[must_use]
    pub fn context(&self, app_id: &str) -> AppContext {
        AppContext::new(app_id, self.delegate.clone(), self.views.clone(), self.config)
    }

    /// Destroy the window's view and drop its registry entry and namespace.
    /// Focus it held is released and the main view takes over.
    pub fn close_app(&self, app_id: &str) {
        let had_focus = self.delegate.focus().as_deref() == Some(app_id);
        self.views.destroy_view(app_id);
        self.delegate.clean_app_attributes(app_id);
        if had_focus {
            self.views.refresh_views();
        }
        debug!(%app_id, had_focus, "window closed");
    }

    /// Re-derive local views from replicated state after remote changes.
    pub fn sync(&self) {
        let registered = self.delegate.apps();
        for app_id in self.views.view_ids() {
            if !registered.contains_key(&app_id) {
                self.views.destroy_view(&app_id);
            }
        }
        for app_id in registered.keys() {
            if !self.views.has_view(app_id) {
                self.views.create_view(app_id);
            }
        }
        self.views.refresh_views();
        self.views.follow_broadcaster();
    }

    /// Cancel pending transitions and release every view.
    pub fn destroy(&self) {
        self.views.destroy();
        info!(participant_id = %self.participant_id(), "session destroyed");
    }
}
