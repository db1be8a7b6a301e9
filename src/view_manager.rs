//! View/camera arbitration: which view is writable, and whose camera is
//! authoritative.
//!
//! DESIGN
//! ======
//! Each view is either `Writable` (takes input, camera follows the local
//! user) or `Freedom` (read-only, follows replicated state). After every
//! settled transition exactly one of {main view, focused app view} is
//! writable for a participant that can operate.
//!
//! Switching writability also switches the room's scene path, which every
//! participant observes. Doing both in the same tick as a peer's own switch
//! renders twice, so the commit waits a short settle delay first. Only the
//! latest requested switch commits; an earlier pending one is aborted.
//!
//! Camera callbacks are always cached locally (to restore a view when it
//! regains writability), but reach the tree only when this participant is
//! the broadcaster, so one participant's camera is authoritative.
//!
//! LOCKING
//! =======
//! View state sits behind one mutex. Main-view mode notices are collected
//! while it is held and dispatched after it is released, so listeners may
//! call back into the manager.

#[cfg(test)]
#[path = "view_manager_test.rs"]
mod view_manager_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::camera::{Camera, CameraStore, Size};
use crate::config::SyncConfig;
use crate::consts::MAIN_VIEW_ID;
use crate::delegate::{AttributesDelegate, BoxState};
use crate::event::EventEmitter;
use crate::room::Room;
use crate::schedule::{Deferred, LatestTask};
use crate::view::{Displayer, View, ViewMode};

// =============================================================================
// STATE
// =============================================================================

struct ManagedView {
    view: Box<dyn View>,
    /// Detached while a switch restores the camera, so the restore is not
    /// mistaken for user interaction.
    camera_listening: bool,
}

impl ManagedView {
    fn new(view: Box<dyn View>) -> Self {
        Self { view, camera_listening: true }
    }
}

struct ViewState {
    main: ManagedView,
    apps: HashMap<String, ManagedView>,
    cameras: CameraStore,
    /// Last replicated size this participant contained its main view to.
    followed_size: Option<Size>,
    released: bool,
}

/// Main-view mode changes gathered under the lock.
type Notices = Vec<ViewMode>;

#[derive(Clone, Copy)]
enum Slot {
    Switch,
    Size,
}

struct Shared {
    room: Room,
    delegate: AttributesDelegate,
    displayer: Arc<dyn Displayer>,
    config: SyncConfig,
    state: Mutex<ViewState>,
    switch_task: LatestTask,
    size_task: LatestTask,
    main_view_mode_changed: EventEmitter<ViewMode>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task(&self, slot: Slot) -> &LatestTask {
        match slot {
            Slot::Switch => &self.switch_task,
            Slot::Size => &self.size_task,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&Self, &mut ViewState, &mut Notices) -> R) -> R {
        let mut notices = Notices::new();
        let result = {
            let mut state = self.lock();
            f(self, &mut state, &mut notices)
        };
        for mode in notices {
            self.main_view_mode_changed.dispatch(&mode);
        }
        result
    }

    fn is_broadcaster(&self) -> bool {
        self.delegate.broadcaster().as_deref() == Some(self.room.participant_id())
    }

    /// Point the room at `path` unless it is already there.
    fn set_room_scene_path(&self, path: &str) -> bool {
        if self.displayer.scene_path().as_deref() == Some(path) {
            return false;
        }
        self.displayer.set_scene_path(path);
        true
    }

    fn set_main_mode(state: &mut ViewState, mode: ViewMode, notices: &mut Notices) {
        if state.main.view.mode() != mode {
            state.main.view.set_mode(mode);
            notices.push(mode);
        }
    }

    fn freedom_all_views(&self, state: &mut ViewState, notices: &mut Notices) {
        for (app_id, app) in &mut state.apps {
            if let Some(path) = self.delegate.app_scene_path(app_id) {
                app.view.set_focus_scene_path(&path);
            }
            if app.view.mode() != ViewMode::Freedom {
                app.view.set_mode(ViewMode::Freedom);
            }
        }
        Self::set_main_mode(state, ViewMode::Freedom, notices);
        if state.main.view.focus_scene_path().is_none() {
            if let Some(path) = self.delegate.main_view_scene_path() {
                state.main.view.set_focus_scene_path(&path);
            }
        }
    }

    fn switch_main_to_writer(&self, state: &mut ViewState, notices: &mut Notices) -> bool {
        if !self.room.can_operate() {
            return false;
        }
        Self::set_main_mode(state, ViewMode::Writable, notices);
        true
    }

    fn commit_main_writable(&self, state: &mut ViewState, notices: &mut Notices) -> bool {
        if state.released {
            return false;
        }
        if let Some(focus) = self.delegate.focus() {
            debug!(%focus, "main view switch abandoned: an app holds focus");
            return false;
        }
        self.freedom_all_views(state, notices);
        state.main.camera_listening = false;
        if let Some(path) = self.delegate.main_view_scene_path() {
            self.set_room_scene_path(&path);
        }
        let switched = self.switch_main_to_writer(state, notices);
        let ViewState { main, cameras, .. } = state;
        cameras.recover_camera(MAIN_VIEW_ID, &mut *main.view);
        main.camera_listening = true;
        debug!(switched, "main view writable switch committed");
        switched
    }

    fn commit_app_writable(&self, state: &mut ViewState, app_id: &str, notices: &mut Notices) -> bool {
        if state.released || !state.apps.contains_key(app_id) {
            debug!(%app_id, "app switch abandoned: view not available");
            return false;
        }
        if self.delegate.box_state() == Some(BoxState::Minimized) {
            debug!(%app_id, "app switch abandoned: boxes minimized");
            return false;
        }
        if !self.room.can_operate() {
            return false;
        }
        self.freedom_all_views(state, notices);

        let ViewState { apps, cameras, .. } = state;
        let Some(app) = apps.get_mut(app_id) else {
            return false;
        };
        app.camera_listening = false;
        if let Some(path) = self.delegate.app_scene_path(app_id) {
            self.set_room_scene_path(&path);
        }
        app.view.set_mode(ViewMode::Writable);
        cameras.recover_camera(app_id, &mut *app.view);
        app.camera_listening = true;
        debug!(%app_id, "app view writable switch committed");
        true
    }
}

// =============================================================================
// VIEW MANAGER
// =============================================================================

/// Owns the main view and per-window views. Cheap to clone.
#[derive(Clone)]
pub struct ViewManager {
    shared: Arc<Shared>,
}

impl ViewManager {
    /// Create the main view. With no app focused, the main view starts writable.
    #[must_use]
    pub fn new(room: Room, delegate: AttributesDelegate, displayer: Arc<dyn Displayer>, config: SyncConfig) -> Self {
        let mut main = displayer.create_view();
        let mut cameras = CameraStore::new();
        cameras.set_camera(MAIN_VIEW_ID, main.camera());
        if let Some(path) = delegate.main_view_scene_path() {
            main.set_focus_scene_path(&path);
        }

        let manager = Self {
            shared: Arc::new(Shared {
                room,
                delegate,
                displayer,
                config,
                state: Mutex::new(ViewState {
                    main: ManagedView::new(main),
                    apps: HashMap::new(),
                    cameras,
                    followed_size: None,
                    released: false,
                }),
                switch_task: LatestTask::new(),
                size_task: LatestTask::new(),
                main_view_mode_changed: EventEmitter::new(),
            }),
        };
        if manager.shared.delegate.focus().is_none() {
            manager.switch_main_view_mode_to_writer();
        }
        manager
    }

    fn defer<R, F>(&self, slot: Slot, delay: Duration, action: F) -> Deferred<R>
    where
        F: FnOnce(&Shared) -> R + Send + 'static,
        R: Send + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => {
                let shared = self.shared.clone();
                let handle = self.shared.task(slot).spawn_on(&runtime, async move {
                    tokio::time::sleep(delay).await;
                    action(&shared)
                });
                Deferred::Pending(handle)
            }
            Err(_) => {
                warn!("no async runtime; applying deferred view change immediately");
                Deferred::Ready(action(&self.shared))
            }
        }
    }

    /// Fires with the new mode whenever the main view changes mode.
    #[must_use]
    pub fn main_view_mode_changed(&self) -> &EventEmitter<ViewMode> {
        &self.shared.main_view_mode_changed
    }

    #[must_use]
    pub fn displayer(&self) -> &Arc<dyn Displayer> {
        &self.shared.displayer
    }

    // --- Queries ---

    #[must_use]
    pub fn main_view_mode(&self) -> ViewMode {
        self.shared.lock().main.view.mode()
    }

    #[must_use]
    pub fn app_view_mode(&self, app_id: &str) -> Option<ViewMode> {
        self.shared
            .lock()
            .apps
            .get(app_id)
            .map(|app| app.view.mode())
    }

    /// Ids of every writable view; the main view is reported as `"mainView"`.
    #[must_use]
    pub fn writable_views(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut ids: Vec<String> = state
            .apps
            .iter()
            .filter(|(_, app)| app.view.mode() == ViewMode::Writable)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        if state.main.view.mode() == ViewMode::Writable {
            ids.insert(0, MAIN_VIEW_ID.to_string());
        }
        ids
    }

    /// Ids of every app view, sorted.
    #[must_use]
    pub fn view_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.lock().apps.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn has_view(&self, app_id: &str) -> bool {
        self.shared.lock().apps.contains_key(app_id)
    }

    #[must_use]
    pub fn cached_camera(&self, id: &str) -> Option<Camera> {
        self.shared.lock().cameras.camera(id)
    }

    #[must_use]
    pub fn is_switch_pending(&self) -> bool {
        self.shared.switch_task.is_pending()
    }

    // --- View lifecycle ---

    /// Create a view for a window. New views start in `Freedom`.
    pub fn create_view(&self, app_id: &str) {
        let mut view = self.shared.displayer.create_view();
        view.set_mode(ViewMode::Freedom);
        let mut state = self.shared.lock();
        state.cameras.set_camera(app_id, view.camera());
        if let Some(mut previous) = state
            .apps
            .insert(app_id.to_string(), ManagedView::new(view))
        {
            previous.view.release();
        }
    }

    pub fn destroy_view(&self, app_id: &str) -> bool {
        let mut state = self.shared.lock();
        state.cameras.delete_camera(app_id);
        match state.apps.remove(app_id) {
            Some(mut app) => {
                app.view.release();
                true
            }
            None => false,
        }
    }

    /// Point the room at `path`. Returns false when it was already there.
    pub fn set_scene_path(&self, path: &str) -> bool {
        self.shared.set_room_scene_path(path)
    }

    // --- Host callbacks ---

    /// Main view reported a camera change.
    pub fn on_main_view_camera_updated(&self, camera: Camera) {
        let shared = &self.shared;
        let mut state = shared.lock();
        if !state.main.camera_listening {
            return;
        }
        state.cameras.set_camera(MAIN_VIEW_ID, camera);
        if shared.is_broadcaster() {
            shared.delegate.set_main_view_camera(camera);
        }
    }

    /// Main view reported a size change. Replicated after a trailing debounce.
    pub fn on_main_view_size_updated(&self, size: Size) {
        if !self.shared.is_broadcaster() {
            return;
        }
        self.defer(Slot::Size, self.shared.config.size_debounce, move |shared| {
            shared.delegate.set_main_view_size(size)
        });
    }

    /// An app view reported a camera change. App cameras are only cached.
    pub fn on_app_camera_updated(&self, app_id: &str, camera: Camera) {
        let mut state = self.shared.lock();
        let listening = state
            .apps
            .get(app_id)
            .is_some_and(|app| app.camera_listening);
        if listening {
            state.cameras.set_camera(app_id, camera);
        }
    }

    // --- Transitions ---

    /// Make the main view writable now. No-op without write access.
    pub fn switch_main_view_mode_to_writer(&self) -> bool {
        self.shared
            .with_state(|shared, state, notices| shared.switch_main_to_writer(state, notices))
    }

    /// Force every view, main included, into `Freedom`.
    pub fn freedom_all_views(&self) {
        self.shared
            .with_state(|shared, state, notices| shared.freedom_all_views(state, notices));
    }

    /// Local click/touch on the main view: take focus back to the main view
    /// and become the broadcaster. Resolves once the settled switch commits;
    /// false when ignored or superseded.
    pub async fn main_view_click_handler(&self) -> bool {
        let shared = &self.shared;
        if !shared.room.can_operate() || self.main_view_mode() == ViewMode::Writable {
            return false;
        }
        shared.delegate.clean_focus();
        shared.delegate.set_broadcaster(Some(shared.room.participant_id()));
        self.freedom_all_views();
        self.switch_main_view_to_writer()
            .wait()
            .await
            .unwrap_or(false)
    }

    /// After the settle delay: restore the main scene path, make the main
    /// view writable, and recover its cached camera.
    pub fn switch_main_view_to_writer(&self) -> Deferred<bool> {
        self.defer(Slot::Switch, self.shared.config.settle_delay, |shared| {
            shared.with_state(|shared, state, notices| shared.commit_main_writable(state, notices))
        })
    }

    /// Give write focus to `app_id` and schedule its view switch.
    pub fn focus_app(&self, app_id: &str) -> Deferred<bool> {
        if !self.shared.delegate.set_app_focus(app_id, true) {
            return Deferred::Ready(false);
        }
        self.switch_app_to_writer(app_id)
    }

    /// Free every view now; after the settle delay make `app_id` writable.
    /// Abandoned if the view is gone or boxes are minimized by then.
    pub fn switch_app_to_writer(&self, app_id: &str) -> Deferred<bool> {
        self.freedom_all_views();
        let app_id = app_id.to_string();
        self.defer(Slot::Switch, self.shared.config.settle_delay, move |shared| {
            shared.with_state(|shared, state, notices| shared.commit_app_writable(state, &app_id, notices))
        })
    }

    /// Re-derive the writable view from the replicated focus. A no-op when
    /// the right view is already writable.
    pub fn refresh_views(&self) {
        let needs_main_switch = self.shared.with_state(|shared, state, notices| {
            if let Some(path) = shared.delegate.main_view_scene_path() {
                state.main.view.set_focus_scene_path(&path);
            }
            match shared.delegate.focus() {
                Some(focus) => {
                    let writable = state
                        .apps
                        .get(&focus)
                        .map(|app| app.view.mode() == ViewMode::Writable);
                    if writable == Some(false) && shared.room.can_operate() {
                        // A pending main-view switch is stale once focus is replicated.
                        shared.switch_task.cancel();
                        shared.freedom_all_views(state, notices);
                        let ViewState { apps, cameras, .. } = state;
                        if let Some(app) = apps.get_mut(&focus) {
                            app.camera_listening = false;
                            app.view.set_mode(ViewMode::Writable);
                            cameras.recover_camera(&focus, &mut *app.view);
                            app.camera_listening = true;
                        }
                    }
                    false
                }
                None => {
                    if state.main.view.mode() == ViewMode::Writable {
                        return false;
                    }
                    shared.freedom_all_views(state, notices);
                    true
                }
            }
        });
        if needs_main_switch {
            self.switch_main_view_to_writer();
        }
    }

    /// Follow the broadcaster's replicated main-view size and camera.
    /// The replicated scale is applied relative to the view's current scale,
    /// and a camera equal to the current one is skipped. Returns false for
    /// the broadcaster itself or when nothing changed.
    pub fn follow_broadcaster(&self) -> bool {
        let shared = &self.shared;
        if shared.is_broadcaster() {
            return false;
        }
        let size = shared.delegate.main_view_size();
        let camera = shared.delegate.main_view_camera();
        let mut state = shared.lock();
        let mut moved = false;
        if let Some(size) = size {
            if state.followed_size != Some(size) {
                state.main.view.move_camera_to_contain(size);
                state.followed_size = Some(size);
                moved = true;
            }
        }
        if let Some(camera) = camera {
            let current = state.main.view.camera();
            if current != camera {
                let scale = camera.scale * current.scale;
                state
                    .main
                    .view
                    .move_camera(Camera::new(camera.center_x, camera.center_y, scale));
                moved = true;
            }
        }
        moved
    }

    /// Cancel pending switches and release every view.
    pub fn destroy(&self) {
        self.shared.switch_task.cancel();
        self.shared.size_task.cancel();
        let mut state = self.shared.lock();
        for (_, mut app) in state.apps.drain() {
            app.view.release();
        }
        state.main.view.release();
        state.released = true;
    }
}
