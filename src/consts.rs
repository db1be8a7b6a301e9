//! Shared constants: attribute tree field names, namespaces, and timings.

// ── Top-level attribute fields ──────────────────────────────────

/// Registry of open windows keyed by application instance id.
pub const APPS: &str = "apps";

/// Application id holding write focus. Absent means the main view.
pub const FOCUS: &str = "focus";

/// Per-app state block inside an `apps` entry.
pub const STATE: &str = "state";

/// Shared window box state (`normal`, `minimized`, `maximized`).
pub const BOX_STATE: &str = "boxState";

/// Replicated main-view camera, written only by the broadcaster.
pub const MAIN_VIEW_CAMERA: &str = "mainViewCamera";

/// Replicated main-view size, written only by the broadcaster.
pub const MAIN_VIEW_SIZE: &str = "mainViewSize";

/// Participant id authoritative for main-view camera and size.
pub const BROADCASTER: &str = "broadcaster";

/// Per-participant cursor records.
pub const CURSORS: &str = "cursors";

/// Cursor position inside a cursor record.
pub const POSITION: &str = "position";

/// Cursor state inside a cursor record.
pub const CURSOR_STATE: &str = "cursorState";

/// Scene path of the main view.
pub const MAIN_SCENE_PATH: &str = "_mainScenePath";

/// Scene index of the main view.
pub const MAIN_SCENE_INDEX: &str = "_mainSceneIndex";

// ── Storage ─────────────────────────────────────────────────────

/// Namespace under an app's attributes that holds every `Storage`.
pub const STORAGE_NS: &str = "_WM-STORAGE_";

// ── Views ───────────────────────────────────────────────────────

/// Camera-store key of the main view.
pub const MAIN_VIEW_ID: &str = "mainView";

// ── Timings ─────────────────────────────────────────────────────

/// Delay before committing a writable-mode switch, in milliseconds.
pub const SET_SCENE_PATH_DELAY_MS: u64 = 100;

/// Trailing debounce for replicating the main-view size, in milliseconds.
pub const MAIN_VIEW_SIZE_DEBOUNCE_MS: u64 = 200;

/// Wait between focusing a box and switching its scene path, in milliseconds.
pub const FOCUS_SCENE_WAIT_MS: u64 = 50;
