//! Camera and size values shared between views and the attribute tree, plus
//! the local per-view camera cache used to restore a view when it regains
//! writability.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::view::View;

/// A point in world space, e.g. a cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// View camera. `center_x` / `center_y` are world coordinates at the view
/// center; `scale` is the zoom factor (1.0 = no zoom).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub center_x: f64,
    pub center_y: f64,
    pub scale: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { center_x: 0.0, center_y: 0.0, scale: 1.0 }
    }
}

impl Camera {
    #[must_use]
    pub fn new(center_x: f64, center_y: f64, scale: f64) -> Self {
        Self { center_x, center_y, scale }
    }
}

/// View size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Last known camera per view id (`"mainView"` or an application id).
#[derive(Debug, Default)]
pub struct CameraStore {
    cameras: HashMap<String, Camera>,
}

impl CameraStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_camera(&mut self, id: &str, camera: Camera) {
        self.cameras.insert(id.to_string(), camera);
    }

    #[must_use]
    pub fn camera(&self, id: &str) -> Option<Camera> {
        self.cameras.get(id).copied()
    }

    pub fn delete_camera(&mut self, id: &str) -> Option<Camera> {
        self.cameras.remove(id)
    }

    /// Move `view` back to its cached camera. Returns false when nothing is
    /// cached or the view is already there.
    pub fn recover_camera(&self, id: &str, view: &mut dyn View) -> bool {
        let Some(camera) = self.camera(id) else {
            return false;
        };
        if view.camera() == camera {
            return false;
        }
        view.move_camera(camera);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
