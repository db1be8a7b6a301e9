use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::memory::MemoryTree;
use crate::room::WriteGate;
use crate::tree::AttributeTree;

fn delegate(writable: bool) -> (Arc<MemoryTree>, AttributesDelegate) {
    let tree = Arc::new(MemoryTree::new());
    let room = Room::new(tree.clone(), WriteGate::new(writable), "p1");
    (tree, AttributesDelegate::new(room))
}

fn slide_params() -> AddAppParams {
    AddAppParams {
        kind: "Slide".into(),
        options: AppOptions {
            scene_path: Some("/deck".into()),
            title: Some("Deck".into()),
            scenes: Some(vec![SceneDefinition { name: "1".into(), ppt: None }]),
        },
        src: Some("https://cdn.example/slide.js".into()),
    }
}

// --- Apps registry ---

#[test]
fn setup_writes_entry_and_default_state() {
    let (tree, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);

    assert_eq!(
        tree.get(&["apps", "a1"]),
        Some(json!({
            "kind": "Slide",
            "options": {"scenePath": "/deck", "title": "Deck", "scenes": [{"name": "1"}]},
            "isDynamicPPT": false,
            "src": "https://cdn.example/slide.js",
            "state": {"size": {}, "position": {}, "SnapshotRect": {}, "SceneIndex": 0},
        }))
    );
}

#[test]
fn setup_drops_scenes_for_dynamic_ppt() {
    let (_, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", true);
    let attrs = delegate.app_attributes("a1").unwrap();
    assert!(attrs.is_dynamic_ppt);
    assert_eq!(attrs.options.scenes, None);
    assert_eq!(attrs.options.scene_path.as_deref(), Some("/deck"));
}

#[test]
fn setup_twice_last_write_wins() {
    let (_, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    let mut params = slide_params();
    params.kind = "Video".into();
    delegate.setup_app_attributes(&params, "a1", false);
    assert_eq!(delegate.apps().len(), 1);
    assert_eq!(delegate.app_attributes("a1").unwrap().kind, "Video");
}

#[test]
fn setup_without_write_access_writes_nothing() {
    let (tree, delegate) = delegate(false);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    assert_eq!(tree.snapshot(), json!({}));
}

#[test]
fn scene_accessors_project_registry() {
    let (_, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    assert_eq!(delegate.app_scene_path("a1").as_deref(), Some("/deck"));
    assert_eq!(delegate.app_scene_index("a1"), Some(0));
    assert_eq!(delegate.app_scene_path("missing"), None);
}

#[test]
fn update_app_state_writes_one_key() {
    let (_, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    assert!(delegate.update_app_state("a1", AppAttribute::SceneIndex, json!(4)));
    assert_eq!(delegate.app_scene_index("a1"), Some(4));
}

#[test]
fn update_app_state_skips_unknown_app() {
    let (tree, delegate) = delegate(true);
    assert!(!delegate.update_app_state("ghost", AppAttribute::Position, json!({"x": 1})));
    assert_eq!(tree.snapshot(), json!({}));
}

#[test]
fn clean_app_releases_its_focus() {
    let (tree, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    tree.update(&["a1"], Some(json!({"_WM-STORAGE_": {}}))).unwrap();
    delegate.set_app_focus("a1", true);

    delegate.clean_app_attributes("a1");
    assert_eq!(delegate.app_attributes("a1"), None);
    assert_eq!(tree.get(&["a1"]), None);
    assert_eq!(delegate.focus(), None);
}

#[test]
fn clean_app_keeps_other_focus() {
    let (_, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    delegate.setup_app_attributes(&slide_params(), "a2", false);
    delegate.set_app_focus("a2", true);
    delegate.clean_app_attributes("a1");
    assert_eq!(delegate.focus().as_deref(), Some("a2"));
}

#[test]
fn clean_attributes_drops_manager_fields() {
    let (tree, delegate) = delegate(true);
    delegate.setup_app_attributes(&slide_params(), "a1", false);
    delegate.set_app_focus("a1", true);
    delegate.set_box_state(Some(BoxState::Maximized));
    delegate.set_main_view_scene_path("/init");
    delegate.set_main_view_scene_index(2);
    delegate.clean_attributes();
    assert_eq!(tree.snapshot(), json!({}));
}

// --- Focus / broadcaster / box ---

#[test]
fn focus_round_trip() {
    let (_, delegate) = delegate(true);
    assert!(delegate.set_app_focus("a1", true));
    assert_eq!(delegate.focus().as_deref(), Some("a1"));
    assert!(delegate.set_app_focus("a1", false));
    assert_eq!(delegate.focus(), None);
}

#[test]
fn broadcaster_can_be_cleared() {
    let (_, delegate) = delegate(true);
    delegate.set_broadcaster(Some("p1"));
    assert_eq!(delegate.broadcaster().as_deref(), Some("p1"));
    delegate.set_broadcaster(None);
    assert_eq!(delegate.broadcaster(), None);
}

#[test]
fn box_state_uses_lowercase_names() {
    let (tree, delegate) = delegate(true);
    delegate.set_box_state(Some(BoxState::Minimized));
    assert_eq!(tree.get(&["boxState"]), Some(json!("minimized")));
    assert_eq!(delegate.box_state(), Some(BoxState::Minimized));
}

#[test]
fn malformed_box_state_reads_absent() {
    let (tree, delegate) = delegate(true);
    tree.update(&["boxState"], Some(json!("sideways"))).unwrap();
    assert_eq!(delegate.box_state(), None);
}

#[test]
fn main_scene_fields() {
    let (_, delegate) = delegate(true);
    delegate.set_main_view_scene_path("/init");
    delegate.set_main_view_scene_index(3);
    assert_eq!(delegate.main_view_scene_path().as_deref(), Some("/init"));
    assert_eq!(delegate.main_view_scene_index(), Some(3));
}

// --- Main view camera / size ---

#[test]
fn main_view_camera_round_trip() {
    let (tree, delegate) = delegate(true);
    delegate.set_main_view_camera(Camera::new(10.0, 20.0, 2.0));
    assert_eq!(tree.get(&["mainViewCamera"]), Some(json!({"centerX": 10.0, "centerY": 20.0, "scale": 2.0})));
    assert_eq!(delegate.main_view_camera(), Some(Camera::new(10.0, 20.0, 2.0)));
}

#[test]
fn main_view_size_round_trip() {
    let (_, delegate) = delegate(true);
    delegate.set_main_view_size(Size::new(1280.0, 720.0));
    assert_eq!(delegate.main_view_size(), Some(Size::new(1280.0, 720.0)));
}

// --- Cursors ---

#[test]
fn cursor_records_are_created_on_demand() {
    let (tree, delegate) = delegate(true);
    assert!(delegate.update_cursor("p2", Point::new(3.0, 4.0)));
    assert!(delegate.update_cursor_state("p2", Some("leave")));
    assert_eq!(
        tree.get(&["cursors", "p2"]),
        Some(json!({"position": {"x": 3.0, "y": 4.0}, "cursorState": "leave"}))
    );
    assert_eq!(delegate.cursor_position("p2"), Some(Point::new(3.0, 4.0)));
    assert_eq!(delegate.cursor_state("p2").as_deref(), Some("leave"));
}

#[test]
fn clean_cursor_removes_record() {
    let (_, delegate) = delegate(true);
    delegate.update_cursor("p2", Point::new(0.0, 0.0));
    assert!(delegate.clean_cursor("p2"));
    assert_eq!(delegate.cursor_position("p2"), None);
}
