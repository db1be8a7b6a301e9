//! Replays a short two-participant session against an in-memory tree and
//! logs what each participant observes.

use std::sync::Arc;

use boardsync::camera::Camera;
use boardsync::config::SyncConfig;
use boardsync::delegate::{AddAppParams, AppOptions};
use boardsync::memory::MemoryTree;
use boardsync::room::WriteGate;
use boardsync::session::Session;
use boardsync::storage::StorageError;
use boardsync::view::HeadlessDisplayer;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(SyncConfig::from_env()).await {
        tracing::error!(error = %e, "demo session failed");
        std::process::exit(1);
    }
}

async fn run(config: SyncConfig) -> Result<(), StorageError> {
    let tree = Arc::new(MemoryTree::new());
    let alice = Session::new(tree.clone(), WriteGate::new(true), "alice", Arc::new(HeadlessDisplayer::new()), config);
    let bob = Session::new(tree.clone(), WriteGate::new(true), "bob", Arc::new(HeadlessDisplayer::new()), config);

    alice.delegate().set_main_view_scene_path("/init");
    let params = AddAppParams {
        kind: "Counter".into(),
        options: AppOptions { scene_path: Some("/counter".into()), title: Some("Counter".into()), scenes: None },
        src: None,
    };
    let alice_app = alice.add_app(&params, "counter-1", false);
    tree.flush();
    bob.sync();
    let bob_app = bob.context("counter-1");

    let alice_store = alice_app.create_storage("main", Some(json!({ "count": 0 })))?;
    let bob_store = bob_app.create_storage("main", None)?;
    for (name, store) in [("alice", &alice_store), ("bob", &bob_store)] {
        store.on_state_changed().add_listener(move |diff| {
            for (key, change) in diff {
                tracing::info!(
                    participant = name,
                    %key,
                    old = %render(change.old_value.as_deref()),
                    new = %render(change.new_value.as_deref()),
                    "storage diff"
                );
            }
        });
    }

    alice_store.set_state([("count", Some(Arc::new(json!(1))))]);
    alice_store.set_state([("count", Some(Arc::new(json!(2))))]);
    bob_store.set_state([("tags", Some(Arc::new(json!(["draft"]))))]);
    tree.flush();

    alice.views().focus_app("counter-1").wait().await;
    tree.flush();
    bob.sync();
    tracing::info!(
        alice_main = ?alice.views().main_view_mode(),
        alice_app = ?alice.views().app_view_mode("counter-1"),
        "after focusing the counter"
    );

    alice.views().main_view_click_handler().await;
    alice.views().on_main_view_camera_updated(Camera::new(120.0, -40.0, 1.5));
    tree.flush();
    bob.sync();
    tracing::info!(
        alice_main = ?alice.views().main_view_mode(),
        broadcaster = ?bob.delegate().broadcaster(),
        bob_camera = ?bob.delegate().main_view_camera(),
        "after clicking the main view"
    );

    alice.close_app("counter-1");
    tree.flush();
    bob.sync();
    tracing::info!(apps = ?bob.app_ids(), bob_storage_destroyed = bob_store.is_destroyed(), "after closing");

    alice.destroy();
    bob.destroy();
    Ok(())
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "-".to_string(), Value::to_string)
}
