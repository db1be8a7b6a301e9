use std::sync::Mutex;

use serde_json::json;

use super::*;
use crate::memory::MemoryTree;
use crate::test_support::Participant;
use crate::tree::AttributeTree;

type Diffs = Arc<Mutex<Vec<StorageDiff>>>;

fn record(storage: &Storage) -> Diffs {
    let diffs: Diffs = Arc::new(Mutex::new(Vec::new()));
    let sink = diffs.clone();
    storage
        .on_state_changed()
        .add_listener(move |diff: &StorageDiff| sink.lock().unwrap().push(diff.clone()));
    diffs
}

fn taken(diffs: &Diffs) -> Vec<StorageDiff> {
    std::mem::take(&mut *diffs.lock().unwrap())
}

fn val(v: Value) -> Option<StateValue> {
    Some(Arc::new(v))
}

fn open(p: &Participant) -> Storage {
    p.open_app("a1", "/deck").create_storage("s1", None).unwrap()
}

fn tree_entry(p: &Participant, key: &str) -> Option<Value> {
    p.tree.get(&["a1", STORAGE_NS, "s1", key])
}

// --- Construction ---

#[test]
fn empty_id_is_rejected() {
    let p = Participant::new("p1");
    let ctx = p.open_app("a1", "/deck");
    assert!(matches!(ctx.create_storage("", None), Err(StorageError::EmptyId)));
}

#[test]
fn non_object_default_is_rejected() {
    let p = Participant::new("p1");
    let ctx = p.open_app("a1", "/deck");
    let err = ctx.create_storage("s1", Some(json!([1, 2]))).err().unwrap();
    assert!(matches!(err, StorageError::InvalidDefaultState { ref id } if id == "s1"));
}

#[test]
fn fresh_storage_starts_empty_and_creates_namespace() {
    let p = Participant::new("p1");
    let storage = open(&p);
    assert!(storage.state().is_empty());
    assert_eq!(p.tree.get(&["a1", STORAGE_NS, "s1"]), Some(json!({})));
    assert_eq!(storage.id(), "s1");
}

#[test]
fn default_state_written_raw_or_wrapped() {
    let p = Participant::new("p1");
    let ctx = p.open_app("a1", "/deck");
    let storage = ctx
        .create_storage("s1", Some(json!({"count": 0, "list": [1, 2]})))
        .unwrap();

    assert_eq!(storage.get("count").as_deref(), Some(&json!(0)));
    assert_eq!(tree_entry(&p, "count"), Some(json!(0)));
    let wrapped = tree_entry(&p, "list").unwrap();
    assert!(wrapped["k"].is_string());
    assert_eq!(wrapped["v"], json!([1, 2]));
}

#[test]
fn prior_state_is_adopted_not_reset() {
    let tree = Arc::new(MemoryTree::with_root(json!({
        "a1": {"_WM-STORAGE_": {"s1": {"count": 3, "doc": {"k": "r1", "v": {"title": "x"}}}}}
    })));
    let p = Participant::join(tree, "p1", true);
    let storage = p
        .context("a1")
        .create_storage("s1", Some(json!({"count": 0})))
        .unwrap();

    assert_eq!(storage.get("count").as_deref(), Some(&json!(3)));
    assert_eq!(storage.get("doc").as_deref(), Some(&json!({"title": "x"})));
    assert_eq!(tree_entry(&p, "count"), Some(json!(3)));
}

#[test]
fn malformed_key_is_skipped_during_adoption() {
    let tree = Arc::new(MemoryTree::with_root(json!({
        "a1": {"_WM-STORAGE_": {"s1": {"bad": {"k": 5, "v": 1}, "good": true}}}
    })));
    let p = Participant::join(tree, "p1", true);
    let storage = p.context("a1").create_storage("s1", None).unwrap();

    assert_eq!(storage.get("bad"), None);
    assert_eq!(storage.get("good").as_deref(), Some(&json!(true)));
}

#[test]
fn read_only_participant_writes_nothing_on_open() {
    let owner = Participant::new("p1");
    owner.open_app("a1", "/deck");
    let viewer = Participant::join(owner.tree.clone(), "p2", false);
    let storage = viewer
        .context("a1")
        .create_storage("s1", Some(json!({"count": 0})))
        .unwrap();

    assert!(storage.state().is_empty());
    assert_eq!(owner.tree.get(&["a1", STORAGE_NS]), None);
}

// --- set_state ---

#[test]
fn set_state_reads_back_before_and_after_echo() {
    let p = Participant::new("p1");
    let storage = open(&p);
    let diffs = record(&storage);

    assert!(storage.set_state([("count", val(json!(1)))]));
    assert_eq!(storage.get("count").as_deref(), Some(&json!(1)));

    p.tree.flush();
    assert_eq!(storage.get("count").as_deref(), Some(&json!(1)));
    let diffs = taken(&diffs);
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].keys().collect::<Vec<_>>(), vec!["count"]);
    assert_eq!(diffs[0]["count"].new_value.as_deref(), Some(&json!(1)));
    assert_eq!(diffs[0]["count"].old_value, None);
}

#[test]
fn wrapped_primitive_echo_keeps_value() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("count", val(json!(1)))]);
    p.tree.flush();
    let diffs = record(&storage);

    storage.reconcile(&[AttributeChange::upsert("count", json!({"k": "r1", "v": 1}))]);
    assert_eq!(storage.get("count").as_deref(), Some(&json!(1)));
    let diffs = taken(&diffs);
    assert_eq!(diffs[0].len(), 1);
}

#[test]
fn batched_writes_report_value_before_first_write() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(0)))]);
    p.tree.flush();
    let diffs = record(&storage);

    storage.set_state([("x", val(json!(1)))]);
    storage.set_state([("x", val(json!(2)))]);
    p.tree.flush();

    let diffs = taken(&diffs);
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0]["x"].old_value.as_deref(), Some(&json!(0)));
    assert_eq!(diffs[0]["x"].new_value.as_deref(), Some(&json!(2)));
}

#[test]
fn unchanged_value_is_not_written() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!("a")))]);
    p.tree.flush();

    storage.set_state([("x", val(json!("a")))]);
    assert_eq!(p.tree.pending(), 0);
}

#[test]
fn echo_preserves_structured_identity() {
    let p = Participant::new("p1");
    let storage = open(&p);
    let diffs = record(&storage);
    let doc = Arc::new(json!({"title": "plan", "tags": ["a"]}));

    storage.set_state([("doc", Some(doc.clone()))]);
    p.tree.flush();

    let held = storage.get("doc").unwrap();
    assert!(Arc::ptr_eq(&held, &doc));
    let diffs = taken(&diffs);
    assert!(Arc::ptr_eq(diffs[0]["doc"].new_value.as_ref().unwrap(), &doc));
}

#[test]
fn rewriting_same_value_reuses_reference_key() {
    let p = Participant::new("p1");
    let storage = open(&p);
    let doc = Arc::new(json!({"n": 1}));
    let other = Arc::new(json!({"n": 2}));

    storage.set_state([("doc", Some(doc.clone()))]);
    let first_key = tree_entry(&p, "doc").unwrap()["k"].clone();
    storage.set_state([("doc", Some(other))]);
    storage.set_state([("doc", Some(doc))]);
    let second_key = tree_entry(&p, "doc").unwrap()["k"].clone();

    assert_eq!(first_key, second_key);
}

#[test]
fn equal_content_new_arc_is_a_change() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("doc", val(json!({"n": 1})))]);
    p.tree.flush();
    let diffs = record(&storage);

    storage.set_state([("doc", val(json!({"n": 1})))]);
    p.tree.flush();
    assert_eq!(taken(&diffs).len(), 1);
}

#[test]
fn none_deletes_and_tombstones() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(1)))]);
    p.tree.flush();
    let diffs = record(&storage);

    storage.set_state([("x", None)]);
    assert_eq!(storage.get("x"), None);
    assert_eq!(tree_entry(&p, "x"), None);

    p.tree.flush();
    let diffs = taken(&diffs);
    assert_eq!(diffs[0]["x"].new_value, None);
    assert_eq!(diffs[0]["x"].old_value.as_deref(), Some(&json!(1)));
}

#[test]
fn set_state_without_write_access_is_noop() {
    let p = Participant::new("p1");
    let storage = open(&p);
    p.gate.set_writable(false);

    assert!(!storage.set_state([("x", val(json!(1)))]));
    assert_eq!(storage.get("x"), None);
    assert_eq!(tree_entry(&p, "x"), None);
}

#[test]
fn destroy_drops_state_listeners() {
    let p = Participant::new("p1");
    let storage = open(&p);
    let diffs = record(&storage);
    assert_eq!(storage.on_state_changed().len(), 1);

    storage.destroy();
    assert!(storage.on_state_changed().is_empty());
    p.tree.flush();
    assert!(taken(&diffs).is_empty());
}

#[test]
fn set_state_after_destroy_is_noop() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.destroy();
    assert!(storage.is_destroyed());
    assert!(!storage.set_state([("x", val(json!(1)))]));
    assert_eq!(tree_entry(&p, "x"), None);
}

// --- ensure_state ---

#[test]
fn ensure_state_never_overwrites() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(1)))]);

    storage.ensure_state([("x", val(json!(99))), ("y", val(json!(2)))]);
    assert_eq!(storage.get("x").as_deref(), Some(&json!(1)));
    assert_eq!(storage.get("y").as_deref(), Some(&json!(2)));
}

// --- Reconciliation ---

#[test]
fn remote_removal_emits_old_value_only() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(1)))]);
    p.tree.flush();
    let diffs = record(&storage);

    p.tree.update(&["a1", STORAGE_NS, "s1", "x"], None).unwrap();
    p.tree.flush();

    assert_eq!(storage.get("x"), None);
    let diffs = taken(&diffs);
    assert_eq!(diffs[0]["x"], ValueDiff { new_value: None, old_value: val(json!(1)) });
}

#[test]
fn malformed_key_does_not_stop_batch() {
    let p = Participant::new("p1");
    let storage = open(&p);
    let diffs = record(&storage);

    storage.reconcile(&[
        AttributeChange::upsert("bad", json!({"k": 1, "v": 2})),
        AttributeChange::upsert("good", json!(5)),
    ]);

    assert_eq!(storage.get("bad"), None);
    assert_eq!(storage.get("good").as_deref(), Some(&json!(5)));
    let diffs = taken(&diffs);
    assert_eq!(diffs[0].keys().collect::<Vec<_>>(), vec!["good"]);
}

#[test]
fn peers_converge_through_the_tree() {
    let alice = Participant::new("alice");
    let bob = Participant::join(alice.tree.clone(), "bob", true);
    let a = open(&alice);
    let b = bob.context("a1").create_storage("s1", None).unwrap();
    let bob_diffs = record(&b);

    a.set_state([("doc", val(json!({"title": "shared"}))), ("count", val(json!(7)))]);
    alice.tree.flush();

    assert_eq!(b.get("doc").as_deref(), Some(&json!({"title": "shared"})));
    assert_eq!(b.get("count").as_deref(), Some(&json!(7)));
    assert_eq!(taken(&bob_diffs).len(), 1);

    let held = b.get("doc").unwrap();
    a.set_state([("count", val(json!(8)))]);
    alice.tree.flush();
    assert!(Arc::ptr_eq(&held, &b.get("doc").unwrap()));
}

#[test]
fn empty_store_clears_after_echo() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(1))), ("y", val(json!(2)))]);
    p.tree.flush();
    let diffs = record(&storage);

    assert!(storage.empty_store());
    p.tree.flush();

    assert!(storage.state().is_empty());
    let diffs = taken(&diffs);
    assert_eq!(diffs[0]["x"].old_value.as_deref(), Some(&json!(1)));
    assert_eq!(diffs[0]["y"].old_value.as_deref(), Some(&json!(2)));
}

#[test]
fn delete_store_destroys_every_handle() {
    let alice = Participant::new("alice");
    let bob = Participant::join(alice.tree.clone(), "bob", true);
    let a = open(&alice);
    let b = bob.context("a1").create_storage("s1", None).unwrap();

    assert!(a.delete_store());
    assert!(a.is_destroyed());
    assert_eq!(alice.tree.get(&["a1", STORAGE_NS, "s1"]), None);

    alice.tree.flush();
    assert!(b.is_destroyed());
    assert!(!b.set_state([("x", val(json!(1)))]));
}

#[test]
fn closing_window_destroys_storage() {
    let p = Participant::new("p1");
    let storage = open(&p);
    p.delegate.clean_app_attributes("a1");
    p.tree.flush();
    assert!(storage.is_destroyed());
}

#[test]
fn dropping_last_handle_unsubscribes() {
    let p = Participant::new("p1");
    let storage = open(&p);
    storage.set_state([("x", val(json!(1)))]);
    drop(storage);

    assert_eq!(p.tree.flush(), 0);
}
