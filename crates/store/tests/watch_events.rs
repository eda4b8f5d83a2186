use rulestore_core::{DeltaKind, ObjectKey};
use rulestore_store::{MemoryStore, ResourceStore};
use serde_json::json;

#[tokio::test]
async fn watcher_sees_lifecycle_in_order() {
    let store = MemoryStore::new(4, 64);
    let mut w = store.watch("RecordingRule", Some("default"));
    let key = ObjectKey::new("RecordingRule", "default", "r1");

    let created = store.create(&key, json!({ "spec": { "title": "T1" } })).unwrap();
    store.create(&ObjectKey::new("RecordingRule", "other", "r1"), json!({})).unwrap();
    store.create(&ObjectKey::new("Folder", "default", "f"), json!({})).unwrap();
    let updated = store.update(&key, created.resource_version, json!({ "spec": { "title": "T2" } })).unwrap();
    store.delete(&key, None).unwrap();

    let added = w.next().await.unwrap();
    assert_eq!(added.kind, DeltaKind::Added);
    assert_eq!(added.resource_version, created.resource_version);

    let modified = w.next().await.unwrap();
    assert_eq!(modified.kind, DeltaKind::Modified);
    assert_eq!(modified.raw["spec"]["title"], "T2");
    assert_eq!(modified.uid, created.uid);

    let deleted = w.next().await.unwrap();
    assert_eq!(deleted.kind, DeltaKind::Deleted);
    assert!(deleted.resource_version > updated.resource_version);
    assert!(w.try_next().is_none());
}

#[test]
fn slow_watcher_skips_lagged_events() {
    let store = MemoryStore::new(1, 2);
    let mut w = store.watch("Folder", None);
    for i in 0..5 {
        store.create(&ObjectKey::new("Folder", "default", format!("f{}", i)), json!({})).unwrap();
    }
    let first = w.try_next().unwrap();
    assert_eq!(first.key.name, "f3");
    assert_eq!(w.skipped(), 3);
    assert_eq!(w.try_next().unwrap().key.name, "f4");
    assert!(w.try_next().is_none());
}
