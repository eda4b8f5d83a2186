use std::sync::{Arc, Barrier};

use rulestore_core::ObjectKey;
use rulestore_store::{MemoryStore, ResourceStore};
use serde_json::json;

#[test]
fn only_one_writer_wins_per_version() {
    let store = Arc::new(MemoryStore::new(4, 64));
    let key = ObjectKey::new("AlertRule", "default", "contended");
    let base = store.create(&key, json!({ "spec": { "title": "base" } })).unwrap();

    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            let rv = base.resource_version;
            std::thread::spawn(move || {
                barrier.wait();
                store.update(&key, rv, json!({ "spec": { "title": format!("writer-{}", i) } }))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| r.as_ref().unwrap_err().is_conflict()));

    let live = store.get(&key).unwrap();
    assert_eq!(&live, winners[0]);
    assert_eq!(live.uid, base.uid);
}

#[test]
fn concurrent_creates_of_distinct_keys_all_commit() {
    let store = Arc::new(MemoryStore::new(8, 64));
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let ns = if i % 2 == 0 { "team-a" } else { "team-b" };
                store.create(&ObjectKey::new("RecordingRule", ns, format!("r{}", i)), json!({})).unwrap().resource_version
            })
        })
        .collect();
    let mut rvs: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    rvs.sort_unstable();
    rvs.dedup();
    assert_eq!(rvs.len(), 16);
    assert_eq!(store.list("RecordingRule", None).unwrap().items.len(), 16);
    assert_eq!(store.list("RecordingRule", Some("team-a")).unwrap().items.len(), 8);
}
