//! In-RAM store. Objects are spread over shards by (kind, namespace); each shard
//! publishes an immutable map through `ArcSwap`, so readers never take a lock.
//! Writers serialize per shard, copy the map, and swap it in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use metrics::{counter, histogram};
use rulestore_core::{ApiError, ApiResult, Delta, DeltaKind, ModuloNsPlanner, ObjectKey, ObjectList, ShardPlanner, StoredObject};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::version;
use crate::watch::EventBus;
use crate::ResourceStore;

type Bucket = FxHashMap<ObjectKey, Arc<StoredObject>>;

struct Shard {
    snap: ArcSwap<Bucket>,
    write: Mutex<()>,
}

impl Shard {
    fn new() -> Self { Self { snap: ArcSwap::from_pointee(Bucket::default()), write: Mutex::new(()) } }

    fn lock(&self) -> ApiResult<MutexGuard<'_, ()>> {
        self.write.lock().map_err(|_| ApiError::internal("store shard lock poisoned"))
    }
}

pub struct MemoryStore {
    planner: ModuloNsPlanner,
    shards: Vec<Shard>,
    clock: AtomicU64,
    events: EventBus,
}

impl MemoryStore {
    pub fn new(shards: usize, event_capacity: usize) -> Self {
        let planner = ModuloNsPlanner::new(shards);
        let shards = (0..planner.buckets()).map(|_| Shard::new()).collect();
        Self { planner, shards, clock: AtomicU64::new(0), events: EventBus::new(event_capacity) }
    }

    pub fn shard_count(&self) -> usize { self.shards.len() }

    /// Number of live objects across every kind.
    pub fn len(&self) -> usize { self.shards.iter().map(|s| s.snap.load().len()).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn shard(&self, kind: &str, namespace: &str) -> &Shard {
        let slot = self.planner.plan(kind, namespace).slot(self.shards.len());
        &self.shards[slot]
    }

    fn next_rv(&self) -> u64 { self.clock.fetch_add(1, Ordering::SeqCst) + 1 }

    /// Swap in `next` for `key` (or remove it when `None`) and publish the change. Caller holds the shard lock.
    fn commit(&self, shard: &Shard, key: &ObjectKey, next: Option<Arc<StoredObject>>, delta: Delta) {
        let mut map: Bucket = (**shard.snap.load()).clone();
        match next {
            Some(obj) => { map.insert(key.clone(), obj); }
            None => { map.remove(key); }
        }
        shard.snap.store(Arc::new(map));
        self.events.publish(delta);
    }
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new(16, 1024) }
}

fn delta(kind: DeltaKind, obj: &StoredObject) -> Delta {
    Delta { uid: obj.uid, kind, key: obj.key.clone(), resource_version: obj.resource_version, raw: obj.raw.clone() }
}

impl ResourceStore for MemoryStore {
    fn create(&self, key: &ObjectKey, raw: Json) -> ApiResult<StoredObject> {
        let t0 = std::time::Instant::now();
        let shard = self.shard(&key.kind, &key.namespace);
        let _g = shard.lock()?;
        if shard.snap.load().contains_key(key) {
            return Err(ApiError::AlreadyExists { key: key.clone() });
        }
        let obj = Arc::new(version::stamp_created(key, raw, self.next_rv()));
        self.commit(shard, key, Some(obj.clone()), delta(DeltaKind::Added, &obj));
        counter!("store_create_total", 1u64);
        histogram!("store_write_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(key = %key, rv = obj.resource_version, "store: created");
        Ok((*obj).clone())
    }

    fn get(&self, key: &ObjectKey) -> ApiResult<StoredObject> {
        counter!("store_get_total", 1u64);
        self.shard(&key.kind, &key.namespace)
            .snap
            .load()
            .get(key)
            .map(|o| (**o).clone())
            .ok_or_else(|| ApiError::NotFound { key: key.clone() })
    }

    fn update(&self, key: &ObjectKey, expected_rv: u64, raw: Json) -> ApiResult<StoredObject> {
        let t0 = std::time::Instant::now();
        let shard = self.shard(&key.kind, &key.namespace);
        let _g = shard.lock()?;
        let prev = shard.snap.load().get(key).cloned().ok_or_else(|| ApiError::NotFound { key: key.clone() })?;
        version::check(key, expected_rv, prev.resource_version)?;
        let obj = Arc::new(version::stamp_updated(&prev, raw, self.next_rv()));
        self.commit(shard, key, Some(obj.clone()), delta(DeltaKind::Modified, &obj));
        counter!("store_update_total", 1u64);
        histogram!("store_write_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(key = %key, from = prev.resource_version, rv = obj.resource_version, "store: updated");
        Ok((*obj).clone())
    }

    fn delete(&self, key: &ObjectKey, expected_rv: Option<u64>) -> ApiResult<StoredObject> {
        let shard = self.shard(&key.kind, &key.namespace);
        let _g = shard.lock()?;
        let prev = shard.snap.load().get(key).cloned().ok_or_else(|| ApiError::NotFound { key: key.clone() })?;
        if let Some(rv) = expected_rv { version::check(key, rv, prev.resource_version)?; }
        // Deletion consumes a revision so watchers and lists can order it.
        let mut d = delta(DeltaKind::Deleted, &prev);
        d.resource_version = self.next_rv();
        self.commit(shard, key, None, d);
        counter!("store_delete_total", 1u64);
        debug!(key = %key, "store: deleted");
        Ok((*prev).clone())
    }

    fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList> {
        let resource_version = self.clock.load(Ordering::SeqCst);
        let mut items: Vec<StoredObject> = Vec::new();
        let mut scan = |shard: &Shard| {
            for (k, o) in shard.snap.load().iter() {
                if k.kind == kind && namespace.map_or(true, |ns| k.namespace == ns) {
                    items.push((**o).clone());
                }
            }
        };
        match namespace {
            Some(ns) => scan(self.shard(kind, ns)),
            None => self.shards.iter().for_each(&mut scan),
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        counter!("store_list_total", 1u64);
        Ok(ObjectList { resource_version, items })
    }

    fn revision(&self) -> ApiResult<u64> { Ok(self.clock.load(Ordering::SeqCst)) }

    fn subscribe(&self) -> broadcast::Receiver<Delta> { self.events.subscribe() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> ObjectKey { ObjectKey::new("RecordingRule", "default", name) }

    #[test]
    fn create_get_update_delete() {
        let s = MemoryStore::new(4, 16);
        let a = s.create(&key("a"), json!({ "spec": { "title": "T1" } })).unwrap();
        assert_eq!(a.resource_version, 1);
        assert_eq!(s.get(&key("a")).unwrap(), a);
        assert!(s.create(&key("a"), json!({})).unwrap_err().is_already_exists());

        let b = s.update(&key("a"), 1, json!({ "spec": { "title": "T2" } })).unwrap();
        assert!(b.resource_version > a.resource_version);
        assert_eq!(b.uid, a.uid);
        assert!(s.update(&key("a"), 1, json!({})).unwrap_err().is_conflict());
        assert_eq!(s.get(&key("a")).unwrap().raw["spec"]["title"], "T2");

        assert!(s.delete(&key("a"), Some(1)).unwrap_err().is_conflict());
        s.delete(&key("a"), Some(b.resource_version)).unwrap();
        assert!(s.get(&key("a")).unwrap_err().is_not_found());
        assert!(s.delete(&key("a"), None).unwrap_err().is_not_found());
        assert!(s.update(&key("a"), b.resource_version, json!({})).unwrap_err().is_not_found());
    }

    #[test]
    fn recreated_name_gets_fresh_uid() {
        let s = MemoryStore::default();
        let first = s.create(&key("x"), json!({})).unwrap();
        s.delete(&key("x"), None).unwrap();
        let second = s.create(&key("x"), json!({})).unwrap();
        assert_ne!(first.uid, second.uid);
        assert!(second.resource_version > first.resource_version);
    }

    #[test]
    fn list_filters_and_sorts() {
        let s = MemoryStore::new(8, 16);
        for (ns, name) in [("b", "z"), ("a", "y"), ("a", "x")] {
            s.create(&ObjectKey::new("Folder", ns, name), json!({})).unwrap();
        }
        s.create(&ObjectKey::new("AlertRule", "a", "r"), json!({})).unwrap();
        let all = s.list("Folder", None).unwrap();
        let names: Vec<_> = all.items.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(names, vec!["Folder/a/x", "Folder/a/y", "Folder/b/z"]);
        assert_eq!(all.resource_version, 4);
        assert_eq!(s.list("Folder", Some("a")).unwrap().items.len(), 2);
        assert_eq!(s.len(), 4);
    }
}
