//! Rulestore store: the `ResourceStore` contract and its sharded in-RAM implementation.

#![forbid(unsafe_code)]

pub mod memory;
pub mod version;
pub mod watch;

use rulestore_core::{ApiResult, Delta, ObjectKey, ObjectList, StoredObject};
use serde_json::Value as Json;
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use watch::{EventBus, Watcher};

/// Keyed document storage with compare-and-set writes.
///
/// Implementations stamp server-managed metadata (see [`version`]) and publish a
/// [`Delta`] for every commit. Each write is a single atomic step per key: a caller
/// never observes a half-applied write, and two writers holding the same
/// `expected_rv` cannot both succeed.
pub trait ResourceStore: Send + Sync {
    /// Insert a new object. Fails with `AlreadyExists` when the key is live.
    fn create(&self, key: &ObjectKey, raw: Json) -> ApiResult<StoredObject>;

    fn get(&self, key: &ObjectKey) -> ApiResult<StoredObject>;

    /// Replace the object if its current version equals `expected_rv`, otherwise `Conflict`.
    fn update(&self, key: &ObjectKey, expected_rv: u64, raw: Json) -> ApiResult<StoredObject>;

    /// Remove the object, optionally guarded by `expected_rv`. Returns the last committed state.
    fn delete(&self, key: &ObjectKey, expected_rv: Option<u64>) -> ApiResult<StoredObject>;

    /// Objects of `kind` (optionally within one namespace) sorted by key, with the revision they were read at.
    fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList>;

    /// Latest revision handed out by this store.
    fn revision(&self) -> ApiResult<u64>;

    fn subscribe(&self) -> broadcast::Receiver<Delta>;

    fn watch(&self, kind: &str, namespace: Option<&str>) -> Watcher {
        Watcher::new(self.subscribe(), kind, namespace)
    }
}
