//! Dispatcher: the single entry point sequencing allocator, validation gate,
//! patch engine and compare-and-set store writes for every kind.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use metrics::{counter, histogram};
use rulestore_apply::{apply_patch, diff_summary, Patch};
use rulestore_core::{meta, ApiError, ApiResult, ObjectKey, ObjectList, StoredObject};
use rulestore_persist::SqliteStore;
use rulestore_schema::{validate_object, Folder, Kind, KindDescriptor, KindRegistry, ValidationContext};
use rulestore_store::{version, MemoryStore, ResourceStore, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::info;

use crate::naming::{self, Identity};
use crate::Config;

/// Preconditions for a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// When set, the delete only happens if the object is still at this version.
    pub resource_version: Option<String>,
}

impl DeleteOptions {
    pub fn at(resource_version: impl Into<String>) -> Self { Self { resource_version: Some(resource_version.into()) } }
}

pub struct Dispatcher {
    store: Arc<dyn ResourceStore>,
    registry: Arc<KindRegistry>,
    cfg: Config,
}

fn observe<T>(op: &'static str, key: &ObjectKey, t0: Instant, res: ApiResult<T>) -> ApiResult<T> {
    let took = t0.elapsed();
    histogram!("dispatch_latency_ms", took.as_secs_f64() * 1000.0, "op" => op);
    match &res {
        Ok(_) => {
            counter!("dispatch_total", 1u64, "op" => op);
            info!(op, key = %key, took_ms = %took.as_millis(), "api: ok");
        }
        Err(e) => {
            counter!("dispatch_errors_total", 1u64, "op" => op, "reason" => e.reason());
            info!(op, key = %key, reason = e.reason(), error = %e, took_ms = %took.as_millis(), "api: failed");
        }
    }
    res
}

/// Default `apiVersion` and `kind` from the descriptor's zero object.
fn fill_envelope(desc: &KindDescriptor, doc: &mut Json) {
    let zero = desc.zero_object();
    if let Some(root) = doc.as_object_mut() {
        for f in ["apiVersion", "kind"] {
            root.entry(f).or_insert_with(|| zero[f].clone());
        }
    }
}

fn immutable(kind: &str, name: &str, field: &str) -> ApiError {
    ApiError::invalid(kind, name, field, "field is immutable")
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ResourceStore>, cfg: Config) -> Self {
        Self::with_registry(store, Arc::new(KindRegistry::builtin()), cfg)
    }

    pub fn with_registry(store: Arc<dyn ResourceStore>, registry: Arc<KindRegistry>, cfg: Config) -> Self {
        info!(shards = cfg.shards, check_folders = cfg.check_folders, kinds = registry.kinds().len(), "api: dispatcher ready");
        Self { store, registry, cfg }
    }

    /// Dispatcher over a fresh in-memory store.
    pub fn in_memory(cfg: Config) -> Self {
        let store = Arc::new(MemoryStore::new(cfg.shards, cfg.event_capacity));
        Self::new(store, cfg)
    }

    /// Dispatcher over the SQLite store at `cfg.db_path` (or the default path).
    pub fn sqlite(cfg: Config) -> anyhow::Result<Self> {
        let store = match cfg.db_path.as_deref() {
            Some(p) => SqliteStore::open(p),
            None => SqliteStore::open_default(),
        }
        .context("opening sqlite store")?
        .with_history_depth(cfg.history_depth)
        .with_event_capacity(cfg.event_capacity);
        Ok(Self::new(Arc::new(store), cfg))
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> { &self.store }
    pub fn registry(&self) -> &KindRegistry { &self.registry }
    pub fn config(&self) -> &Config { &self.cfg }

    /// Run the validation gate with this dispatcher's limits and folder lookup.
    fn admit(&self, desc: &KindDescriptor, namespace: &str, doc: &Json) -> ApiResult<()> {
        let folder_kind = Folder::descriptor().kind.kind;
        let lookup = |folder: &str| match self.store.get(&ObjectKey::new(folder_kind.as_str(), namespace, folder)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        };
        let mut ctx = ValidationContext::new(namespace);
        ctx.base_interval = self.cfg.base_interval();
        ctx.limits = self.cfg.limits();
        if self.cfg.check_folders { ctx.folder_exists = Some(&lookup as &dyn Fn(&str) -> ApiResult<bool>); }
        validate_object(desc, doc, &ctx)
    }

    pub fn create(&self, kind: &str, namespace: &str, doc: Json) -> ApiResult<StoredObject> {
        let t0 = Instant::now();
        let requested = ObjectKey::new(kind, namespace, meta::meta_str(&doc, meta::NAME).unwrap_or(""));
        let res = self.create_inner(kind, namespace, doc);
        let key = res.as_ref().map(|o| o.key.clone()).unwrap_or(requested);
        observe("create", &key, t0, res)
    }

    fn create_inner(&self, kind: &str, namespace: &str, mut doc: Json) -> ApiResult<StoredObject> {
        let desc = self.registry.resolve(kind)?;
        let identity = Identity::of(&doc);
        let shown = match &identity { Identity::Explicit(n) => n.as_str(), Identity::Generated { .. } => "" };
        if !doc.is_object() {
            return Err(ApiError::invalid(kind, shown, "", "object body must be a JSON object"));
        }
        if version::expected_rv(&doc, kind, shown)?.is_some() {
            return Err(ApiError::invalid(kind, shown, "metadata.resourceVersion", "must not be set on create"));
        }
        fill_envelope(desc, &mut doc);
        self.admit(desc, namespace, &doc)?;
        let doc = meta::strip_server_fields(doc);
        naming::allocate(&identity, self.cfg.name_retries, kind, |name| {
            self.store.create(&ObjectKey::new(kind, namespace, name), doc.clone())
        })
    }

    pub fn get(&self, kind: &str, namespace: &str, name: &str) -> ApiResult<StoredObject> {
        let t0 = Instant::now();
        let key = ObjectKey::new(kind, namespace, name);
        let res = self.registry.resolve(kind).and_then(|_| self.store.get(&key));
        observe("get", &key, t0, res)
    }

    /// Full replacement. `doc` must carry the `metadata.resourceVersion` the caller last read.
    pub fn update(&self, kind: &str, namespace: &str, name: &str, doc: Json) -> ApiResult<StoredObject> {
        let t0 = Instant::now();
        let key = ObjectKey::new(kind, namespace, name);
        let res = self.update_inner(&key, doc);
        observe("update", &key, t0, res)
    }

    fn update_inner(&self, key: &ObjectKey, mut doc: Json) -> ApiResult<StoredObject> {
        let desc = self.registry.resolve(&key.kind)?;
        if let Some(n) = meta::meta_non_empty(&doc, meta::NAME) {
            if n != key.name { return Err(immutable(&key.kind, &key.name, "metadata.name")); }
        }
        let expected = version::expected_rv(&doc, &key.kind, &key.name)?
            .ok_or_else(|| ApiError::invalid(&key.kind, &key.name, "metadata.resourceVersion", "required for update"))?;
        let current = self.store.get(key)?;
        if let Some(uid) = meta::meta_non_empty(&doc, meta::UID) {
            if uid != version::uid_string(&current.uid) { return Err(immutable(&key.kind, &key.name, "metadata.uid")); }
        }
        fill_envelope(desc, &mut doc);
        self.admit(desc, &key.namespace, &doc)?;
        let summary = diff_summary(&meta::strip_server_fields(doc.clone()), &meta::strip_server_fields(current.raw.clone()));
        info!(key = %key, from = expected, adds = summary.adds, updates = summary.updates, removes = summary.removes, "api: update diff");
        self.store.update(key, expected, doc)
    }

    /// Read, patch, validate and compare-and-set. The precondition is the `resourceVersion`
    /// the patch itself sets, or else the version read at the start.
    pub fn patch(&self, kind: &str, namespace: &str, name: &str, patch: &Patch) -> ApiResult<StoredObject> {
        let t0 = Instant::now();
        let key = ObjectKey::new(kind, namespace, name);
        let res = self.patch_inner(&key, patch);
        observe("patch", &key, t0, res)
    }

    fn patch_inner(&self, key: &ObjectKey, patch: &Patch) -> ApiResult<StoredObject> {
        let desc = self.registry.resolve(&key.kind)?;
        let current = self.store.get(key)?;
        let applied = apply_patch(&current.raw, patch, self.cfg.max_patch_ops)?;
        let doc = applied.doc;

        if meta::meta_str(&doc, meta::NAME) != Some(key.name.as_str()) {
            return Err(immutable(&key.kind, &key.name, "metadata.name"));
        }
        if meta::meta_str(&doc, meta::UID) != Some(version::uid_string(&current.uid).as_str()) {
            return Err(immutable(&key.kind, &key.name, "metadata.uid"));
        }
        let expected = match meta::meta_str(&doc, meta::RESOURCE_VERSION) {
            Some(rv) if rv != meta::meta_str(&current.raw, meta::RESOURCE_VERSION).unwrap_or("") => {
                version::expected_rv(&doc, &key.kind, &key.name)?.unwrap_or(current.resource_version)
            }
            _ => current.resource_version,
        };
        self.admit(desc, &key.namespace, &doc)?;
        let s = &applied.summary;
        info!(key = %key, ops = patch.len(), from = expected, adds = s.adds, updates = s.updates, removes = s.removes, "api: patch diff");
        self.store.update(key, expected, doc)
    }

    /// Remove an object. Returns its last committed state.
    pub fn delete(&self, kind: &str, namespace: &str, name: &str, opts: &DeleteOptions) -> ApiResult<StoredObject> {
        let t0 = Instant::now();
        let key = ObjectKey::new(kind, namespace, name);
        let res = self.registry.resolve(kind).and_then(|_| {
            let expected = match opts.resource_version.as_deref() {
                None | Some("") => None,
                Some(rv) => Some(version::parse_rv(rv).ok_or_else(|| {
                    ApiError::invalid(kind, name, "preconditions.resourceVersion", format!("malformed resource version {:?}", rv))
                })?),
            };
            self.store.delete(&key, expected)
        });
        observe("delete", &key, t0, res)
    }

    pub fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList> {
        let t0 = Instant::now();
        self.registry.resolve(kind)?;
        let out = self.store.list(kind, namespace)?;
        info!(kind, ns = %namespace.unwrap_or("(all)"), items = out.items.len(), rv = out.resource_version, took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(out)
    }

    pub fn watch(&self, kind: &str, namespace: Option<&str>) -> ApiResult<Watcher> {
        self.registry.resolve(kind)?;
        info!(kind, ns = %namespace.unwrap_or("(all)"), "api: watch start");
        Ok(self.store.watch(kind, namespace))
    }
}
