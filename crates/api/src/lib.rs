//! Rulestore public API façade (in-process).
//!
//! [`Dispatcher`] is the synchronous core; [`ResourceApi`] is the async surface
//! frontends depend on, and [`ResourceClient`] a typed per-kind view over it.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod naming;
pub mod telemetry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rulestore_core::{ApiError, ApiResult, Delta, ObjectList, ResourceKind, StoredObject};
use serde_json::Value as Json;
use tracing::info;

pub use client::ResourceClient;
pub use config::Config;
pub use dispatch::{DeleteOptions, Dispatcher};
pub use rulestore_apply::{ops, Patch, PatchOp, PatchType};
pub use rulestore_core::{Status, ObjectKey};
pub use rulestore_schema::{AlertRule, Folder, Kind, RecordingRule};

/// Uniform per-kind operations over raw documents.
#[async_trait::async_trait]
pub trait ResourceApi: Send + Sync {
    /// Kinds this API serves.
    async fn kinds(&self) -> ApiResult<Vec<ResourceKind>>;

    /// Create `doc`; the name comes from `metadata.name` or is generated.
    async fn create(&self, kind: &str, namespace: &str, doc: Json) -> ApiResult<StoredObject>;

    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ApiResult<StoredObject>;

    /// Replace the object; `doc` carries the `resourceVersion` last observed.
    async fn update(&self, kind: &str, namespace: &str, name: &str, doc: Json) -> ApiResult<StoredObject>;

    async fn patch(&self, kind: &str, namespace: &str, name: &str, patch: Patch) -> ApiResult<StoredObject>;

    async fn delete(&self, kind: &str, namespace: &str, name: &str, opts: DeleteOptions) -> ApiResult<StoredObject>;

    async fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList>;

    /// Stream change events for a kind + optional namespace.
    async fn watch(&self, kind: &str, namespace: Option<&str>) -> ApiResult<StreamHandle<Delta>>;
}

// ----------------- In-process implementation -----------------

/// In-process implementation: runs the dispatcher on the blocking pool under a deadline.
///
/// A deadline that expires after the store committed does not undo the commit;
/// the caller sees `Timeout` and should re-read.
#[derive(Clone)]
pub struct InProcApi {
    dispatcher: Arc<Dispatcher>,
    timeout: Duration,
}

impl InProcApi {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let timeout = dispatcher.config().op_timeout();
        Self { dispatcher, timeout }
    }

    /// In-memory backend configured from the environment.
    pub fn from_env() -> Self { Self::new(Arc::new(Dispatcher::in_memory(Config::from_env()))) }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> { &self.dispatcher }

    async fn run<T, F>(&self, op: &'static str, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Dispatcher) -> ApiResult<T> + Send + 'static,
    {
        let d = Arc::clone(&self.dispatcher);
        let task = tokio::task::spawn_blocking(move || f(&d));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(ApiError::internal(e)),
            Err(_) => {
                metrics::counter!("dispatch_timeouts_total", 1u64, "op" => op);
                Err(ApiError::Timeout(format!("{} exceeded {}ms", op, self.timeout.as_millis())))
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceApi for InProcApi {
    async fn kinds(&self) -> ApiResult<Vec<ResourceKind>> {
        let t0 = Instant::now();
        let kinds = self.dispatcher.registry().kinds();
        info!(count = kinds.len(), took_ms = %t0.elapsed().as_millis(), "api: kinds ok");
        Ok(kinds)
    }

    async fn create(&self, kind: &str, namespace: &str, doc: Json) -> ApiResult<StoredObject> {
        let (kind, ns) = (kind.to_string(), namespace.to_string());
        self.run("create", move |d| d.create(&kind, &ns, doc)).await
    }

    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ApiResult<StoredObject> {
        let (kind, ns, name) = (kind.to_string(), namespace.to_string(), name.to_string());
        self.run("get", move |d| d.get(&kind, &ns, &name)).await
    }

    async fn update(&self, kind: &str, namespace: &str, name: &str, doc: Json) -> ApiResult<StoredObject> {
        let (kind, ns, name) = (kind.to_string(), namespace.to_string(), name.to_string());
        self.run("update", move |d| d.update(&kind, &ns, &name, doc)).await
    }

    async fn patch(&self, kind: &str, namespace: &str, name: &str, patch: Patch) -> ApiResult<StoredObject> {
        let (kind, ns, name) = (kind.to_string(), namespace.to_string(), name.to_string());
        self.run("patch", move |d| d.patch(&kind, &ns, &name, &patch)).await
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str, opts: DeleteOptions) -> ApiResult<StoredObject> {
        let (kind, ns, name) = (kind.to_string(), namespace.to_string(), name.to_string());
        self.run("delete", move |d| d.delete(&kind, &ns, &name, &opts)).await
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList> {
        let (kind, ns) = (kind.to_string(), namespace.map(str::to_string));
        self.run("list", move |d| d.list(&kind, ns.as_deref())).await
    }

    async fn watch(&self, kind: &str, namespace: Option<&str>) -> ApiResult<StreamHandle<Delta>> {
        use tokio::sync::mpsc;
        let mut watcher = self.dispatcher.watch(kind, namespace)?;
        let cap = self.dispatcher.config().event_capacity;
        let (tx, rx) = mpsc::channel::<Delta>(cap);
        let handle = tokio::spawn(async move {
            info!("api: watcher task starting");
            while let Some(d) = watcher.next().await {
                if tx.send(d).await.is_err() { break; }
            }
            info!(skipped = watcher.skipped(), "api: watcher task ended");
        });
        Ok(StreamHandle { rx, cancel: CancelHandle { task: Some(handle) } })
    }
}

// ----------------- Streaming primitives -----------------

/// Cancellation handle that aborts the underlying task.
pub struct CancelHandle { task: Option<tokio::task::JoinHandle<()>> }

impl CancelHandle { pub fn cancel(mut self) { if let Some(h) = self.task.take() { h.abort(); } } }

/// Generic stream handle used by API streaming endpoints.
pub struct StreamHandle<T> { pub rx: tokio::sync::mpsc::Receiver<T>, pub cancel: CancelHandle }
