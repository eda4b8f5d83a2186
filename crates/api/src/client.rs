//! Typed client: one namespace, one kind, values in and out as the custom resource type.

use std::marker::PhantomData;
use std::sync::Arc;

use kube::Resource;
use rulestore_core::{ApiError, ApiResult, StoredObject};
use rulestore_schema::Kind;
use serde_json::Value as Json;

use crate::{DeleteOptions, Patch, ResourceApi, StreamHandle};

pub struct ResourceClient<K: Kind> {
    api: Arc<dyn ResourceApi>,
    namespace: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Kind> Clone for ResourceClient<K> {
    fn clone(&self) -> Self {
        Self { api: Arc::clone(&self.api), namespace: self.namespace.clone(), _kind: PhantomData }
    }
}

fn encode<K: Kind>(obj: &K) -> ApiResult<Json> {
    serde_json::to_value(obj).map_err(|e| ApiError::internal(format!("encoding {}: {}", K::kind(&()), e)))
}

fn decode<K: Kind>(obj: StoredObject) -> ApiResult<K> {
    let key = obj.key;
    serde_json::from_value(obj.raw).map_err(|e| ApiError::internal(format!("decoding {}: {}", key, e)))
}

impl<K: Kind> ResourceClient<K> {
    pub fn new(api: Arc<dyn ResourceApi>, namespace: impl Into<String>) -> Self {
        Self { api, namespace: namespace.into(), _kind: PhantomData }
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    fn kind() -> String { K::kind(&()).to_string() }

    /// Create `obj`. Leave `metadata.name` unset (or empty) to have one generated.
    pub async fn create(&self, obj: &K) -> ApiResult<K> {
        decode(self.api.create(&Self::kind(), &self.namespace, encode(obj)?).await?)
    }

    pub async fn get(&self, name: &str) -> ApiResult<K> {
        decode(self.api.get(&Self::kind(), &self.namespace, name).await?)
    }

    /// Replace the stored object with `obj`, guarded by `obj.metadata.resourceVersion`.
    pub async fn update(&self, obj: &K) -> ApiResult<K> {
        let kind = Self::kind();
        let name = obj.meta().name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(ApiError::invalid(&kind, "", "metadata.name", "required for update"));
        }
        decode(self.api.update(&kind, &self.namespace, &name, encode(obj)?).await?)
    }

    pub async fn patch(&self, name: &str, patch: Patch) -> ApiResult<K> {
        decode(self.api.patch(&Self::kind(), &self.namespace, name, patch).await?)
    }

    /// Delete `name`. Returns the last committed state.
    pub async fn delete(&self, name: &str, opts: DeleteOptions) -> ApiResult<K> {
        decode(self.api.delete(&Self::kind(), &self.namespace, name, opts).await?)
    }

    /// Objects in this namespace, sorted by name.
    pub async fn list(&self) -> ApiResult<Vec<K>> {
        let out = self.api.list(&Self::kind(), Some(&self.namespace)).await?;
        out.items.into_iter().map(decode::<K>).collect()
    }

    pub async fn watch(&self) -> ApiResult<StreamHandle<rulestore_core::Delta>> {
        self.api.watch(&Self::kind(), Some(&self.namespace)).await
    }
}
