//! Rulestore core types: object keys, stored documents, change deltas, shard planning.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod meta;

pub use error::{ApiError, ApiResult, FieldViolation, Status, StatusCause, StatusDetails, Violations};

/// Raw 16-byte object uid (rendered as a hyphenated UUID in documents).
pub type Uid = [u8; 16];

/// Annotation key naming the folder a rule lives in. Stored verbatim.
pub const FOLDER_ANNOTATION: &str = "rulestore.io/folder";

/// A served resource kind (group/version/kind plus plural).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Key in the form `group/version/Kind` (or `version/Kind` for the core group).
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() { format!("{}/{}", self.version, self.kind) } else { format!("{}/{}/{}", self.group, self.version, self.kind) }
    }
}

/// Identity of a live object: `(kind, namespace, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A committed document as held by a store.
///
/// `raw` always carries the server-managed metadata (`uid`, `resourceVersion`,
/// `creationTimestamp`, `generation`) matching the typed fields here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub uid: Uid,
    pub resource_version: u64,
    pub raw: serde_json::Value,
}

/// A page of objects plus the store revision it was read at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectList {
    pub resource_version: u64,
    pub items: Vec<StoredObject>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Added,
    Modified,
    Deleted,
}

/// Change event emitted after a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub uid: Uid,
    pub kind: DeltaKind,
    pub key: ObjectKey,
    pub resource_version: u64,
    /// Document after the change (last committed state for `Deleted`).
    pub raw: serde_json::Value,
}

pub mod prelude {
    pub use super::{ApiError, ApiResult, Delta, DeltaKind, ObjectKey, ObjectList, ResourceKind, StoredObject, Uid, Violations};
}

// ---- sharding primitives ----

/// Shard selection key composed from logical dimensions.
///
/// - `gvk_id`: stable hash of the kind name
/// - `ns_bucket`: namespace bucket in `[0, shards)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub gvk_id: u32,
    pub ns_bucket: u16,
}

impl ShardKey {
    /// Slot in a fixed array of `shards` shards.
    pub fn slot(&self, shards: usize) -> usize {
        let n = shards.max(1);
        ((self.gvk_id as usize).wrapping_mul(31).wrapping_add(self.ns_bucket as usize)) % n
    }
}

/// Planner responsible for mapping an object into a shard key.
pub trait ShardPlanner: Send + Sync {
    fn plan(&self, kind: &str, namespace: &str) -> ShardKey;
}

/// Default planner: modulo bucketing by namespace using FNV-1a.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModuloNsPlanner { buckets: u16 }

impl ModuloNsPlanner {
    pub fn new(buckets: usize) -> Self {
        Self { buckets: buckets.clamp(1, u16::MAX as usize) as u16 }
    }

    pub fn buckets(&self) -> usize { self.buckets as usize }
}

impl ShardPlanner for ModuloNsPlanner {
    fn plan(&self, kind: &str, namespace: &str) -> ShardKey {
        let h = fnv1a(namespace.as_bytes());
        let ns_bucket = if self.buckets <= 1 { 0 } else { (h % self.buckets as u64) as u16 };
        ShardKey { gvk_id: fnv1a(kind.as_bytes()) as u32, ns_bucket }
    }
}

/// 64-bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes { h ^= *b as u64; h = h.wrapping_mul(0x100000001b3); }
    h
}
