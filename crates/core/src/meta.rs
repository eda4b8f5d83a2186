//! Helpers for reading and writing `metadata` on raw JSON documents.

use serde_json::{Map, Value as Json};

pub const NAME: &str = "name";
pub const NAMESPACE: &str = "namespace";
pub const GENERATE_NAME: &str = "generateName";
pub const UID: &str = "uid";
pub const RESOURCE_VERSION: &str = "resourceVersion";
pub const GENERATION: &str = "generation";
pub const CREATION_TIMESTAMP: &str = "creationTimestamp";
pub const ANNOTATIONS: &str = "annotations";
pub const LABELS: &str = "labels";

/// Server-managed metadata fields. Callers may echo them back but never set them.
pub const SERVER_FIELDS: [&str; 5] = [UID, RESOURCE_VERSION, GENERATION, CREATION_TIMESTAMP, "managedFields"];

pub fn metadata(v: &Json) -> Option<&Map<String, Json>> {
    v.get("metadata").and_then(|m| m.as_object())
}

pub fn meta_str<'a>(v: &'a Json, field: &str) -> Option<&'a str> {
    metadata(v).and_then(|m| m.get(field)).and_then(|s| s.as_str())
}

/// Non-empty string field, treating `""` as absent.
pub fn meta_non_empty<'a>(v: &'a Json, field: &str) -> Option<&'a str> {
    meta_str(v, field).filter(|s| !s.is_empty())
}

pub fn annotation<'a>(v: &'a Json, key: &str) -> Option<&'a str> {
    metadata(v).and_then(|m| m.get(ANNOTATIONS)).and_then(|a| a.get(key)).and_then(|s| s.as_str())
}

/// Insert `field` into `metadata`, creating the object when missing.
/// Returns false when `v` is not a JSON object.
pub fn set_meta(v: &mut Json, field: &str, value: Json) -> bool {
    let Some(root) = v.as_object_mut() else { return false };
    let meta = root.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
    if !meta.is_object() { *meta = Json::Object(Map::new()); }
    match meta.as_object_mut() {
        Some(obj) => { obj.insert(field.to_string(), value); true }
        None => false,
    }
}

pub fn remove_meta(v: &mut Json, field: &str) -> Option<Json> {
    v.get_mut("metadata").and_then(|m| m.as_object_mut()).and_then(|m| m.remove(field))
}

/// Copy of `v` without server-managed metadata or `status`; used to compare caller intent.
pub fn strip_server_fields(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for f in SERVER_FIELDS { meta.remove(f); }
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}
