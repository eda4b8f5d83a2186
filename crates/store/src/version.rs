//! Version controller: resource version tokens, compare-and-set checks and server-managed metadata stamping.

use rulestore_core::{meta, ApiError, ApiResult, ObjectKey, StoredObject, Uid};
use serde_json::Value as Json;

/// Render a revision as the opaque `metadata.resourceVersion` token.
pub fn format_rv(rv: u64) -> String { rv.to_string() }

/// Parse a `resourceVersion` token. Only canonical decimal strings produced by [`format_rv`] are accepted.
pub fn parse_rv(s: &str) -> Option<u64> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) { return None; }
    s.parse().ok()
}

/// The caller's `metadata.resourceVersion`, if any. A present but malformed token is Invalid.
pub fn expected_rv(doc: &Json, kind: &str, name: &str) -> ApiResult<Option<u64>> {
    match meta::metadata(doc).and_then(|m| m.get(meta::RESOURCE_VERSION)) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if s.is_empty() => Ok(None),
        Some(Json::String(s)) => parse_rv(s)
            .map(Some)
            .ok_or_else(|| ApiError::invalid(kind, name, "metadata.resourceVersion", format!("malformed resource version {:?}", s))),
        Some(_) => Err(ApiError::invalid(kind, name, "metadata.resourceVersion", "must be a string")),
    }
}

/// Compare-and-set precondition: the caller's version must equal the stored one.
pub fn check(key: &ObjectKey, expected: u64, current: u64) -> ApiResult<()> {
    if expected != current {
        metrics::counter!("store_conflict_total", 1u64);
        return Err(ApiError::conflict(key, &format_rv(expected), &format_rv(current)));
    }
    Ok(())
}

pub fn new_uid() -> Uid { *uuid::Uuid::new_v4().as_bytes() }

pub fn uid_string(uid: &Uid) -> String { uuid::Uuid::from_bytes(*uid).hyphenated().to_string() }

pub fn parse_uid(s: &str) -> Option<Uid> { uuid::Uuid::parse_str(s).ok().map(|u| *u.as_bytes()) }

/// Identity fields shared by every stamped document.
fn stamp_key(raw: &mut Json, key: &ObjectKey) {
    meta::set_meta(raw, meta::NAME, Json::String(key.name.clone()));
    meta::set_meta(raw, meta::NAMESPACE, Json::String(key.namespace.clone()));
    meta::remove_meta(raw, meta::GENERATE_NAME);
}

/// Build the first committed revision of a new object.
pub fn stamp_created(key: &ObjectKey, mut raw: Json, rv: u64) -> StoredObject {
    let uid = new_uid();
    stamp_key(&mut raw, key);
    meta::remove_meta(&mut raw, "managedFields");
    meta::set_meta(&mut raw, meta::UID, Json::String(uid_string(&uid)));
    meta::set_meta(&mut raw, meta::RESOURCE_VERSION, Json::String(format_rv(rv)));
    meta::set_meta(&mut raw, meta::GENERATION, Json::from(1u64));
    meta::set_meta(&mut raw, meta::CREATION_TIMESTAMP, Json::String(now_rfc3339()));
    StoredObject { key: key.clone(), uid, resource_version: rv, raw }
}

/// Build the successor of `prev`. Identity and creation time carry over; generation moves only with `spec`.
pub fn stamp_updated(prev: &StoredObject, mut raw: Json, rv: u64) -> StoredObject {
    stamp_key(&mut raw, &prev.key);
    meta::remove_meta(&mut raw, "managedFields");
    let prev_gen = meta::metadata(&prev.raw).and_then(|m| m.get(meta::GENERATION)).and_then(|g| g.as_u64()).unwrap_or(1);
    let generation = if raw.get("spec") != prev.raw.get("spec") { prev_gen + 1 } else { prev_gen };
    let created = meta::meta_str(&prev.raw, meta::CREATION_TIMESTAMP).map(str::to_string).unwrap_or_else(now_rfc3339);
    meta::set_meta(&mut raw, meta::UID, Json::String(uid_string(&prev.uid)));
    meta::set_meta(&mut raw, meta::RESOURCE_VERSION, Json::String(format_rv(rv)));
    meta::set_meta(&mut raw, meta::GENERATION, Json::from(generation));
    meta::set_meta(&mut raw, meta::CREATION_TIMESTAMP, Json::String(created));
    StoredObject { key: prev.key.clone(), uid: prev.uid, resource_version: rv, raw }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rv_tokens() {
        assert_eq!(parse_rv(&format_rv(42)), Some(42));
        assert_eq!(parse_rv("007"), None);
        assert_eq!(parse_rv("abc"), None);
        assert_eq!(parse_rv(""), None);
        let doc = json!({ "metadata": { "resourceVersion": "5" } });
        assert_eq!(expected_rv(&doc, "Folder", "f").unwrap(), Some(5));
        assert_eq!(expected_rv(&json!({ "metadata": {} }), "Folder", "f").unwrap(), None);
        assert!(expected_rv(&json!({ "metadata": { "resourceVersion": 5 } }), "Folder", "f").unwrap_err().is_invalid());
    }

    #[test]
    fn conflict_on_mismatch() {
        let key = ObjectKey::new("RecordingRule", "default", "r");
        assert!(check(&key, 3, 3).is_ok());
        let err = check(&key, 2, 3).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("2 -> 3"));
    }

    #[test]
    fn stamping_preserves_identity_and_tracks_generation() {
        let key = ObjectKey::new("RecordingRule", "default", "r");
        let created = stamp_created(&key, json!({ "metadata": { "generateName": "r-" }, "spec": { "title": "T1" } }), 1);
        assert_eq!(created.raw["metadata"]["name"], "r");
        assert_eq!(created.raw["metadata"]["generation"], 1);
        assert!(created.raw["metadata"].get("generateName").is_none());
        assert_eq!(parse_uid(created.raw["metadata"]["uid"].as_str().unwrap()), Some(created.uid));

        let same_spec = stamp_updated(&created, json!({ "metadata": { "labels": { "a": "b" } }, "spec": { "title": "T1" } }), 2);
        assert_eq!(same_spec.uid, created.uid);
        assert_eq!(same_spec.raw["metadata"]["generation"], 1);
        assert_eq!(same_spec.raw["metadata"]["resourceVersion"], "2");
        assert_eq!(same_spec.raw["metadata"]["creationTimestamp"], created.raw["metadata"]["creationTimestamp"]);

        let new_spec = stamp_updated(&same_spec, json!({ "spec": { "title": "T2" } }), 3);
        assert_eq!(new_spec.raw["metadata"]["generation"], 2);
        assert_eq!(new_spec.raw["metadata"]["uid"], created.raw["metadata"]["uid"]);
    }
}
