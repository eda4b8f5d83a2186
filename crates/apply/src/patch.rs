//! Patch interpreter over `json-patch`. Operations run against a private copy of the
//! document; the caller only ever sees the fully patched result or an error.

use rulestore_core::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One JSON Patch (RFC 6902) operation.
pub type PatchOp = json_patch::PatchOperation;

/// Constructors for the operations callers build by hand.
pub mod ops {
    use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation, TestOperation};
    use serde_json::Value as Json;

    pub fn add(path: impl Into<String>, value: Json) -> PatchOperation { PatchOperation::Add(AddOperation { path: path.into(), value }) }
    pub fn remove(path: impl Into<String>) -> PatchOperation { PatchOperation::Remove(RemoveOperation { path: path.into() }) }
    pub fn replace(path: impl Into<String>, value: Json) -> PatchOperation { PatchOperation::Replace(ReplaceOperation { path: path.into(), value }) }
    pub fn test(path: impl Into<String>, value: Json) -> PatchOperation { PatchOperation::Test(TestOperation { path: path.into(), value }) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    /// RFC 6902 operation list.
    Json,
    /// RFC 7386 merge document.
    Merge,
}

impl PatchType {
    pub fn content_type(&self) -> &'static str {
        match self {
            PatchType::Json => "application/json-patch+json",
            PatchType::Merge => "application/merge-patch+json",
        }
    }

    pub fn from_content_type(ct: &str) -> Option<Self> {
        match ct.split(';').next().map(str::trim) {
            Some("application/json-patch+json") => Some(PatchType::Json),
            Some("application/merge-patch+json") => Some(PatchType::Merge),
            _ => None,
        }
    }
}

/// A decoded patch request.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Json(Vec<PatchOp>),
    Merge(Json),
}

fn failed(index: usize, message: impl Into<String>) -> ApiError {
    ApiError::PatchFailed { index, message: message.into() }
}

fn op_paths(op: &PatchOp) -> (&str, Option<&str>) {
    match op {
        PatchOp::Add(o) => (o.path.as_str(), None),
        PatchOp::Remove(o) => (o.path.as_str(), None),
        PatchOp::Replace(o) => (o.path.as_str(), None),
        PatchOp::Move(o) => (o.path.as_str(), Some(o.from.as_str())),
        PatchOp::Copy(o) => (o.path.as_str(), Some(o.from.as_str())),
        PatchOp::Test(o) => (o.path.as_str(), None),
    }
}

fn is_pointer(p: &str) -> bool { p.is_empty() || p.starts_with('/') }

impl Patch {
    /// Decode a patch body. Any malformed or unsupported operation rejects the whole body.
    pub fn from_slice(patch_type: PatchType, body: &[u8]) -> ApiResult<Self> {
        match patch_type {
            PatchType::Merge => {
                let v: Json = serde_json::from_slice(body).map_err(|e| failed(0, format!("patch body is not valid JSON: {}", e)))?;
                if !v.is_object() { return Err(failed(0, "merge patch must be a JSON object")); }
                Ok(Patch::Merge(v))
            }
            PatchType::Json => {
                let p: json_patch::Patch = serde_json::from_slice(body).map_err(|e| failed(0, format!("malformed json patch: {}", e)))?;
                for (i, op) in p.0.iter().enumerate() {
                    let (path, from) = op_paths(op);
                    if let Some(bad) = std::iter::once(path).chain(from).find(|p| !is_pointer(p)) {
                        return Err(failed(i, format!("path {:?} must start with '/'", bad)));
                    }
                }
                Ok(Patch::Json(p.0))
            }
        }
    }

    pub fn patch_type(&self) -> PatchType {
        match self { Patch::Json(_) => PatchType::Json, Patch::Merge(_) => PatchType::Merge }
    }

    /// Number of operations (a merge document counts as one).
    pub fn len(&self) -> usize {
        match self { Patch::Json(ops) => ops.len(), Patch::Merge(_) => 1 }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Produce the patched document. `doc` is never modified.
    pub fn apply(&self, doc: &Json) -> ApiResult<Json> {
        match self {
            Patch::Json(ops) => apply_json_patch(doc, ops),
            Patch::Merge(m) => {
                let mut out = doc.clone();
                json_patch::merge(&mut out, m);
                Ok(out)
            }
        }
    }
}

/// Apply `ops` in order to a copy of `doc`. The first failing operation aborts the whole patch.
pub fn apply_json_patch(doc: &Json, ops: &[PatchOp]) -> ApiResult<Json> {
    let mut work = doc.clone();
    for (i, op) in ops.iter().enumerate() {
        if let PatchOp::Replace(r) = op {
            if let Some(slot) = work.pointer(&r.path) {
                if !same_type(slot, &r.value) {
                    return Err(failed(i, format!("type mismatch at {}: cannot replace {} with {}", r.path, type_name(slot), type_name(&r.value))));
                }
            }
        }
        json_patch::patch(&mut work, std::slice::from_ref(op)).map_err(|e| failed(i, format!("{} at {}", e.kind, e.path)))?;
    }
    tracing::debug!(ops = ops.len(), "apply: json patch ok");
    Ok(work)
}

// Null on either side is always compatible (clearing or filling an optional field).
fn same_type(a: &Json, b: &Json) -> bool {
    matches!(
        (a, b),
        (Json::Null, _) | (_, Json::Null)
            | (Json::Bool(_), Json::Bool(_))
            | (Json::Number(_), Json::Number(_))
            | (Json::String(_), Json::String(_))
            | (Json::Array(_), Json::Array(_))
            | (Json::Object(_), Json::Object(_))
    )
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
