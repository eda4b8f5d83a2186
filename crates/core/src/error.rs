//! Failure taxonomy shared by every layer, plus a Kubernetes-style `Status` rendering.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ObjectKey;

/// One violated constraint, addressed by a dotted field path (e.g. `spec.data`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub detail: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.detail)
    }
}

/// Accumulator for validation failures. Rules push into it instead of returning early.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violations(SmallVec<[FieldViolation; 4]>);

impl Violations {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, field: impl Into<String>, detail: impl Into<String>) {
        self.0.push(FieldViolation { field: field.into(), detail: detail.into() });
    }

    pub fn extend(&mut self, other: Violations) { self.0.extend(other.0); }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> impl Iterator<Item = &FieldViolation> { self.0.iter() }

    /// True when any violation addresses `field` exactly.
    pub fn has_field(&self, field: &str) -> bool { self.0.iter().any(|v| v.field == field) }

    /// `Ok(())` when empty, otherwise an `Invalid` error carrying every violation.
    pub fn into_result(self, kind: &str, name: &str) -> ApiResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Invalid { kind: kind.to_string(), name: name.to_string(), violations: self })
        }
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 { f.write_str("; ")?; }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

/// API errors suitable for transport.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum ApiError {
    #[error("{kind} \"{name}\" is invalid: {violations}")]
    Invalid { kind: String, name: String, violations: Violations },
    #[error("operation cannot be fulfilled on {key}: {message}")]
    Conflict { key: ObjectKey, message: String },
    #[error("{key} not found")]
    NotFound { key: ObjectKey },
    #[error("{key} already exists")]
    AlreadyExists { key: ObjectKey },
    #[error("patch operation {index} failed: {message}")]
    PatchFailed { index: usize, message: String },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn invalid(kind: &str, name: &str, field: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut v = Violations::new();
        v.push(field, detail);
        ApiError::Invalid { kind: kind.to_string(), name: name.to_string(), violations: v }
    }

    pub fn conflict(key: &ObjectKey, expected: &str, current: &str) -> Self {
        ApiError::Conflict {
            key: key.clone(),
            message: format!(
                "the object has been modified (resourceVersion {} -> {}); please apply your changes to the latest version and try again",
                expected, current
            ),
        }
    }

    pub fn internal(e: impl fmt::Display) -> Self { ApiError::Internal(e.to_string()) }

    /// Machine-readable reason, matching Kubernetes `StatusReason` names where one exists.
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::Invalid { .. } => "Invalid",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::NotFound { .. } => "NotFound",
            ApiError::AlreadyExists { .. } => "AlreadyExists",
            ApiError::PatchFailed { .. } => "PatchFailed",
            ApiError::Timeout(_) => "Timeout",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ApiError::Invalid { .. } | ApiError::PatchFailed { .. } => 422,
            ApiError::Conflict { .. } | ApiError::AlreadyExists { .. } => 409,
            ApiError::NotFound { .. } => 404,
            ApiError::Timeout(_) => 504,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, ApiError::NotFound { .. }) }
    pub fn is_conflict(&self) -> bool { matches!(self, ApiError::Conflict { .. }) }
    pub fn is_invalid(&self) -> bool { matches!(self, ApiError::Invalid { .. }) }
    pub fn is_already_exists(&self) -> bool { matches!(self, ApiError::AlreadyExists { .. }) }
    pub fn is_patch_failed(&self) -> bool { matches!(self, ApiError::PatchFailed { .. }) }

    pub fn to_status(&self) -> Status {
        let details = match self {
            ApiError::Invalid { kind, name, violations } => Some(StatusDetails {
                kind: kind.clone(),
                name: name.clone(),
                causes: violations.iter().map(|v| StatusCause { field: v.field.clone(), message: v.detail.clone() }).collect(),
            }),
            ApiError::Conflict { key, .. } | ApiError::NotFound { key } | ApiError::AlreadyExists { key } => Some(StatusDetails {
                kind: key.kind.clone(),
                name: key.name.clone(),
                causes: Vec::new(),
            }),
            _ => None,
        };
        Status { status: "Failure".into(), message: self.to_string(), reason: self.reason().into(), code: self.code(), details }
    }
}

/// Wire shape of a failed operation (`metav1.Status`-like).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub status: String,
    pub message: String,
    pub reason: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusDetails {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusCause {
    pub field: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_collect_every_entry() {
        let mut v = Violations::new();
        v.push("spec.data", "must contain at least one query");
        v.push("spec.trigger.interval", "invalid duration \"x\"");
        assert_eq!(v.len(), 2);
        assert!(v.has_field("spec.data"));
        let err = v.into_result("RecordingRule", "r1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("spec.data: must contain at least one query"), "msg={}", msg);
        assert!(msg.contains("spec.trigger.interval"), "msg={}", msg);
    }

    #[test]
    fn empty_violations_are_ok() {
        assert!(Violations::new().into_result("Folder", "f").is_ok());
    }

    #[test]
    fn status_mapping() {
        let key = ObjectKey::new("RecordingRule", "default", "r1");
        let nf = ApiError::NotFound { key: key.clone() }.to_status();
        assert_eq!((nf.code, nf.reason.as_str()), (404, "NotFound"));
        let c = ApiError::conflict(&key, "3", "4");
        assert!(c.is_conflict());
        assert_eq!(c.code(), 409);
        assert!(c.to_string().contains("3 -> 4"));

        let inv = ApiError::invalid("RecordingRule", "r1", "spec.data", "must contain at least one query").to_status();
        assert_eq!(inv.code, 422);
        let causes = inv.details.unwrap().causes;
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].field, "spec.data");
    }
}
