//! Kind descriptors: the one place per kind that knows its coordinates, rules and zero value.

use std::fmt;

use rulestore_core::{ApiError, ApiResult, ResourceKind, Violations};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::kinds::{AlertRule, AlertRuleSpec, Folder, FolderSpec, RecordingRule, RecordingRuleSpec};
use crate::validate::{self, ValidationContext};
use crate::Kind;

/// Validates a `spec` value, pushing every violation found.
pub type SpecValidator = fn(&Json, &ValidationContext<'_>, &mut Violations);

#[derive(Clone)]
pub struct KindDescriptor {
    pub kind: ResourceKind,
    pub validate: SpecValidator,
    /// Skeleton document (`apiVersion`, `kind`, empty `metadata`, default `spec`).
    pub zero: fn() -> Json,
    /// Objects of this kind live in a folder named by [`rulestore_core::FOLDER_ANNOTATION`].
    pub folder_scoped: bool,
}

impl fmt::Debug for KindDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindDescriptor").field("kind", &self.kind).field("folder_scoped", &self.folder_scoped).finish()
    }
}

impl KindDescriptor {
    /// Build a descriptor from the kube coordinates of `K`.
    pub fn of<K: kube::Resource<DynamicType = ()>>(validate: SpecValidator, zero: fn() -> Json, folder_scoped: bool) -> Self {
        let kind = ResourceKind {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            plural: K::plural(&()).to_string(),
            namespaced: true,
        };
        Self { kind, validate, zero, folder_scoped }
    }

    pub fn name(&self) -> &str { &self.kind.kind }

    pub fn zero_object(&self) -> Json { (self.zero)() }
}

fn skeleton<S: serde::Serialize + Default>(kind: &ResourceKind) -> Json {
    serde_json::json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind,
        "metadata": {},
        "spec": serde_json::to_value(S::default()).unwrap_or_default(),
    })
}

fn recording_rule_zero() -> Json { skeleton::<RecordingRuleSpec>(&RecordingRule::descriptor().kind) }
fn alert_rule_zero() -> Json { skeleton::<AlertRuleSpec>(&AlertRule::descriptor().kind) }
fn folder_zero() -> Json { skeleton::<FolderSpec>(&Folder::descriptor().kind) }

impl Kind for RecordingRule {
    fn descriptor() -> KindDescriptor {
        KindDescriptor::of::<Self>(validate::recording_rule_spec, recording_rule_zero, true)
    }
}

impl Kind for AlertRule {
    fn descriptor() -> KindDescriptor {
        KindDescriptor::of::<Self>(validate::alert_rule_spec, alert_rule_zero, true)
    }
}

impl Kind for Folder {
    fn descriptor() -> KindDescriptor {
        KindDescriptor::of::<Self>(validate::folder_spec, folder_zero, false)
    }
}

/// Lookup of descriptors by kind name.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    by_kind: FxHashMap<String, KindDescriptor>,
}

impl KindRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry serving AlertRule, RecordingRule and Folder.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        r.register(AlertRule::descriptor());
        r.register(RecordingRule::descriptor());
        r.register(Folder::descriptor());
        r
    }

    /// Insert or replace the descriptor for its kind.
    pub fn register(&mut self, desc: KindDescriptor) {
        tracing::debug!(kind = %desc.kind.gvk_key(), "schema: kind registered");
        self.by_kind.insert(desc.kind.kind.clone(), desc);
    }

    pub fn get(&self, kind: &str) -> Option<&KindDescriptor> { self.by_kind.get(kind) }

    pub fn resolve(&self, kind: &str) -> ApiResult<&KindDescriptor> {
        self.get(kind).ok_or_else(|| ApiError::invalid(kind, "", "kind", format!("unknown kind {:?}", kind)))
    }

    /// Registered kinds sorted by name.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut out: Vec<ResourceKind> = self.by_kind.values().map(|d| d.kind.clone()).collect();
        out.sort_by(|a, b| a.kind.cmp(&b.kind));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_serves_three_kinds() {
        let r = KindRegistry::builtin();
        let names: Vec<String> = r.kinds().into_iter().map(|k| k.kind).collect();
        assert_eq!(names, vec!["AlertRule", "Folder", "RecordingRule"]);
        assert!(r.get("RecordingRule").unwrap().folder_scoped);
        assert!(!r.get("Folder").unwrap().folder_scoped);
        assert!(r.resolve("Dashboard").unwrap_err().is_invalid());
    }

    #[test]
    fn zero_object_carries_coordinates() {
        let d = RecordingRule::descriptor();
        let z = d.zero_object();
        assert_eq!(z["kind"], "RecordingRule");
        assert_eq!(z["apiVersion"], "rules.alerting.rulestore.io/v0alpha1");
        assert_eq!(z["spec"]["title"], "");
        assert!(z["spec"]["data"].as_object().unwrap().is_empty());
    }
}
