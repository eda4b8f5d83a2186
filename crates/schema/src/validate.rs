//! Validation gate: document envelope checks plus kind-specific spec rules.
//!
//! Rules never stop at the first failure; every violation is pushed into a
//! [`Violations`] so callers get the complete list in one round trip.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rulestore_core::{meta, ApiResult, Violations, FOLDER_ANNOTATION};
use serde_json::{Map, Value as Json};

use crate::duration::{parse_prom_duration, parse_prom_duration_with_millis};
use crate::kinds::{EXEC_ERR_STATES, NO_DATA_STATES};
use crate::limits::{self, Limits};
use crate::registry::KindDescriptor;

pub const MAX_NAME_LEN: usize = 40;
pub const MAX_TITLE_LEN: usize = 190;
/// Length of the random suffix appended to `metadata.generateName`.
pub const GENERATED_SUFFIX_LEN: usize = 14;
/// Longest `generateName` prefix whose generated names still fit [`MAX_NAME_LEN`].
pub const MAX_GENERATE_NAME_LEN: usize = MAX_NAME_LEN - GENERATED_SUFFIX_LEN;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-_]+$").expect("static regex"));
static METRIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("static regex"));

/// Inputs the gate needs beyond the document itself.
pub struct ValidationContext<'a> {
    /// Namespace the request addresses.
    pub namespace: &'a str,
    /// Trigger intervals must be positive multiples of this.
    pub base_interval: Duration,
    pub limits: Limits,
    /// Folder existence lookup for folder-scoped kinds; `None` skips the check.
    /// A lookup error aborts the gate and is returned as is.
    pub folder_exists: Option<&'a dyn Fn(&str) -> ApiResult<bool>>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(namespace: &'a str) -> Self {
        Self { namespace, base_interval: Duration::from_secs(10), limits: Limits::default(), folder_exists: None }
    }
}

/// Object names and uids: 1-40 chars of `[a-zA-Z0-9-_]`.
pub fn validate_name(name: &str) -> Option<String> {
    if name.is_empty() { return Some("must not be empty".into()); }
    if name.len() > MAX_NAME_LEN { return Some(format!("must be no more than {} characters", MAX_NAME_LEN)); }
    if !NAME_RE.is_match(name) { return Some("must consist of alphanumeric characters, '-' or '_'".into()); }
    None
}

/// Run the full gate on a candidate document for `desc`.
pub fn validate_object(desc: &KindDescriptor, doc: &Json, ctx: &ValidationContext<'_>) -> ApiResult<()> {
    let name = meta::meta_str(doc, meta::NAME).unwrap_or("").to_string();
    let mut v = Violations::new();
    let Some(root) = doc.as_object() else {
        v.push("", "object body must be a JSON object");
        return v.into_result(desc.name(), &name);
    };

    limits::check(doc, &ctx.limits, &mut v);

    if let Some(av) = root.get("apiVersion") {
        let expected = desc.kind.api_version();
        if av.as_str() != Some(expected.as_str()) {
            v.push("apiVersion", format!("must be {:?}", expected));
        }
    }
    if let Some(k) = root.get("kind") {
        if k.as_str() != Some(desc.kind.kind.as_str()) {
            v.push("kind", format!("must be {:?}", desc.kind.kind));
        }
    }

    match root.get("metadata") {
        None => {}
        Some(Json::Object(m)) => metadata_rules(m, ctx, &mut v),
        Some(_) => v.push("metadata", "must be an object"),
    }

    match root.get("spec") {
        Some(spec) => (desc.validate)(spec, ctx, &mut v),
        None => v.push("spec", "required"),
    }

    if desc.folder_scoped {
        if let Some(exists) = ctx.folder_exists {
            match meta::annotation(doc, FOLDER_ANNOTATION) {
                None | Some("") => v.push(format!("metadata.annotations[{}]", FOLDER_ANNOTATION), "required"),
                Some(folder) => {
                    if !exists(folder)? {
                        v.push(format!("metadata.annotations[{}]", FOLDER_ANNOTATION), format!("folder {:?} not found", folder));
                    }
                }
            }
        }
    }

    v.into_result(desc.name(), &name)
}

fn metadata_rules(m: &Map<String, Json>, ctx: &ValidationContext<'_>, v: &mut Violations) {
    match m.get(meta::NAME) {
        None | Some(Json::Null) => {}
        Some(Json::String(s)) if s.is_empty() => {}
        Some(Json::String(s)) => {
            if let Some(problem) = validate_name(s) { v.push("metadata.name", problem); }
        }
        Some(_) => v.push("metadata.name", "must be a string"),
    }
    if let Some(ns) = m.get(meta::NAMESPACE) {
        match ns.as_str() {
            Some("") => {}
            Some(s) if s != ctx.namespace => v.push("metadata.namespace", format!("does not match the request namespace {:?}", ctx.namespace)),
            Some(_) => {}
            None if ns.is_null() => {}
            None => v.push("metadata.namespace", "must be a string"),
        }
    }
    if let Some(prefix) = m.get(meta::GENERATE_NAME).and_then(|g| g.as_str()) {
        if prefix.len() > MAX_GENERATE_NAME_LEN {
            v.push("metadata.generateName", format!("must be no more than {} characters", MAX_GENERATE_NAME_LEN));
        }
        if !prefix.is_empty() && !NAME_RE.is_match(prefix) {
            v.push("metadata.generateName", "must consist of alphanumeric characters, '-' or '_'");
        }
    }
    string_map(m.get(meta::ANNOTATIONS), "metadata.annotations", v);
    string_map(m.get(meta::LABELS), "metadata.labels", v);
}

// ---- field helpers ----

fn path(base: &str, field: &str) -> String { format!("{}.{}", base, field) }

fn required_str<'a>(obj: &'a Map<String, Json>, base: &str, field: &str, v: &mut Violations) -> Option<&'a str> {
    match obj.get(field) {
        Some(Json::String(s)) => Some(s.as_str()),
        None | Some(Json::Null) => { v.push(path(base, field), "required"); None }
        Some(_) => { v.push(path(base, field), "must be a string"); None }
    }
}

fn optional_str<'a>(obj: &'a Map<String, Json>, base: &str, field: &str, v: &mut Violations) -> Option<&'a str> {
    match obj.get(field) {
        Some(Json::String(s)) => Some(s.as_str()),
        None | Some(Json::Null) => None,
        Some(_) => { v.push(path(base, field), "must be a string"); None }
    }
}

fn optional_bool(obj: &Map<String, Json>, base: &str, field: &str, v: &mut Violations) -> Option<bool> {
    match obj.get(field) {
        Some(Json::Bool(b)) => Some(*b),
        None | Some(Json::Null) => None,
        Some(_) => { v.push(path(base, field), "must be a boolean"); None }
    }
}

fn string_map(val: Option<&Json>, field: &str, v: &mut Violations) {
    match val {
        None | Some(Json::Null) => {}
        Some(Json::Object(m)) => {
            for (k, val) in m {
                if k.is_empty() { v.push(field, "keys must not be empty"); }
                if !val.is_string() { v.push(format!("{}[{}]", field, k), "must be a string"); }
            }
        }
        Some(_) => v.push(field, "must be a map of strings"),
    }
}

fn duration_field(s: &str, field: &str, with_millis: bool, v: &mut Violations) -> Option<Duration> {
    let parsed = if with_millis { parse_prom_duration_with_millis(s) } else { parse_prom_duration(s) };
    match parsed {
        Ok(d) => Some(d),
        Err(e) => { v.push(field, e.to_string()); None }
    }
}

fn datasource_uid(s: &str, field: &str, v: &mut Violations) {
    if let Some(problem) = validate_name(s) { v.push(field, problem); }
}

// ---- rule specs ----

/// Rules shared by AlertRule and RecordingRule specs. Returns the spec object when it is one.
fn rule_common<'a>(spec: &'a Json, ctx: &ValidationContext<'_>, v: &mut Violations) -> Option<&'a Map<String, Json>> {
    let Some(obj) = spec.as_object() else {
        v.push("spec", "must be an object");
        return None;
    };

    if let Some(title) = required_str(obj, "spec", "title", v) {
        if title.trim().is_empty() { v.push("spec.title", "must not be empty"); }
        if title.chars().count() > MAX_TITLE_LEN { v.push("spec.title", format!("must be no more than {} characters", MAX_TITLE_LEN)); }
    }
    optional_bool(obj, "spec", "paused", v);
    string_map(obj.get("labels"), "spec.labels", v);

    match obj.get("trigger") {
        Some(Json::Object(t)) => {
            if let Some(iv) = required_str(t, "spec.trigger", "interval", v) {
                if let Some(d) = duration_field(iv, "spec.trigger.interval", false, v) {
                    let base = ctx.base_interval.as_millis();
                    if d.is_zero() {
                        v.push("spec.trigger.interval", "must be positive");
                    } else if base > 0 && d.as_millis() % base != 0 {
                        v.push("spec.trigger.interval", format!("must be a multiple of the base interval {}s", ctx.base_interval.as_secs()));
                    }
                }
            }
        }
        None | Some(Json::Null) => v.push("spec.trigger", "required"),
        Some(_) => v.push("spec.trigger", "must be an object"),
    }

    match obj.get("data") {
        Some(Json::Object(data)) => queries(data, v),
        None | Some(Json::Null) => v.push("spec.data", "required"),
        Some(_) => v.push("spec.data", "must be a map of queries"),
    }

    Some(obj)
}

fn queries(data: &Map<String, Json>, v: &mut Violations) {
    if data.is_empty() {
        v.push("spec.data", "must contain at least one query");
        return;
    }
    let mut sources = 0usize;
    for (ref_id, q) in data {
        let base = format!("spec.data[{}]", ref_id);
        if ref_id.is_empty() { v.push("spec.data", "query names must not be empty"); }
        let Some(q) = q.as_object() else {
            v.push(base, "must be an object");
            continue;
        };
        optional_str(q, &base, "queryType", v);
        if let Some(ds) = required_str(q, &base, "datasourceUID", v) {
            datasource_uid(ds, &path(&base, "datasourceUID"), v);
        }
        if matches!(q.get("model"), None | Some(Json::Null)) { v.push(path(&base, "model"), "required"); }
        if optional_bool(q, &base, "source", v) == Some(true) { sources += 1; }
        match q.get("relativeTimeRange") {
            None | Some(Json::Null) => {}
            Some(Json::Object(r)) => {
                let rbase = path(&base, "relativeTimeRange");
                let from = required_str(r, &rbase, "from", v).and_then(|s| duration_field(s, &path(&rbase, "from"), true, v));
                let to = required_str(r, &rbase, "to", v).and_then(|s| duration_field(s, &path(&rbase, "to"), true, v));
                if let (Some(from), Some(to)) = (from, to) {
                    if from < to { v.push(rbase, "from must not be more recent than to"); }
                }
            }
            Some(_) => v.push(path(&base, "relativeTimeRange"), "must be an object"),
        }
    }
    if sources > 1 {
        v.push("spec.data", "at most one query may be marked as source");
    } else if sources == 0 && data.len() > 1 {
        v.push("spec.data", "exactly one query must be marked as source when more than one is defined");
    }
}

pub fn recording_rule_spec(spec: &Json, ctx: &ValidationContext<'_>, v: &mut Violations) {
    let Some(obj) = rule_common(spec, ctx, v) else { return };
    if let Some(metric) = required_str(obj, "spec", "metric", v) {
        if !METRIC_RE.is_match(metric) { v.push("spec.metric", format!("{:?} is not a valid metric name", metric)); }
    }
    if let Some(ds) = optional_str(obj, "spec", "targetDatasourceUID", v) {
        datasource_uid(ds, "spec.targetDatasourceUID", v);
    }
}

pub fn alert_rule_spec(spec: &Json, ctx: &ValidationContext<'_>, v: &mut Violations) {
    let Some(obj) = rule_common(spec, ctx, v) else { return };
    string_map(obj.get("annotations"), "spec.annotations", v);
    if let Some(s) = optional_str(obj, "spec", "noDataState", v) {
        if !NO_DATA_STATES.contains(&s) { v.push("spec.noDataState", format!("must be one of {:?}", NO_DATA_STATES)); }
    }
    if let Some(s) = optional_str(obj, "spec", "execErrState", v) {
        if !EXEC_ERR_STATES.contains(&s) { v.push("spec.execErrState", format!("must be one of {:?}", EXEC_ERR_STATES)); }
    }
    for field in ["for", "keepFiringFor"] {
        if let Some(s) = optional_str(obj, "spec", field, v) {
            duration_field(s, &path("spec", field), false, v);
        }
    }
    match obj.get("missingSeriesEvalsToResolve") {
        None | Some(Json::Null) => {}
        Some(n) => match n.as_i64() {
            Some(n) if n >= 1 => {}
            Some(_) => v.push("spec.missingSeriesEvalsToResolve", "must be at least 1"),
            None => v.push("spec.missingSeriesEvalsToResolve", "must be an integer"),
        },
    }
    match obj.get("notificationSettings") {
        None | Some(Json::Null) | Some(Json::Object(_)) => {}
        Some(_) => v.push("spec.notificationSettings", "must be an object"),
    }
    match obj.get("panelRef") {
        None | Some(Json::Null) => {}
        Some(Json::Object(p)) => {
            required_str(p, "spec.panelRef", "dashboardUID", v);
            if !p.get("panelID").map(|n| n.is_i64()).unwrap_or(false) { v.push("spec.panelRef.panelID", "must be an integer"); }
        }
        Some(_) => v.push("spec.panelRef", "must be an object"),
    }
}

pub fn folder_spec(spec: &Json, _ctx: &ValidationContext<'_>, v: &mut Violations) {
    let Some(obj) = spec.as_object() else {
        v.push("spec", "must be an object");
        return;
    };
    if let Some(title) = required_str(obj, "spec", "title", v) {
        if title.trim().is_empty() { v.push("spec.title", "must not be empty"); }
    }
    optional_str(obj, "spec", "description", v);
}
