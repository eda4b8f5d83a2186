//! Rulestore apply: patch documents onto stored objects and summarize what changed.

#![forbid(unsafe_code)]

pub mod patch;

use metrics::{counter, histogram};
use rulestore_core::{meta, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub use patch::{apply_json_patch, ops, Patch, PatchOp, PatchType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Outcome of [`apply_patch`]: the patched document and how it differs from the input.
#[derive(Debug, Clone)]
pub struct Applied {
    pub doc: Json,
    pub summary: DiffSummary,
}

/// Apply `patch` to `current`, enforcing the operation cap. Server-managed fields are ignored by the summary.
pub fn apply_patch(current: &Json, patch: &Patch, max_ops: usize) -> ApiResult<Applied> {
    let t0 = std::time::Instant::now();
    counter!("apply_attempts", 1u64);
    if patch.len() > max_ops {
        counter!("apply_err", 1u64);
        return Err(rulestore_core::ApiError::PatchFailed { index: max_ops, message: format!("patch has {} operations (max {})", patch.len(), max_ops) });
    }
    let doc = match patch.apply(current) {
        Ok(d) => d,
        Err(e) => { counter!("apply_err", 1u64); return Err(e); }
    };
    let summary = diff_summary(&meta::strip_server_fields(doc.clone()), &meta::strip_server_fields(current.clone()));
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    counter!("apply_ok", 1u64);
    tracing::debug!(ops = patch.len(), adds = summary.adds, updates = summary.updates, removes = summary.removes, "apply: patch ok");
    Ok(Applied { doc, summary })
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, adds: &mut usize, ups: &mut usize, rems: &mut usize) {
        use serde_json::Value as V;
        match (a, b) {
            (V::Object(ao), V::Object(bo)) => {
                for (k, av) in ao.iter() {
                    if let Some(bv) = bo.get(k) {
                        if av == bv { continue; }
                        walk(av, bv, adds, ups, rems);
                    } else {
                        *adds += 1;
                    }
                }
                for (k, _bv) in bo.iter() {
                    if !ao.contains_key(k) { *rems += 1; }
                }
            }
            (V::Array(aa), V::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                for i in 0..min_len { if aa[i] != bb[i] { *ups += 1; } }
                if aa.len() > bb.len() { *adds += aa.len() - bb.len(); }
                if bb.len() > aa.len() { *rems += bb.len() - aa.len(); }
            }
            (av, bv) => { if av != bv { *ups += 1; } }
        }
    }
    let mut adds = 0usize; let mut ups = 0usize; let mut rems = 0usize;
    walk(target, base, &mut adds, &mut ups, &mut rems);
    DiffSummary { adds, updates: ups, removes: rems }
}
