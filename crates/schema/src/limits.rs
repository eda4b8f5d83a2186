//! Size budgets applied to every candidate document.

use rulestore_core::Violations;
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for Limits {
    fn default() -> Self { Self { max_bytes: 1_000_000, max_nodes: 100_000 } }
}

/// True when `v` has at least `max` nodes. Stops walking once the budget is reached.
pub fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

pub fn check(doc: &Json, limits: &Limits, v: &mut Violations) {
    if json_node_budget_exceeded(doc, limits.max_nodes) {
        v.push("", format!("document too complex (>{} nodes)", limits.max_nodes));
        return;
    }
    let bytes = serde_json::to_vec(doc).map(|b| b.len()).unwrap_or(usize::MAX);
    if bytes > limits.max_bytes {
        v.push("", format!("document too large ({} > {} bytes)", bytes, limits.max_bytes));
    }
}
