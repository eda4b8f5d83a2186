//! Typed custom resources served by the store.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// `spec.trigger` of both rule kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntervalTrigger {
    pub interval: String,
}

/// Relative window a query looks back over, e.g. `from: 5m, to: 0s`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelativeTimeRange {
    pub from: String,
    pub to: String,
}

/// One named query of a rule. `model` is opaque to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleQuery {
    #[serde(rename = "queryType", default)]
    pub query_type: String,
    #[serde(rename = "relativeTimeRange", default, skip_serializing_if = "Option::is_none")]
    pub relative_time_range: Option<RelativeTimeRange>,
    #[serde(rename = "datasourceUID")]
    pub datasource_uid: String,
    pub model: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PanelRef {
    #[serde(rename = "dashboardUID")]
    pub dashboard_uid: String,
    #[serde(rename = "panelID")]
    pub panel_id: i64,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "rules.alerting.rulestore.io",
    version = "v0alpha1",
    kind = "RecordingRule",
    plural = "recordingrules",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRuleSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    pub trigger: IntervalTrigger,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub metric: String,
    pub data: BTreeMap<String, RuleQuery>,
    #[serde(rename = "targetDatasourceUID", default, skip_serializing_if = "Option::is_none")]
    pub target_datasource_uid: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "rules.alerting.rulestore.io",
    version = "v0alpha1",
    kind = "AlertRule",
    plural = "alertrules",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AlertRuleSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    pub trigger: IntervalTrigger,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, RuleQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_err_state: Option<String>,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_series_evals_to_resolve: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_settings: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_ref: Option<PanelRef>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "folders.rulestore.io",
    version = "v1beta1",
    kind = "Folder",
    plural = "folders",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
pub struct FolderSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub const NO_DATA_STATES: [&str; 4] = ["NoData", "Alerting", "OK", "KeepLast"];
pub const EXEC_ERR_STATES: [&str; 4] = ["Error", "Alerting", "OK", "KeepLast"];
