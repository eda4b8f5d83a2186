use std::collections::BTreeMap;
use std::sync::Arc;

use rulestore_api::{ops, Config, DeleteOptions, Dispatcher, InProcApi, Patch, RecordingRule, ResourceApi, ResourceClient};
use rulestore_core::FOLDER_ANNOTATION;
use rulestore_schema::{IntervalTrigger, RecordingRuleSpec, RuleQuery};
use serde_json::json;

fn api() -> Arc<dyn ResourceApi> {
    Arc::new(InProcApi::new(Arc::new(Dispatcher::in_memory(Config::default()))))
}

fn client() -> ResourceClient<RecordingRule> {
    ResourceClient::new(api(), "default")
}

fn spec(title: &str) -> RecordingRuleSpec {
    let mut data = BTreeMap::new();
    data.insert(
        "A".to_string(),
        RuleQuery { query_type: "query".into(), datasource_uid: "prom".into(), model: json!({ "expr": "sum(rate(http_requests_total[5m]))" }), ..Default::default() },
    );
    RecordingRuleSpec {
        title: title.into(),
        trigger: IntervalTrigger { interval: "1m".into() },
        metric: "job:http_requests:rate5m".into(),
        data,
        ..Default::default()
    }
}

fn rule(name: &str, title: &str) -> RecordingRule {
    let mut r = RecordingRule::new(name, spec(title));
    r.metadata.annotations = Some(BTreeMap::from([(FOLDER_ANNOTATION.to_string(), "ops".to_string())]));
    r
}

#[tokio::test]
async fn explicit_name_create_get_update() {
    let c = client();
    let created = c.create(&rule("explicit-name-recording-rule", "T1")).await.unwrap();
    assert_eq!(created.metadata.name.as_deref(), Some("explicit-name-recording-rule"));
    let v1 = created.metadata.resource_version.clone().unwrap();

    let got = c.get("explicit-name-recording-rule").await.unwrap();
    assert_eq!(got.spec.title, "T1");
    assert_eq!(got.spec, spec("T1"));
    assert_eq!(got.metadata.annotations.as_ref().unwrap()[FOLDER_ANNOTATION], "ops");

    let mut next = got.clone();
    next.spec.title = "T2".into();
    let updated = c.update(&next).await.unwrap();
    let v2 = updated.metadata.resource_version.clone().unwrap();
    assert_ne!(v1, v2);
    assert_eq!(updated.metadata.uid, created.metadata.uid);
    assert_eq!(updated.metadata.name, created.metadata.name);
    assert_eq!(updated.metadata.generation, Some(2));

    assert_eq!(c.get("explicit-name-recording-rule").await.unwrap().spec.title, "T2");
}

#[tokio::test]
async fn generated_names_are_unique() {
    let c = client();
    let a = c.create(&rule("", "auto")).await.unwrap();
    let b = c.create(&rule("", "auto")).await.unwrap();
    let (na, nb) = (a.metadata.name.unwrap(), b.metadata.name.unwrap());
    assert!(!na.is_empty());
    assert_ne!(na, nb);
    assert_ne!(a.metadata.uid, b.metadata.uid);

    let mut prefixed = rule("", "auto");
    prefixed.metadata.name = None;
    prefixed.metadata.generate_name = Some("latency-".into());
    let p = c.create(&prefixed).await.unwrap();
    assert!(p.metadata.name.unwrap().starts_with("latency-"));
    assert_eq!(c.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn generated_names_stay_updatable() {
    let c = client();
    let mut too_long = rule("", "T1");
    too_long.metadata.generate_name = Some("a".repeat(30));
    let err = c.create(&too_long).await.unwrap_err();
    assert!(err.is_invalid());
    assert!(err.to_string().contains("metadata.generateName"), "{}", err);
    assert!(c.list().await.unwrap().is_empty());

    let mut longest = rule("", "T1");
    longest.metadata.generate_name = Some("a".repeat(rulestore_schema::MAX_GENERATE_NAME_LEN));
    let created = c.create(&longest).await.unwrap();
    let name = created.metadata.name.clone().unwrap();
    assert!(name.len() <= rulestore_schema::validate::MAX_NAME_LEN, "{}", name);

    let mut next = created.clone();
    next.spec.title = "T2".into();
    assert_eq!(c.update(&next).await.unwrap().spec.title, "T2");
    let patched = c.patch(&name, Patch::Json(vec![ops::replace("/spec/title", json!("T3"))])).await.unwrap();
    assert_eq!(patched.spec.title, "T3");
}

#[tokio::test]
async fn empty_query_data_is_invalid_and_not_stored() {
    let c = client();
    let mut r = rule("no-queries", "T1");
    r.spec.data.clear();
    let err = c.create(&r).await.unwrap_err();
    assert!(err.is_invalid());
    assert!(err.to_string().contains("spec.data"), "{}", err);
    assert_eq!(err.to_status().code, 422);
    assert!(c.get("no-queries").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn every_violation_is_reported() {
    let c = client();
    let mut r = rule("bad", "");
    r.spec.trigger.interval = "7s".into();
    r.spec.metric = "not a metric".into();
    r.spec.data.get_mut("A").unwrap().datasource_uid = "has spaces".into();
    let err = c.create(&r).await.unwrap_err();
    let causes: Vec<String> = err.to_status().details.unwrap().causes.into_iter().map(|c| c.field).collect();
    for field in ["spec.title", "spec.trigger.interval", "spec.metric", "spec.data[A].datasourceUID"] {
        assert!(causes.iter().any(|c| c == field), "missing {} in {:?}", field, causes);
    }
}

#[tokio::test]
async fn duplicate_create_already_exists() {
    let c = client();
    c.create(&rule("dup", "T1")).await.unwrap();
    let err = c.create(&rule("dup", "T1")).await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(err.to_status().code, 409);
}

#[tokio::test]
async fn stale_update_conflicts_and_leaves_document() {
    let c = client();
    let created = c.create(&rule("cas", "T1")).await.unwrap();
    let mut first = created.clone();
    first.spec.title = "first".into();
    c.update(&first).await.unwrap();

    let mut stale = created.clone();
    stale.spec.title = "second".into();
    let err = c.update(&stale).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(c.get("cas").await.unwrap().spec.title, "first");
}

#[tokio::test]
async fn patch_replaces_only_title() {
    let c = client();
    let before = c.create(&rule("patched", "T1")).await.unwrap();
    let after = c.patch("patched", Patch::Json(vec![ops::replace("/spec/title", json!("patched-title"))])).await.unwrap();
    assert_eq!(after.spec.title, "patched-title");
    let mut expected = before.spec.clone();
    expected.title = "patched-title".into();
    assert_eq!(after.spec, expected);
    assert_eq!(after.metadata.uid, before.metadata.uid);
    assert_ne!(after.metadata.resource_version, before.metadata.resource_version);

    let err = c.patch("patched", Patch::Json(vec![ops::replace("/spec/nope", json!(1))])).await.unwrap_err();
    assert!(err.is_patch_failed());
    let err = c.patch("patched", Patch::Json(vec![ops::remove("/spec/data/A")])).await.unwrap_err();
    assert!(err.is_invalid());
    assert_eq!(c.get("patched").await.unwrap().spec.title, "patched-title");
    assert!(c.patch("missing", Patch::Json(vec![])).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn title_patch_leaves_rest_of_document_untouched() {
    let api = api();
    let mut doc = serde_json::to_value(rule("whole", "T1")).unwrap();
    doc["metadata"]["labels"] = json!({ "team": "sre" });
    let before = api.create("RecordingRule", "default", doc).await.unwrap();

    let patch = Patch::Json(vec![ops::replace("/spec/title", json!("patched-title"))]);
    let after = api.patch("RecordingRule", "default", "whole", patch).await.unwrap();
    assert_ne!(after.resource_version, before.resource_version);

    let mut expected = before.raw.clone();
    expected["spec"]["title"] = json!("patched-title");
    expected["metadata"]["resourceVersion"] = after.raw["metadata"]["resourceVersion"].clone();
    expected["metadata"]["generation"] = after.raw["metadata"]["generation"].clone();
    assert_eq!(after.raw, expected);
    assert_eq!(serde_json::to_vec(&after.raw).unwrap(), serde_json::to_vec(&expected).unwrap());
    assert_eq!(api.get("RecordingRule", "default", "whole").await.unwrap().raw, after.raw);
}

#[tokio::test]
async fn delete_twice_is_not_found() {
    let c = client();
    c.create(&rule("gone", "T1")).await.unwrap();
    let last = c.delete("gone", DeleteOptions::default()).await.unwrap();
    assert_eq!(last.spec.title, "T1");
    assert!(c.get("gone").await.unwrap_err().is_not_found());
    assert!(c.delete("gone", DeleteOptions::default()).await.unwrap_err().is_not_found());

    let again = c.create(&rule("gone", "T1")).await.unwrap();
    assert_ne!(again.metadata.uid, last.metadata.uid);
}
