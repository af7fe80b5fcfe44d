//! Object codec: builds and reads the plane's generic object shape per kind family.
//!
//! Encoding is pure. Decoding is best-effort: missing optional fields default to
//! empty values and only a structurally broken object (non-mapping root or
//! metadata) is rejected.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use crate::{Error, GroupVersion, JsonMap, KindFamily, Result, WorkloadEntity};

/// Name of the single generated container.
pub const MAIN_CONTAINER: &str = "main";
/// Retry budget written into every encoded Job.
pub const JOB_BACKOFF_LIMIT: i64 = 4;
/// Schedule written into every encoded CronJob.
pub const CRONJOB_SCHEDULE: &str = "*/1 * * * *";
/// Where decoding looks for the container list, for every kind.
///
/// CronJob nests its pod template under `jobTemplate.spec`, so CronJob images are not recovered.
pub const CONTAINERS_PATH: &[&str] = &["spec", "template", "spec", "containers"];

impl KindFamily {
    /// Family-specific spec shape, before `spec_patch` is applied.
    pub fn encode_spec(self, entity: &WorkloadEntity) -> JsonMap {
        let spec = match self {
            KindFamily::ReplicaController => json!({
                "replicas": entity.replicas,
                "selector": { "matchLabels": entity.labels },
                "template": pod_template(entity),
            }),
            KindFamily::Job => json!({
                "template": pod_template(entity),
                "backoffLimit": JOB_BACKOFF_LIMIT,
            }),
            KindFamily::CronJob => json!({
                "schedule": CRONJOB_SCHEDULE,
                "jobTemplate": { "spec": { "template": pod_template(entity) } },
            }),
            KindFamily::Generic => json!({}),
        };
        match spec {
            Json::Object(map) => map,
            _ => JsonMap::new(),
        }
    }
}

fn pod_template(entity: &WorkloadEntity) -> Json {
    json!({
        "metadata": { "labels": entity.labels },
        "spec": {
            "containers": [ { "name": MAIN_CONTAINER, "image": entity.image } ],
        },
    })
}

/// Build the generic object for `entity` as `kind` under `gv`.
pub fn encode(gv: &GroupVersion, kind: &str, entity: &WorkloadEntity) -> Json {
    let mut spec = KindFamily::for_kind(kind).encode_spec(entity);
    if let Some(patch) = &entity.spec_patch {
        for (k, v) in patch {
            spec.insert(k.clone(), v.clone());
        }
    }
    json!({
        "apiVersion": gv.api_version(),
        "kind": kind,
        "metadata": {
            "name": entity.name,
            "labels": entity.labels,
        },
        "spec": spec,
    })
}

/// Read a generic object back into a [`WorkloadEntity`] tagged with `kind`.
pub fn decode(kind: &str, obj: &Json) -> Result<WorkloadEntity> {
    let root = obj
        .as_object()
        .ok_or_else(|| Error::Conversion(format!("{} object is not a mapping", kind)))?;
    let empty = JsonMap::new();
    let meta = match root.get("metadata") {
        None | Some(Json::Null) => &empty,
        Some(Json::Object(m)) => m,
        Some(_) => return Err(Error::Conversion(format!("{} metadata is not a mapping", kind))),
    };

    let name = meta.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let labels = string_map(meta.get("labels"));
    let replicas = nested(obj, &["spec", "replicas"])
        .and_then(|v| v.as_i64())
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or_default();
    let spec = nested(obj, &["spec"]).and_then(|v| v.as_object()).cloned().unwrap_or_default();
    let status = nested(obj, &["status"]).and_then(|v| v.as_object()).cloned().unwrap_or_default();
    let image = nested(obj, CONTAINERS_PATH)
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
        .and_then(|c| c.get("image"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let api_versions = root
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    let mut metadata = JsonMap::new();
    metadata.insert("annotations".into(), json!(string_map(meta.get("annotations"))));
    metadata.insert(
        "ownerReferences".into(),
        meta.get("ownerReferences").filter(|v| v.is_array()).cloned().unwrap_or_else(|| json!([])),
    );
    metadata.insert(
        "creationTimestamp".into(),
        json!(meta.get("creationTimestamp").and_then(|v| v.as_str()).unwrap_or_default()),
    );

    Ok(WorkloadEntity {
        name,
        labels,
        replicas,
        image,
        kind: kind.to_string(),
        api_versions,
        spec,
        status,
        metadata,
        spec_patch: None,
    })
}

/// Copy `spec` and `metadata.labels` from `desired` into `existing`, keeping every other field.
pub fn merge_desired(existing: &mut Json, desired: &Json) -> Result<()> {
    let obj = existing
        .as_object_mut()
        .ok_or_else(|| Error::Conversion("existing object is not a mapping".into()))?;
    obj.insert("spec".into(), desired.get("spec").cloned().unwrap_or(Json::Null));
    let labels = nested(desired, &["metadata", "labels"]).cloned().unwrap_or(Json::Null);
    let meta = obj.entry("metadata").or_insert_with(|| Json::Object(JsonMap::new()));
    match meta.as_object_mut() {
        Some(m) => {
            m.insert("labels".into(), labels);
            Ok(())
        }
        None => Err(Error::Conversion("existing metadata is not a mapping".into())),
    }
}

/// Walk a path of mapping keys.
pub fn nested<'a>(root: &'a Json, path: &[&str]) -> Option<&'a Json> {
    let mut cur = root;
    for key in path {
        cur = cur.as_object()?.get(*key)?;
    }
    Some(cur)
}

fn string_map(v: Option<&Json>) -> BTreeMap<String, String> {
    v.and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps_v1() -> GroupVersion {
        GroupVersion::new("apps", "v1")
    }

    fn web() -> WorkloadEntity {
        WorkloadEntity::new("Deployment", "web")
            .with_image("nginx:1.25")
            .with_replicas(3)
            .with_label("app", "web")
    }

    #[test]
    fn deployment_shape() {
        let obj = encode(&apps_v1(), "Deployment", &web());
        assert_eq!(obj["apiVersion"], "apps/v1");
        assert_eq!(obj["kind"], "Deployment");
        assert_eq!(obj["metadata"]["name"], "web");
        assert_eq!(obj["spec"]["replicas"], 3);
        assert_eq!(obj["spec"]["selector"]["matchLabels"]["app"], "web");
        assert_eq!(obj["spec"]["template"]["metadata"]["labels"]["app"], "web");
        assert_eq!(obj["spec"]["template"]["spec"]["containers"][0]["name"], MAIN_CONTAINER);
        assert_eq!(obj["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.25");
    }

    #[test]
    fn job_and_cronjob_shapes() {
        let batch = GroupVersion::new("batch", "v1");
        let e = WorkloadEntity::new("Job", "once").with_image("busybox");
        let job = encode(&batch, "Job", &e);
        assert_eq!(job["spec"]["backoffLimit"], JOB_BACKOFF_LIMIT);
        assert!(job["spec"].get("replicas").is_none());
        assert_eq!(job["spec"]["template"]["spec"]["containers"][0]["image"], "busybox");

        let cron = encode(&batch, "CronJob", &e);
        assert_eq!(cron["spec"]["schedule"], CRONJOB_SCHEDULE);
        assert_eq!(
            cron["spec"]["jobTemplate"]["spec"]["template"]["spec"]["containers"][0]["image"],
            "busybox"
        );
    }

    #[test]
    fn spec_patch_overrides_generated_keys() {
        let mut patch = JsonMap::new();
        patch.insert("replicas".into(), json!(7));
        patch.insert("paused".into(), json!(true));
        let obj = encode(&apps_v1(), "Deployment", &web().with_spec_patch(patch));
        assert_eq!(obj["spec"]["replicas"], 7);
        assert_eq!(obj["spec"]["paused"], true);
        assert!(obj["spec"].get("template").is_some());
    }

    #[test]
    fn generic_kind_takes_spec_from_patch_only() {
        let mut patch = JsonMap::new();
        patch.insert("size".into(), json!(2));
        let e = WorkloadEntity::new("Widget", "w").with_spec_patch(patch);
        let obj = encode(&GroupVersion::new("example.io", "v1"), "Widget", &e);
        assert_eq!(obj["spec"], json!({ "size": 2 }));
    }

    #[test]
    fn encode_is_deterministic() {
        let a = encode(&apps_v1(), "Deployment", &web());
        let b = encode(&apps_v1(), "Deployment", &web());
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let e = decode("Deployment", &json!({})).unwrap();
        assert_eq!(e.name, "");
        assert!(e.labels.is_empty());
        assert_eq!(e.replicas, 0);
        assert_eq!(e.image, "");
        assert_eq!(e.kind, "Deployment");
        assert_eq!(e.metadata["creationTimestamp"], "");
    }

    #[test]
    fn decode_rejects_broken_structure() {
        assert!(matches!(decode("Deployment", &json!("nope")), Err(Error::Conversion(_))));
        assert!(matches!(decode("Deployment", &json!({ "metadata": 5 })), Err(Error::Conversion(_))));
    }

    #[test]
    fn decode_reads_server_fields() {
        let obj = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "labels": { "app": "web", "ignored": 1 },
                "annotations": { "a": "b" },
                "ownerReferences": [ { "kind": "Thing", "name": "owner" } ],
                "creationTimestamp": "2024-01-01T00:00:00Z"
            },
            "spec": { "replicas": 2 },
            "status": { "readyReplicas": 2 }
        });
        let e = decode("Deployment", &obj).unwrap();
        assert_eq!(e.labels.len(), 1);
        assert_eq!(e.replicas, 2);
        assert_eq!(e.api_versions, vec!["apps/v1".to_string()]);
        assert_eq!(e.status["readyReplicas"], 2);
        assert_eq!(e.metadata["annotations"]["a"], "b");
        assert_eq!(e.metadata["ownerReferences"][0]["name"], "owner");
        assert_eq!(e.metadata["creationTimestamp"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn cronjob_image_is_not_recovered() {
        let e = WorkloadEntity::new("CronJob", "tick").with_image("busybox");
        let obj = encode(&GroupVersion::new("batch", "v1"), "CronJob", &e);
        assert_eq!(decode("CronJob", &obj).unwrap().image, "");
        assert!(nested(&obj, CONTAINERS_PATH).is_none());

        let job = encode(&GroupVersion::new("batch", "v1"), "Job", &e.clone().with_spec_patch(JsonMap::new()));
        assert_eq!(decode("Job", &job).unwrap().image, "busybox");
    }

    #[test]
    fn merge_desired_keeps_other_fields() {
        let mut existing = json!({
            "metadata": { "name": "web", "resourceVersion": "9", "labels": { "old": "x" } },
            "spec": { "replicas": 1 },
            "status": { "readyReplicas": 1 }
        });
        let desired = encode(&apps_v1(), "Deployment", &web());
        merge_desired(&mut existing, &desired).unwrap();
        assert_eq!(existing["metadata"]["resourceVersion"], "9");
        assert_eq!(existing["metadata"]["labels"], json!({ "app": "web" }));
        assert_eq!(existing["spec"]["replicas"], 3);
        assert_eq!(existing["status"]["readyReplicas"], 1);
    }
}
