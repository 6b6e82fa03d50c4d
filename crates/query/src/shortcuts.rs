//! Named query macros.
//!
//! Pod-spec shortcuts turn every controller kind into the same `PodSpec`
//! pseudo-resource so one rule can cover Deployments, Jobs and the rest.

use std::fmt;

use indexmap::IndexMap;
use kubelint_core::K8sManifest;
use kubelint_script::Value;
use serde_json::{json, Value as Json};

use crate::node::{K8sQuery, QueryNode};
use crate::QueryError;

pub const SYNTHETIC_API_VERSION: &str = "kubevious.io/v1";

pub type ShortcutFn = fn(&[Value]) -> Result<QueryNode, QueryError>;

#[derive(Clone)]
pub struct ShortcutLibrary {
    entries: IndexMap<&'static str, ShortcutFn>,
}

impl Default for ShortcutLibrary {
    fn default() -> Self {
        let mut lib = Self::empty();
        lib.register("DeploymentPodSpec", |_| Ok(deployment_pod_spec()));
        lib.register("StatefulSetPodSpec", |_| Ok(stateful_set_pod_spec()));
        lib.register("DaemonSetPodSpec", |_| Ok(daemon_set_pod_spec()));
        lib.register("JobPodSpec", |_| Ok(job_pod_spec()));
        lib.register("CronJobPodSpec", |_| Ok(cron_job_pod_spec()));
        lib.register("RolloutPodSpec", |_| Ok(rollout_pod_spec()));
        lib.register("PodSpec", |_| Ok(pod_spec()));
        lib.register("ContainerSpec", |_| Ok(container_spec()));
        lib.register("ContainerSpecs", |_| Ok(container_spec()));
        lib.register("Secret", |args| Ok(secret(&name_arg(args))));
        lib.register("Service", |args| Ok(K8sQuery::api_version("v1").kind("Service").name(&name_arg(args)).into()));
        lib
    }
}

impl ShortcutLibrary {
    pub fn empty() -> Self {
        Self { entries: IndexMap::new() }
    }

    pub fn register(&mut self, name: &'static str, f: ShortcutFn) {
        self.entries.insert(name, f);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn expand(&self, name: &str, args: &[Value]) -> Result<QueryNode, QueryError> {
        let f = self.entries.get(name).ok_or_else(|| QueryError::UnknownShortcut(name.to_string()))?;
        f(args)
    }
}

impl fmt::Debug for ShortcutLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

fn name_arg(args: &[Value]) -> String {
    args.first().filter(|v| !v.is_nullish()).map(Value::to_display).unwrap_or_default()
}

fn deployment_pod_spec() -> QueryNode {
    QueryNode::transform(K8sQuery::api_version("apps/v1").kind("Deployment").into(), template_pod_spec)
}

fn stateful_set_pod_spec() -> QueryNode {
    QueryNode::transform(K8sQuery::api_version("apps/v1").kind("StatefulSet").into(), template_pod_spec)
}

fn daemon_set_pod_spec() -> QueryNode {
    QueryNode::transform(K8sQuery::api_version("apps/v1").kind("DaemonSet").into(), template_pod_spec)
}

/// Jobs created by a CronJob are covered by `CronJobPodSpec`.
fn job_pod_spec() -> QueryNode {
    let standalone = QueryNode::filter(K8sQuery::api_version("batch/v1").kind("Job").into(), has_no_owner);
    QueryNode::transform(standalone, template_pod_spec)
}

fn cron_job_pod_spec() -> QueryNode {
    QueryNode::transform(K8sQuery::api_version("batch/v1").kind("CronJob").into(), cron_job_template_pod_spec)
}

fn rollout_pod_spec() -> QueryNode {
    QueryNode::transform(K8sQuery::api("argoproj.io").kind("Rollout").into(), template_pod_spec)
}

fn pod_spec() -> QueryNode {
    QueryNode::union([
        deployment_pod_spec(),
        stateful_set_pod_spec(),
        daemon_set_pod_spec(),
        job_pod_spec(),
        cron_job_pod_spec(),
        rollout_pod_spec(),
    ])
}

fn container_spec() -> QueryNode {
    QueryNode::transform_many(pod_spec(), containers)
}

/// Secret by name, falling back to a SealedSecret of the same name.
fn secret(name: &str) -> QueryNode {
    QueryNode::first([
        K8sQuery::api_version("v1").kind("Secret").name(name).into(),
        K8sQuery::api("bitnami.com").kind("SealedSecret").name(name).into(),
    ])
}

fn has_no_owner(m: &K8sManifest) -> bool {
    m.config()
        .pointer("/metadata/ownerReferences")
        .and_then(Json::as_array)
        .map_or(true, |refs| refs.is_empty())
}

fn template_pod_spec(m: &K8sManifest) -> Vec<Json> {
    pod_spec_of(m, "/spec/template")
}

fn cron_job_template_pod_spec(m: &K8sManifest) -> Vec<Json> {
    pod_spec_of(m, "/spec/jobTemplate/spec/template")
}

fn pod_spec_of(m: &K8sManifest, template_path: &str) -> Vec<Json> {
    let Some(template) = m.config().pointer(template_path) else {
        return Vec::new();
    };
    let name = format!("{}-{}", m.id().kind, m.name().unwrap_or_default());
    let labels = template.pointer("/metadata/labels").cloned();
    let spec = template.get("spec").cloned().unwrap_or_else(|| json!({}));
    vec![synthetic("PodSpec", &name, m.namespace(), labels, spec)]
}

fn containers(m: &K8sManifest) -> Vec<Json> {
    let podspec = m.name().unwrap_or_default();
    let labels = m.config().pointer("/metadata/labels").cloned();
    let mut out = Vec::new();
    for (field, infix) in [("containers", "Cont"), ("initContainers", "InitCont")] {
        let Some(list) = m.config().pointer(&format!("/spec/{field}")).and_then(Json::as_array) else {
            continue;
        };
        for container in list {
            let cname = container.get("name").and_then(Json::as_str).unwrap_or_default();
            let name = format!("{podspec}-{infix}-{cname}");
            out.push(synthetic("ContainerSpec", &name, m.namespace(), labels.clone(), container.clone()));
        }
    }
    out
}

fn synthetic(kind: &str, name: &str, namespace: Option<&str>, labels: Option<Json>, spec: Json) -> Json {
    let mut metadata = json!({ "name": name });
    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }
    if let Some(labels) = labels {
        metadata["labels"] = labels;
    }
    json!({ "apiVersion": SYNTHETIC_API_VERSION, "kind": kind, "metadata": metadata, "spec": spec })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_shortcuts_are_rejected() {
        let lib = ShortcutLibrary::default();
        assert_eq!(lib.expand("Nope", &[]).unwrap_err(), QueryError::UnknownShortcut("Nope".into()));
        assert!(lib.names().any(|n| n == "PodSpec"));
    }

    #[test]
    fn pod_spec_is_a_union_of_controller_shortcuts() {
        match ShortcutLibrary::default().expand("PodSpec", &[]).unwrap() {
            QueryNode::Union(nodes) => assert_eq!(nodes.len(), 6),
            other => panic!("unexpected {other:?}"),
        }
    }
}
