#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kubelint_core::{K8sManifest, ManifestPackage, SourceKind};
use kubelint_registry::{CachedRegistry, CombinedRegistry, LabelFilter, LocalRegistry, RegistryFilter, RegistryQueryExecutor};

fn obj(api_version: &str, kind: &str, name: &str, ns: Option<&str>, labels: serde_json::Value) -> serde_json::Value {
    let mut meta = serde_json::json!({ "name": name, "labels": labels });
    if let Some(ns) = ns { meta["namespace"] = serde_json::Value::String(ns.to_string()); }
    serde_json::json!({ "apiVersion": api_version, "kind": kind, "metadata": meta })
}

fn package() -> ManifestPackage {
    let pkg = ManifestPackage::new();
    let src = pkg.add_source(SourceKind::File, "fixtures.yaml");
    let add = |v| { pkg.add_manifest(&src, v).unwrap(); };
    add(obj("apps/v1", "Deployment", "web", Some("ns-a"), serde_json::json!({ "a": "1", "b": "2" })));
    add(obj("apps/v1", "Deployment", "api", Some("ns-b"), serde_json::json!({ "a": "1" })));
    add(obj("apps/v1", "Deployment", "db", Some("ns-a"), serde_json::json!({ "c": "3" })));
    add(obj("v1", "ConfigMap", "web", Some("ns-a"), serde_json::json!({})));
    add(obj("v1", "Namespace", "ns-a", None, serde_json::json!({})));
    pkg
}

fn names(items: &[Arc<K8sManifest>]) -> Vec<String> {
    items.iter().map(|m| m.name().unwrap_or("").to_string()).collect()
}

fn labels(pairs: &[(&str, &str)]) -> LabelFilter {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn kind_and_group_filter() {
    let reg = LocalRegistry::from_package(&package());
    assert_eq!(names(&reg.query(&RegistryFilter::kind("apps", "Deployment"))), vec!["web", "api", "db"]);
    assert_eq!(names(&reg.query(&RegistryFilter::kind("", "ConfigMap"))), vec!["web"]);
    assert!(reg.query(&RegistryFilter::kind("", "Deployment")).is_empty());
    let mut wrong_version = RegistryFilter::kind("apps", "Deployment");
    wrong_version.version = Some("v1beta1".into());
    assert!(reg.query(&wrong_version).is_empty());
}

#[test]
fn namespace_and_name_filters() {
    let reg = LocalRegistry::from_package(&package());
    let f = RegistryFilter::kind("apps", "Deployment").in_namespace("ns-a");
    assert_eq!(names(&reg.query(&f)), vec!["web", "db"]);
    let f = RegistryFilter { name_filters: vec!["db".into(), "api".into()], ..RegistryFilter::kind("apps", "Deployment") };
    assert_eq!(names(&reg.query(&f)), vec!["api", "db"]);
}

#[test]
fn label_filters_are_or_of_and() {
    let reg = LocalRegistry::from_package(&package());
    let f = RegistryFilter {
        label_filters: vec![labels(&[("a", "1"), ("b", "2")]), labels(&[("c", "3")])],
        ..RegistryFilter::kind("apps", "Deployment")
    };
    // "api" only has a=1 and must not match
    assert_eq!(names(&reg.query(&f)), vec!["web", "db"]);
    for m in reg.query(&RegistryFilter::kind("apps", "Deployment")) {
        assert_eq!(f.matches(&m), m.name() != Some("api"));
    }
}

struct Counting {
    inner: LocalRegistry,
    calls: AtomicUsize,
}

impl RegistryQueryExecutor for Counting {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(filter)
    }
}

#[test]
fn cached_registry_memoizes_by_filter() {
    let reg = CachedRegistry::new(Counting { inner: LocalRegistry::from_package(&package()), calls: AtomicUsize::new(0) });
    let f = RegistryFilter::kind("apps", "Deployment");
    assert_eq!(reg.query(&f).len(), 3);
    assert_eq!(reg.query(&f.clone()).len(), 3);
    assert_eq!(reg.inner().calls.load(Ordering::SeqCst), 1);
    reg.query(&f.in_namespace("ns-b"));
    assert_eq!(reg.inner().calls.load(Ordering::SeqCst), 2);
    assert_eq!(reg.cached_queries(), 2);
}

#[test]
fn combined_registry_prefers_local() {
    let local_pkg = package();
    let remote_pkg = ManifestPackage::new();
    let src = remote_pkg.add_source(SourceKind::K8s, "cluster");
    remote_pkg.add_manifest(&src, obj("apps/v1", "Deployment", "web", Some("ns-a"), serde_json::json!({}))).unwrap();
    remote_pkg.add_manifest(&src, obj("apps/v1", "Deployment", "live-only", Some("ns-c"), serde_json::json!({}))).unwrap();

    let reg = CombinedRegistry::new(LocalRegistry::from_package(&local_pkg), LocalRegistry::from_package(&remote_pkg));
    let items = reg.query(&RegistryFilter::kind("apps", "Deployment"));
    assert_eq!(names(&items), vec!["web", "api", "db", "live-only"]);
    let web = &items[0];
    assert_eq!(web.source_info().unwrap().kind, SourceKind::File);
}
