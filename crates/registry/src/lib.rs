//! kubelint registries: the queryable views of manifests the rule engine runs against.
//!
//! - [`LocalRegistry`]: in-RAM postings index over a [`ManifestPackage`]
//! - [`CachedRegistry`]: memoizes query results keyed by the stable filter key
//! - [`CombinedRegistry`]: local + remote view, de-duplicated by identity (local wins)

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use kubelint_core::K8sManifest;
use serde::{Deserialize, Serialize};

mod cached;
mod combined;
mod local;

pub use cached::CachedRegistry;
pub use combined::CombinedRegistry;
pub use local::LocalRegistry;

/// Label filter: every key/value must match.
pub type LabelFilter = BTreeMap<String, String>;

/// Filter accepted by every registry.
///
/// `api_name` is the API group (`""` = core group, `None` = any group).
/// `name_filters` is an OR-list of exact names; `label_filters` is an OR-list
/// of AND-maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_filters: Vec<LabelFilter>,
}

impl RegistryFilter {
    pub fn kind(api_name: &str, kind: &str) -> Self {
        Self { api_name: Some(api_name.to_string()), kind: Some(kind.to_string()), ..Self::default() }
    }

    pub fn in_namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    /// Deterministic key (field order is fixed, label maps are sorted).
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Full predicate; used by registries that cannot index (remote lists, combined views).
    pub fn matches(&self, m: &K8sManifest) -> bool {
        let id = m.id();
        if let Some(api) = self.api_name.as_deref() {
            if id.api != api { return false; }
        }
        if let Some(v) = self.version.as_deref() {
            if id.version != v { return false; }
        }
        if let Some(k) = self.kind.as_deref() {
            if id.kind != k { return false; }
        }
        if let Some(ns) = self.namespace.as_deref() {
            if id.namespace.as_deref() != Some(ns) { return false; }
        }
        if !self.name_filters.is_empty() {
            let name = id.name.as_deref().unwrap_or("");
            if !self.name_filters.iter().any(|n| n == name) { return false; }
        }
        self.matches_labels(m)
    }

    /// OR over filters, AND within one filter. No filters matches everything.
    pub fn matches_labels(&self, m: &K8sManifest) -> bool {
        if self.label_filters.is_empty() { return true; }
        self.label_filters
            .iter()
            .any(|lf| lf.iter().all(|(k, v)| m.label(k) == Some(v.as_str())))
    }
}

/// Anything manifests can be queried from: a local snapshot, a live cluster, or a mix.
pub trait RegistryQueryExecutor: Send + Sync {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>>;

    /// Short description for logs.
    fn describe(&self) -> String { "registry".to_string() }
}

impl<T: RegistryQueryExecutor + ?Sized> RegistryQueryExecutor for Arc<T> {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> { (**self).query(filter) }
    fn describe(&self) -> String { (**self).describe() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_order_independent_for_labels() {
        let mut a = LabelFilter::new();
        a.insert("b".into(), "2".into());
        a.insert("a".into(), "1".into());
        let mut b = LabelFilter::new();
        b.insert("a".into(), "1".into());
        b.insert("b".into(), "2".into());
        let fa = RegistryFilter { label_filters: vec![a], ..RegistryFilter::kind("", "Pod") };
        let fb = RegistryFilter { label_filters: vec![b], ..RegistryFilter::kind("", "Pod") };
        assert_eq!(fa.cache_key(), fb.cache_key());
        assert_ne!(fa.cache_key(), RegistryFilter::kind("", "Pod").cache_key());
    }
}
