//! Query Spec nodes: what to fetch, never how.
//!
//! Nodes are immutable once built; every builder call produces a new node.
//! The "plain" vs "bound to one namespace" distinction is not part of the
//! node, it is the [`QueryScopeLimiter`] passed at execution time.

use std::rc::Rc;

use kubelint_core::{split_api_version, K8sManifest};
use kubelint_registry::{LabelFilter, RegistryFilter};
use kubelint_script::Value;
use serde_json::Value as Json;

use crate::{QueryError, QueryScopeLimiter};

/// Maps one manifest to synthetic objects (1:1 for `Transform`, 1:N for `TransformMany`).
#[derive(Debug, Clone)]
pub enum Mapper {
    /// Script function called with the item; returns an object (or an array of them).
    Script(Value),
    Builtin(fn(&K8sManifest) -> Vec<Json>),
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Script(Value),
    Builtin(fn(&K8sManifest) -> bool),
}

/// Kind/namespace/name/label selection over a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct K8sQuery {
    pub api_name: Option<String>,
    pub version: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub name_filters: Vec<String>,
    pub label_filters: Vec<LabelFilter>,
}

impl K8sQuery {
    /// `apps/v1` selects group and version; `v1` the core group.
    pub fn api_version(api_version: &str) -> Self {
        let (api, version) = split_api_version(api_version);
        Self { api_name: Some(api), version: Some(version), ..Self::default() }
    }

    /// Group only, any version.
    pub fn api(api_name: &str) -> Self {
        Self { api_name: Some(api_name.to_string()), ..Self::default() }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    pub fn all_namespaces(mut self) -> Self {
        self.all_namespaces = true;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name_filters.push(name.to_string());
        self
    }

    /// Adds one alternative: the item matches if ANY alternative matches completely.
    pub fn labels(mut self, labels: LabelFilter) -> Self {
        self.label_filters.push(labels);
        self
    }

    /// Registry filter for one execution.
    ///
    /// Unless all namespaces were requested, a limiter namespace replaces the
    /// query's own namespace.
    pub fn to_filter(&self, limiter: &QueryScopeLimiter) -> Result<RegistryFilter, QueryError> {
        let kind = self.kind.clone().ok_or(QueryError::KindNotSet)?;
        let namespace = if self.all_namespaces {
            None
        } else {
            limiter.namespace.clone().or_else(|| self.namespace.clone())
        };
        Ok(RegistryFilter {
            api_name: self.api_name.clone(),
            version: self.version.clone(),
            kind: Some(kind),
            namespace,
            name_filters: self.name_filters.clone(),
            label_filters: self.label_filters.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    K8s(K8sQuery),
    Union(Vec<Rc<QueryNode>>),
    Transform { inner: Rc<QueryNode>, mapper: Option<Mapper> },
    TransformMany { inner: Rc<QueryNode>, mapper: Option<Mapper> },
    Filter { inner: Rc<QueryNode>, predicate: Option<Predicate> },
    First(Vec<Rc<QueryNode>>),
    /// Script callback building the result procedurally.
    Manual(Value),
    Shortcut { name: String, args: Vec<Value> },
}

impl QueryNode {
    pub fn tag(&self) -> &'static str {
        match self {
            QueryNode::K8s(_) => "K8s",
            QueryNode::Union(_) => "Union",
            QueryNode::Transform { .. } => "Transform",
            QueryNode::TransformMany { .. } => "TransformMany",
            QueryNode::Filter { .. } => "Filter",
            QueryNode::First(_) => "First",
            QueryNode::Manual(_) => "Manual",
            QueryNode::Shortcut { .. } => "Shortcut",
        }
    }

    pub fn transform(inner: QueryNode, f: fn(&K8sManifest) -> Vec<Json>) -> Self {
        QueryNode::Transform { inner: Rc::new(inner), mapper: Some(Mapper::Builtin(f)) }
    }

    pub fn transform_many(inner: QueryNode, f: fn(&K8sManifest) -> Vec<Json>) -> Self {
        QueryNode::TransformMany { inner: Rc::new(inner), mapper: Some(Mapper::Builtin(f)) }
    }

    pub fn filter(inner: QueryNode, f: fn(&K8sManifest) -> bool) -> Self {
        QueryNode::Filter { inner: Rc::new(inner), predicate: Some(Predicate::Builtin(f)) }
    }

    pub fn union(nodes: impl IntoIterator<Item = QueryNode>) -> Self {
        QueryNode::Union(nodes.into_iter().map(Rc::new).collect())
    }

    pub fn first(nodes: impl IntoIterator<Item = QueryNode>) -> Self {
        QueryNode::First(nodes.into_iter().map(Rc::new).collect())
    }

    pub fn shortcut(name: &str, args: Vec<Value>) -> Self {
        QueryNode::Shortcut { name: name.to_string(), args }
    }
}

impl From<K8sQuery> for QueryNode {
    fn from(q: K8sQuery) -> Self {
        QueryNode::K8s(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_namespace_wins_unless_all_namespaces() {
        let q = K8sQuery::api_version("apps/v1").kind("Deployment").namespace("own");
        let limiter = QueryScopeLimiter::namespace("ns-a");
        assert_eq!(q.to_filter(&limiter).unwrap().namespace.as_deref(), Some("ns-a"));
        assert_eq!(q.to_filter(&QueryScopeLimiter::default()).unwrap().namespace.as_deref(), Some("own"));
        assert_eq!(q.clone().all_namespaces().to_filter(&limiter).unwrap().namespace, None);
    }

    #[test]
    fn kind_is_required() {
        assert_eq!(K8sQuery::api("apps").to_filter(&QueryScopeLimiter::default()), Err(QueryError::KindNotSet));
    }

    #[test]
    fn core_group_api_version() {
        let q = K8sQuery::api_version("v1");
        assert_eq!(q.api_name.as_deref(), Some(""));
        assert_eq!(q.version.as_deref(), Some("v1"));
    }
}
