//! Local registry: flat postings index over the manifests of a package.

use std::sync::Arc;

use kubelint_core::{K8sManifest, ManifestPackage};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{RegistryFilter, RegistryQueryExecutor};

/// In-RAM index keyed by kind, namespace, name and `label=value`.
///
/// Postings hold ascending document indices so intersections stay linear and
/// results come back in load order.
#[derive(Default)]
pub struct LocalRegistry {
    docs: Vec<Arc<K8sManifest>>,
    kind_post: FxHashMap<String, Vec<usize>>,
    ns_post: FxHashMap<String, Vec<usize>>,
    name_post: FxHashMap<String, Vec<usize>>,
    label_post: FxHashMap<String, Vec<usize>>,
}

impl LocalRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn from_package(pkg: &ManifestPackage) -> Self {
        Self::from_manifests(pkg.manifests())
    }

    pub fn from_manifests(manifests: impl IntoIterator<Item = Arc<K8sManifest>>) -> Self {
        let mut reg = Self::new();
        for m in manifests {
            reg.add(m);
        }
        metrics::gauge!("registry_manifests", reg.docs.len() as f64);
        debug!(count = reg.docs.len(), "local registry built");
        reg
    }

    pub fn add(&mut self, m: Arc<K8sManifest>) {
        let di = self.docs.len();
        let id = m.id();
        self.kind_post.entry(id.kind.clone()).or_default().push(di);
        if let Some(ns) = id.namespace.as_deref() {
            self.ns_post.entry(ns.to_string()).or_default().push(di);
        }
        if let Some(name) = id.name.as_deref() {
            self.name_post.entry(name.to_string()).or_default().push(di);
        }
        for (k, v) in m.labels().iter() {
            self.label_post.entry(format!("{}={}", k, v)).or_default().push(di);
        }
        self.docs.push(m);
    }

    pub fn len(&self) -> usize { self.docs.len() }
    pub fn is_empty(&self) -> bool { self.docs.is_empty() }
    pub fn manifests(&self) -> &[Arc<K8sManifest>] { &self.docs }

    fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
        let mut i = 0usize;
        let mut j = 0usize;
        let mut out = Vec::new();
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => { out.push(a[i]); i += 1; j += 1; }
            }
        }
        out
    }

    fn union_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
        let mut out = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0usize, 0usize);
        while i < a.len() || j < b.len() {
            match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) if x == y => { out.push(*x); i += 1; j += 1; }
                (Some(x), Some(y)) if x < y => { out.push(*x); i += 1; }
                (Some(_), Some(y)) => { out.push(*y); j += 1; }
                (Some(x), None) => { out.push(*x); i += 1; }
                (None, Some(y)) => { out.push(*y); j += 1; }
                (None, None) => break,
            }
        }
        out
    }

    fn postings(map: &FxHashMap<String, Vec<usize>>, key: &str) -> Vec<usize> {
        map.get(key).cloned().unwrap_or_default()
    }

    fn candidates(&self, f: &RegistryFilter) -> Vec<usize> {
        let mut candidates: Vec<usize> = match f.kind.as_deref() {
            Some(kind) => Self::postings(&self.kind_post, kind),
            None => (0..self.docs.len()).collect(),
        };
        if let Some(ns) = f.namespace.as_deref() {
            candidates = Self::intersect_sorted(&candidates, &Self::postings(&self.ns_post, ns));
        }
        if !f.name_filters.is_empty() {
            let mut names: Vec<usize> = Vec::new();
            for n in f.name_filters.iter() {
                names = Self::union_sorted(&names, &Self::postings(&self.name_post, n));
            }
            candidates = Self::intersect_sorted(&candidates, &names);
        }
        if !f.label_filters.is_empty() {
            let mut any: Vec<usize> = Vec::new();
            for lf in f.label_filters.iter() {
                let mut all = candidates.clone();
                for (k, v) in lf.iter() {
                    all = Self::intersect_sorted(&all, &Self::postings(&self.label_post, &format!("{}={}", k, v)));
                    if all.is_empty() { break; }
                }
                any = Self::union_sorted(&any, &all);
            }
            candidates = any;
        }
        candidates
    }
}

impl RegistryQueryExecutor for LocalRegistry {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> {
        self.candidates(filter)
            .into_iter()
            .map(|i| &self.docs[i])
            // group/version are not indexed; check them on the narrowed set
            .filter(|m| {
                let id = m.id();
                filter.api_name.as_deref().map_or(true, |a| id.api == a)
                    && filter.version.as_deref().map_or(true, |v| id.version == v)
            })
            .cloned()
            .collect()
    }

    fn describe(&self) -> String { format!("local({} manifests)", self.docs.len()) }
}
