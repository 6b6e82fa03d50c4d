//! The manifest package: every loaded source and manifest of one run.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde_json::Value as Json;
use tracing::debug;

use crate::manifest::{read, write};
use crate::{K8sManifest, ManifestError, ManifestSource, SourceKind};

/// Shared, internally synchronized collection of sources and manifests.
///
/// Manifests are never removed during a run; lint and rule outcomes are
/// recorded on them in place.
#[derive(Debug, Default)]
pub struct ManifestPackage {
    sources: RwLock<Vec<Arc<ManifestSource>>>,
    manifests: RwLock<Vec<Arc<K8sManifest>>>,
}

impl ManifestPackage {
    pub fn new() -> Self { Self::default() }

    pub fn add_source(&self, kind: SourceKind, path: impl Into<String>) -> Arc<ManifestSource> {
        let source = ManifestSource::new(kind, path);
        write(&self.sources).push(Arc::clone(&source));
        source
    }

    pub fn add_manifest(&self, source: &Arc<ManifestSource>, config: Json) -> Result<Arc<K8sManifest>, ManifestError> {
        let manifest = K8sManifest::attached(config, source)?;
        debug!(id = %manifest.id().key(), source = %source.path(), "manifest added");
        write(&self.manifests).push(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Register manifests of a derived source; they count as package manifests too.
    pub fn add_child_source(&self, parent: &Arc<ManifestSource>, kind: SourceKind, path: impl Into<String>) -> Arc<ManifestSource> {
        ManifestSource::new_child(parent, kind, path)
    }

    pub fn sources(&self) -> Vec<Arc<ManifestSource>> { read(&self.sources).clone() }
    pub fn manifests(&self) -> Vec<Arc<K8sManifest>> { read(&self.manifests).clone() }
    pub fn len(&self) -> usize { read(&self.manifests).len() }
    pub fn is_empty(&self) -> bool { read(&self.manifests).is_empty() }

    /// Namespaces of all namespaced manifests plus the names of `v1/Namespace` objects.
    pub fn namespaces(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for m in read(&self.manifests).iter() {
            if let Some(ns) = m.namespace() {
                out.insert(ns.to_string());
            }
            let id = m.id();
            if id.api.is_empty() && id.kind == "Namespace" {
                if let Some(name) = m.name() {
                    out.insert(name.to_string());
                }
            }
        }
        out
    }

    pub fn manifest_error(&self, manifest: &K8sManifest, msg: impl Into<String>) {
        let mut st = manifest.state_mut();
        st.success = false;
        st.errors.push(msg.into());
    }

    pub fn manifest_warning(&self, manifest: &K8sManifest, msg: impl Into<String>) {
        manifest.state_mut().warnings.push(msg.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_include_namespace_objects() {
        let pkg = ManifestPackage::new();
        let src = pkg.add_source(SourceKind::File, "a.yaml");
        pkg.add_manifest(&src, serde_json::json!({
            "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "empty" }
        })).unwrap();
        pkg.add_manifest(&src, serde_json::json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cm", "namespace": "app" }
        })).unwrap();
        let ns: Vec<_> = pkg.namespaces().into_iter().collect();
        assert_eq!(ns, vec!["app".to_string(), "empty".to_string()]);
        assert_eq!(src.manifests().len(), 2);
    }

    #[test]
    fn manifest_error_flips_success() {
        let pkg = ManifestPackage::new();
        let src = pkg.add_source(SourceKind::Stream, "stdin");
        let m = pkg.add_manifest(&src, serde_json::json!({
            "apiVersion": "v1", "kind": "Pod", "metadata": { "name": "p" }
        })).unwrap();
        pkg.manifest_warning(&m, "careful");
        assert!(m.state().success);
        pkg.manifest_error(&m, "bad");
        let st = m.state();
        assert!(!st.success);
        assert_eq!(st.errors, vec!["bad".to_string()]);
        assert_eq!(st.warnings, vec!["careful".to_string()]);
        assert_eq!(m.source_info().unwrap().path, "stdin");
    }
}
