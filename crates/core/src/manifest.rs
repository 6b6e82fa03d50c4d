//! Manifests and the sources they were loaded from.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;

use crate::{K8sObjectId, ManifestError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Web,
    Stream,
    K8s,
    Helm,
    Kustomize,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Web => "web",
            SourceKind::Stream => "stream",
            SourceKind::K8s => "k8s",
            SourceKind::Helm => "helm",
            SourceKind::Kustomize => "kustomize",
        }
    }
}

/// Serializable `(kind, path)` view of a [`ManifestSource`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInfo {
    pub kind: SourceKind,
    pub path: String,
}

/// One input artifact. Owns its manifests and, for preprocessed inputs, derived child sources.
#[derive(Debug)]
pub struct ManifestSource {
    kind: SourceKind,
    path: String,
    parent: Option<Weak<ManifestSource>>,
    manifests: RwLock<Vec<Arc<K8sManifest>>>,
    children: RwLock<Vec<Arc<ManifestSource>>>,
}

impl ManifestSource {
    pub fn new(kind: SourceKind, path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { kind, path: path.into(), parent: None, manifests: RwLock::default(), children: RwLock::default() })
    }

    /// Create a derived source (e.g. rendered Helm output) owned by `parent`.
    pub fn new_child(parent: &Arc<ManifestSource>, kind: SourceKind, path: impl Into<String>) -> Arc<Self> {
        let child = Arc::new(Self {
            kind,
            path: path.into(),
            parent: Some(Arc::downgrade(parent)),
            manifests: RwLock::default(),
            children: RwLock::default(),
        });
        write(&parent.children).push(Arc::clone(&child));
        child
    }

    pub fn kind(&self) -> SourceKind { self.kind }
    pub fn path(&self) -> &str { &self.path }
    pub fn info(&self) -> SourceInfo { SourceInfo { kind: self.kind, path: self.path.clone() } }
    pub fn parent(&self) -> Option<Arc<ManifestSource>> { self.parent.as_ref().and_then(|p| p.upgrade()) }
    pub fn manifests(&self) -> Vec<Arc<K8sManifest>> { read(&self.manifests).clone() }
    pub fn children(&self) -> Vec<Arc<ManifestSource>> { read(&self.children).clone() }

    pub(crate) fn attach(&self, manifest: Arc<K8sManifest>) { write(&self.manifests).push(manifest); }
}

/// Rule-engine outcome recorded on a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleOutcome {
    pub processed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Mutable lint / rule state of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestState {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rules: RuleOutcome,
    /// Set once "failed to compile" has been reported against this manifest.
    pub errors_with_rule: bool,
}

impl Default for ManifestState {
    fn default() -> Self {
        Self { success: true, errors: Vec::new(), warnings: Vec::new(), rules: RuleOutcome::default(), errors_with_rule: false }
    }
}

/// A typed Kubernetes-like object: parsed identity, raw config and source provenance.
#[derive(Debug)]
pub struct K8sManifest {
    id: K8sObjectId,
    config: Json,
    source: Weak<ManifestSource>,
    labels: SmallVec<[(String, String); 8]>,
    annotations: SmallVec<[(String, String); 4]>,
    state: RwLock<ManifestState>,
}

impl K8sManifest {
    /// Build a manifest that is not attached to its source (used for synthetic query results).
    pub fn new(config: Json, source: Weak<ManifestSource>) -> Result<Self, ManifestError> {
        let id = K8sObjectId::from_config(&config)?;
        let labels = string_pairs(config.pointer("/metadata/labels")).into_iter().collect();
        let annotations = string_pairs(config.pointer("/metadata/annotations")).into_iter().collect();
        Ok(Self { id, config, source, labels, annotations, state: RwLock::default() })
    }

    /// Build a manifest and register it with `source`.
    pub fn attached(config: Json, source: &Arc<ManifestSource>) -> Result<Arc<Self>, ManifestError> {
        let manifest = Arc::new(Self::new(config, Arc::downgrade(source))?);
        source.attach(Arc::clone(&manifest));
        Ok(manifest)
    }

    pub fn id(&self) -> &K8sObjectId { &self.id }
    pub fn config(&self) -> &Json { &self.config }
    pub fn source(&self) -> Option<Arc<ManifestSource>> { self.source.upgrade() }
    pub fn source_ref(&self) -> Weak<ManifestSource> { self.source.clone() }
    pub fn source_info(&self) -> Option<SourceInfo> { self.source().map(|s| s.info()) }
    pub fn namespace(&self) -> Option<&str> { self.id.namespace.as_deref() }
    pub fn name(&self) -> Option<&str> { self.id.name.as_deref() }
    pub fn labels(&self) -> &[(String, String)] { &self.labels }
    pub fn annotations(&self) -> &[(String, String)] { &self.annotations }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn state(&self) -> ManifestState { read(&self.state).clone() }
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, ManifestState> { write(&self.state) }
    pub fn state_ref(&self) -> RwLockReadGuard<'_, ManifestState> { read(&self.state) }
}

fn string_pairs(v: Option<&Json>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Some(map) = v.and_then(|v| v.as_object()) {
        for (k, v) in map.iter() {
            let val = match v {
                Json::String(s) => s.clone(),
                Json::Null => String::new(),
                other => other.to_string(),
            };
            out.push((k.clone(), val));
        }
    }
    out
}

// Poisoning only happens if a writer panicked; the state is plain data, keep going.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
