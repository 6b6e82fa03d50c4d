//! Library manifests: indirection from a catalog to rule files.
//!
//! Every referenced file is loaded through a [`RuleSourceLoader`] (bounded
//! concurrency) and its documents join the package as ClusterRule manifests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use kubelint_core::{K8sManifest, ManifestPackage, SourceKind};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::registry::RuleKind;
use crate::result::SkippedRule;
use crate::spec::{parse_spec, LibraryRuleRef, LibrarySpec, RULES_API_VERSION};

/// Fetches the documents of one rule file.
#[async_trait::async_trait]
pub trait RuleSourceLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<Json>, LoadError>;
}

/// Reads YAML (multi-document) rule files from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRuleSourceLoader;

impl FsRuleSourceLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl RuleSourceLoader for FsRuleSourceLoader {
    async fn load(&self, path: &str) -> Result<Vec<Json>, LoadError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LoadError::Io { path: path.to_string(), source })?;
        parse_yaml_documents(&text, path)
    }
}

/// Fixed set of in-memory rule files, keyed by resolved path.
#[derive(Debug, Default, Clone)]
pub struct MemoryRuleSourceLoader {
    files: HashMap<String, Vec<Json>>,
}

impl MemoryRuleSourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, docs: Vec<Json>) -> Self {
        self.files.insert(path.into(), docs);
        self
    }
}

#[async_trait::async_trait]
impl RuleSourceLoader for MemoryRuleSourceLoader {
    async fn load(&self, path: &str) -> Result<Vec<Json>, LoadError> {
        self.files.get(path).cloned().ok_or_else(|| LoadError::NotFound(path.to_string()))
    }
}

/// Split a YAML stream into JSON documents; empty documents are dropped.
pub fn parse_yaml_documents(text: &str, path: &str) -> Result<Vec<Json>, LoadError> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Json::deserialize(doc).map_err(|source| LoadError::Yaml { path: path.to_string(), source })?;
        if !value.is_null() {
            out.push(value);
        }
    }
    Ok(out)
}

/// Rule paths are relative to the directory of the library's own source.
pub fn resolve_path(library_path: &str, rule_path: &str) -> String {
    if library_path.is_empty() || Path::new(rule_path).is_absolute() {
        return rule_path.to_string();
    }
    match Path::new(library_path).parent() {
        Some(dir) => dir.join(rule_path).to_string_lossy().into_owned(),
        None => rule_path.to_string(),
    }
}

/// A bare spec document becomes a ClusterRule named after its library entry.
fn as_cluster_rule(mut doc: Json, entry: &LibraryRuleRef) -> Result<Json, &'static str> {
    let kind = doc.get("kind").and_then(Json::as_str).map(str::to_string);
    match kind.as_deref() {
        None => Ok(json!({
            "apiVersion": RULES_API_VERSION,
            "kind": "ClusterRule",
            "metadata": { "name": entry.name },
            "spec": doc,
        })),
        Some("ClusterRule") => {
            let Json::Object(fields) = &mut doc else {
                return Err("not a ClusterRule document");
            };
            let metadata = fields.entry("metadata").or_insert_with(|| json!({}));
            let Json::Object(metadata) = metadata else {
                return Err("metadata is not an object");
            };
            if !metadata.get("name").is_some_and(Json::is_string) {
                metadata.insert("name".to_string(), json!(entry.name));
            }
            Ok(doc)
        }
        Some(_) => Err("not a ClusterRule document"),
    }
}

fn skipped(entry_name: Option<&str>, namespace: Option<&str>, reason: String) -> SkippedRule {
    SkippedRule {
        kind: RuleKind::Library,
        name: entry_name.map(str::to_string),
        namespace: namespace.map(str::to_string),
        reason,
    }
}

/// Load every rule file referenced by `libraries`, at most `concurrency` at a time.
///
/// Returns the loaded ClusterRule manifests in library order plus the
/// references that could not be used.
pub async fn load_libraries(
    libraries: &[Arc<K8sManifest>],
    package: &ManifestPackage,
    loader: &dyn RuleSourceLoader,
    concurrency: usize,
) -> (Vec<Arc<K8sManifest>>, Vec<SkippedRule>) {
    let mut skips = Vec::new();
    let mut refs = Vec::new();
    for library in libraries {
        let spec: LibrarySpec = match parse_spec(library.config()) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(library = ?library.name(), error = %err, "invalid library spec");
                skips.push(skipped(library.name(), library.namespace(), format!("invalid library spec: {err}")));
                continue;
            }
        };
        let base = library.source().map(|s| s.path().to_string()).unwrap_or_default();
        for entry in spec.rules {
            if entry.path.is_empty() {
                skips.push(skipped(Some(&entry.name), library.namespace(), "library rule has no path".to_string()));
                continue;
            }
            let path = resolve_path(&base, &entry.path);
            refs.push((entry, path));
        }
    }
    debug!(libraries = libraries.len(), files = refs.len(), "loading library rules");

    let mut loaded: Vec<_> = stream::iter(refs.into_iter().enumerate())
        .map(|(idx, (entry, path))| async move {
            let docs = loader.load(&path).await;
            (idx, entry, path, docs)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    loaded.sort_by_key(|(idx, ..)| *idx);

    let mut manifests = Vec::new();
    for (_, entry, path, docs) in loaded {
        let docs = match docs {
            Ok(docs) => docs,
            Err(err) => {
                warn!(rule = %entry.name, %path, error = %err, "library rule failed to load");
                skips.push(skipped(Some(&entry.name), None, err.to_string()));
                continue;
            }
        };
        let source = package.add_source(SourceKind::File, path.clone());
        for doc in docs {
            let config = match as_cluster_rule(doc, &entry) {
                Ok(config) => config,
                Err(reason) => {
                    skips.push(skipped(Some(&entry.name), None, format!("{path}: {reason}")));
                    continue;
                }
            };
            match package.add_manifest(&source, config) {
                Ok(m) => manifests.push(m),
                Err(err) => skips.push(skipped(Some(&entry.name), None, format!("{path}: {err}"))),
            }
        }
    }
    (manifests, skips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve_against_the_library_directory() {
        assert_eq!(resolve_path("lib/index.yaml", "rules/a.yaml"), "lib/rules/a.yaml");
        assert_eq!(resolve_path("lib/index.yaml", "/abs/a.yaml"), "/abs/a.yaml");
        assert_eq!(resolve_path("", "a.yaml"), "a.yaml");
    }

    #[test]
    fn yaml_streams_split_into_documents() {
        let docs = parse_yaml_documents("a: 1\n---\nb: [x]\n", "mem").unwrap();
        assert_eq!(docs, vec![json!({ "a": 1 }), json!({ "b": ["x"] })]);
        assert!(matches!(parse_yaml_documents("a: [", "bad.yaml"), Err(LoadError::Yaml { .. })));
    }

    #[test]
    fn bare_specs_are_wrapped() {
        let entry = LibraryRuleRef { name: "no-latest".into(), path: "x.yaml".into(), ..LibraryRuleRef::default() };
        let doc = as_cluster_rule(json!({ "target": "t", "rule": "r" }), &entry).unwrap();
        assert_eq!(doc["kind"], json!("ClusterRule"));
        assert_eq!(doc["metadata"]["name"], json!("no-latest"));
        assert_eq!(doc["spec"]["target"], json!("t"));
        assert_eq!(as_cluster_rule(json!({ "kind": "ConfigMap" }), &entry), Err("not a ClusterRule document"));
    }

    #[test]
    fn cluster_rule_metadata_must_be_an_object() {
        let entry = LibraryRuleRef { name: "named".into(), path: "x.yaml".into(), ..LibraryRuleRef::default() };
        let doc = json!({ "kind": "ClusterRule", "metadata": "oops" });
        assert_eq!(as_cluster_rule(doc, &entry), Err("metadata is not an object"));
        let doc = as_cluster_rule(json!({ "kind": "ClusterRule", "metadata": { "labels": {} } }), &entry).unwrap();
        assert_eq!(doc["metadata"]["name"], json!("named"));
        let doc = as_cluster_rule(json!({ "kind": "ClusterRule" }), &entry).unwrap();
        assert_eq!(doc["metadata"]["name"], json!("named"));
    }
}
