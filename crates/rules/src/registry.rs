//! Rule manifests resolved into runnable rule instances.
//!
//! Processing order matters: libraries first (their files become cluster
//! rules), then cluster rules, then namespaced rules, then applicators, which
//! bind to cluster rules that must already be resolved.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use kubelint_core::{K8sManifest, ManifestPackage};
use kubelint_registry::{RegistryFilter, RegistryQueryExecutor};
use kubelint_script::ScriptLimits;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compiler::RuleCompiler;
use crate::config::EngineConfig;
use crate::error::RuleErrorSource;
use crate::library::{load_libraries, RuleSourceLoader};
use crate::result::SkippedRule;
use crate::spec::{merge_values, parse_spec, ClusterRuleSpec, RuleApplicatorSpec, RuleScripts, RuleSpec, RuleValues, RULES_API_GROUP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleKind {
    ClusterRule,
    Rule,
    RuleApplicator,
    Library,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ClusterRule => "ClusterRule",
            RuleKind::Rule => "Rule",
            RuleKind::RuleApplicator => "RuleApplicator",
            RuleKind::Library => "Library",
        }
    }

    fn filter(&self) -> RegistryFilter {
        RegistryFilter::kind(RULES_API_GROUP, self.as_str())
    }
}

/// One application of a compiled rule: a namespace (or the whole cluster) plus resolved values.
#[derive(Debug, Clone)]
pub struct RuleInstance {
    pub kind: RuleKind,
    pub name: String,
    /// `None` runs the target cluster-wide.
    pub namespace: Option<String>,
    pub values: RuleValues,
    /// The manifest that produced this instance; compile failures are reported on it.
    pub manifest: Arc<K8sManifest>,
    pub compiler: Rc<RuleCompiler>,
}

/// A resolved ClusterRule, kept for applicator lookup.
#[derive(Debug)]
pub struct ClusterRuleEntry {
    pub name: String,
    pub manifest: Arc<K8sManifest>,
    pub disabled: bool,
    pub clustered: bool,
    pub use_applicator: bool,
    pub only_selected_namespaces: bool,
    /// Declared per-namespace value overrides.
    pub namespaces: IndexMap<String, RuleValues>,
    pub values: RuleValues,
    /// `None` when disabled; disabled rules are never compiled.
    pub compiler: Option<Rc<RuleCompiler>>,
    instances: usize,
}

impl ClusterRuleEntry {
    fn new(name: String, manifest: Arc<K8sManifest>, spec: &ClusterRuleSpec, compiler: Option<Rc<RuleCompiler>>) -> Self {
        let app = &spec.application;
        let clustered = app.clustered;
        Self {
            name,
            manifest,
            disabled: spec.disabled,
            clustered,
            use_applicator: app.use_applicator && !clustered,
            only_selected_namespaces: app.only_selected_namespaces && !clustered,
            namespaces: app.namespaces.iter().map(|ns| (ns.name.clone(), ns.values.clone())).collect(),
            values: spec.values.clone(),
            compiler,
            instances: 0,
        }
    }

    /// Number of instances created from this rule, directly or through applicators.
    pub fn instances(&self) -> usize {
        self.instances
    }
}

#[derive(Debug, Default)]
pub struct RuleRegistry {
    cluster_rules: IndexMap<String, ClusterRuleEntry>,
    instances: Vec<RuleInstance>,
    skipped: Vec<SkippedRule>,
}

impl RuleRegistry {
    /// Load and resolve every rule manifest visible through `registry`.
    pub async fn load(
        registry: &dyn RegistryQueryExecutor,
        package: &ManifestPackage,
        loader: &dyn RuleSourceLoader,
        config: &EngineConfig,
    ) -> Self {
        let libraries = registry.query(&RuleKind::Library.filter());
        let (library_rules, library_skips) =
            load_libraries(&libraries, package, loader, config.library_concurrency).await;

        let mut namespaces = package.namespaces();
        for ns in registry.query(&RegistryFilter::kind("", "Namespace")) {
            if let Some(name) = ns.name() {
                namespaces.insert(name.to_string());
            }
        }

        let mut out = Self { skipped: library_skips, ..Self::default() };
        let limits = config.script_limits();
        let cluster_rules = registry.query(&RuleKind::ClusterRule.filter()).into_iter().chain(library_rules);
        for m in cluster_rules {
            out.add_cluster_rule(m, &namespaces, limits);
        }
        for m in registry.query(&RuleKind::Rule.filter()) {
            out.add_rule(m, limits);
        }
        for m in registry.query(&RuleKind::RuleApplicator.filter()) {
            out.add_applicator(m);
        }
        info!(
            cluster_rules = out.cluster_rules.len(),
            instances = out.instances.len(),
            skipped = out.skipped.len(),
            "rules resolved"
        );
        out
    }

    pub fn instances(&self) -> &[RuleInstance] {
        &self.instances
    }

    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    pub fn cluster_rule(&self, name: &str) -> Option<&ClusterRuleEntry> {
        self.cluster_rules.get(name)
    }

    pub fn cluster_rules(&self) -> impl Iterator<Item = &ClusterRuleEntry> {
        self.cluster_rules.values()
    }

    fn skip(&mut self, kind: RuleKind, m: &K8sManifest, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(kind = kind.as_str(), name = ?m.name(), ns = ?m.namespace(), %reason, "rule skipped");
        self.skipped.push(SkippedRule {
            kind,
            name: m.name().map(str::to_string),
            namespace: m.namespace().map(str::to_string),
            reason,
        });
    }

    fn add_cluster_rule(&mut self, m: Arc<K8sManifest>, namespaces: &BTreeSet<String>, limits: ScriptLimits) {
        let kind = RuleKind::ClusterRule;
        let Some(name) = m.name().map(str::to_string) else {
            return self.skip(kind, &m, "name not set");
        };
        if self.cluster_rules.contains_key(&name) {
            return self.skip(kind, &m, "duplicate ClusterRule name");
        }
        let mut entry = match parse_spec::<ClusterRuleSpec>(m.config()) {
            Ok(spec) => {
                let compiler = (!spec.disabled)
                    .then(|| Rc::new(RuleCompiler::compile(&name, &RuleScripts::from(&spec), limits)));
                ClusterRuleEntry::new(name.clone(), Arc::clone(&m), &spec, compiler)
            }
            Err(err) => {
                let compiler = RuleCompiler::invalid(RuleErrorSource::Target, format!("invalid rule spec: {err}"));
                ClusterRuleEntry::new(name.clone(), Arc::clone(&m), &ClusterRuleSpec::default(), Some(Rc::new(compiler)))
            }
        };
        if entry.disabled {
            self.skip(kind, &m, "disabled");
        }
        let expand = match (&entry.compiler, entry.use_applicator) {
            (Some(compiler), false) => Some(Rc::clone(compiler)),
            _ => None,
        };
        let mut created = 0;
        if let Some(compiler) = expand {
            let targets: Vec<Option<String>> = if entry.clustered {
                vec![None]
            } else if entry.only_selected_namespaces {
                entry.namespaces.keys().cloned().map(Some).collect()
            } else {
                namespaces.iter().cloned().map(Some).collect()
            };
            for ns in targets {
                let overrides = ns.as_ref().and_then(|ns| entry.namespaces.get(ns));
                let values = merge_values(overrides.into_iter().chain(Some(&entry.values)));
                self.instances.push(RuleInstance {
                    kind,
                    name: name.clone(),
                    namespace: ns,
                    values,
                    manifest: Arc::clone(&m),
                    compiler: Rc::clone(&compiler),
                });
                created += 1;
            }
        }
        debug!(rule = %name, instances = created, use_applicator = entry.use_applicator, "cluster rule resolved");
        entry.instances = created;
        self.cluster_rules.insert(name, entry);
    }

    fn add_rule(&mut self, m: Arc<K8sManifest>, limits: ScriptLimits) {
        let kind = RuleKind::Rule;
        let Some(name) = m.name().map(str::to_string) else {
            return self.skip(kind, &m, "name not set");
        };
        let Some(namespace) = m.namespace().map(str::to_string) else {
            return self.skip(kind, &m, "namespace not set");
        };
        let (compiler, values) = match parse_spec::<RuleSpec>(m.config()) {
            Ok(spec) if spec.disabled => return self.skip(kind, &m, "disabled"),
            Ok(spec) => (RuleCompiler::compile(&name, &RuleScripts::from(&spec), limits), spec.values),
            Err(err) => (RuleCompiler::invalid(RuleErrorSource::Target, format!("invalid rule spec: {err}")), RuleValues::new()),
        };
        debug!(rule = %name, ns = %namespace, "rule resolved");
        self.instances.push(RuleInstance {
            kind,
            name,
            namespace: Some(namespace),
            values,
            manifest: m,
            compiler: Rc::new(compiler),
        });
    }

    fn add_applicator(&mut self, m: Arc<K8sManifest>) {
        let kind = RuleKind::RuleApplicator;
        let Some(name) = m.name().map(str::to_string) else {
            return self.skip(kind, &m, "name not set");
        };
        let Some(namespace) = m.namespace().map(str::to_string) else {
            return self.skip(kind, &m, "namespace not set");
        };
        let spec = match parse_spec::<RuleApplicatorSpec>(m.config()) {
            Ok(spec) if spec.disabled => return self.skip(kind, &m, "disabled"),
            Ok(spec) => spec,
            Err(err) => return self.skip(kind, &m, format!("invalid applicator spec: {err}")),
        };
        let target = spec.cluster_rule_ref.name.as_str();
        let Some(cluster) = self.cluster_rules.get_mut(target) else {
            return self.skip(kind, &m, format!("ClusterRule {target} not found"));
        };
        let Some(compiler) = cluster.compiler.as_ref().map(Rc::clone) else {
            return self.skip(kind, &m, format!("ClusterRule {target} is disabled"));
        };
        if !cluster.use_applicator {
            return self.skip(kind, &m, format!("ClusterRule {target} does not use applicators"));
        }
        if cluster.only_selected_namespaces && !cluster.namespaces.contains_key(&namespace) {
            debug!(applicator = %name, ns = %namespace, rule = %target, "namespace not selected by cluster rule");
            return self.skip(kind, &m, format!("namespace {namespace} not selected by ClusterRule {target}"));
        }
        let values = merge_values(
            Some(&spec.values).into_iter().chain(cluster.namespaces.get(&namespace)).chain(Some(&cluster.values)),
        );
        cluster.instances += 1;
        debug!(applicator = %name, ns = %namespace, rule = %target, "applicator resolved");
        self.instances.push(RuleInstance {
            kind,
            name,
            namespace: Some(namespace),
            values,
            manifest: m,
            compiler,
        });
    }
}
