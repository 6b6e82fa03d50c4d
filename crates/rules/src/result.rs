//! Structured outcome of a rules run, consumed by the formatting layer.

use std::collections::BTreeMap;

use kubelint_core::{K8sManifest, K8sObjectId, SourceInfo};
use serde::Serialize;

use crate::error::RuleError;
use crate::registry::RuleKind;

/// Manifest reference as shown in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRef {
    pub id: K8sObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

impl ManifestRef {
    pub fn of(m: &K8sManifest) -> Self {
        Self { id: m.id().clone(), source: m.source_info() }
    }

    pub fn key(&self) -> String {
        match &self.source {
            Some(src) => format!("{}@{}", self.id.key(), src.path),
            None => self.id.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestViolation {
    pub manifest: ManifestRef,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub has_errors: bool,
    pub has_warnings: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassedManifest {
    pub manifest: ManifestRef,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
}

/// Outcome of one rule instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub kind: RuleKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub compiled: bool,
    /// Compiled, ran cleanly and found no violations.
    pub pass: bool,
    pub errors: Vec<RuleError>,
    pub violations: Vec<ManifestViolation>,
    pub passed: Vec<PassedManifest>,
}

impl RuleResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_violation_errors(&self) -> bool {
        self.violations.iter().any(|v| v.has_errors)
    }

    pub fn has_violation_warnings(&self) -> bool {
        self.violations.iter().any(|v| v.has_warnings)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub with_errors: usize,
    pub with_warnings: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub rules: Counters,
    pub manifests: Counters,
}

/// A rule manifest that produced no instance, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRule {
    pub kind: RuleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEngineResult {
    /// Every rule compiled and ran without script errors. Violations do not clear it.
    pub success: bool,
    pub rules: Vec<RuleResult>,
    pub counters: EngineCounters,
    pub skipped_rules: Vec<SkippedRule>,
}

impl RuleEngineResult {
    pub fn new(rules: Vec<RuleResult>, skipped_rules: Vec<SkippedRule>) -> Self {
        let success = rules.iter().all(|r| r.compiled && !r.has_errors());
        let counters = EngineCounters { rules: rule_counters(&rules), manifests: manifest_counters(&rules) };
        Self { success, rules, counters, skipped_rules }
    }

    pub fn rule(&self, name: &str) -> impl Iterator<Item = &RuleResult> + '_ {
        let name = name.to_string();
        self.rules.iter().filter(move |r| r.name == name)
    }
}

fn rule_counters(rules: &[RuleResult]) -> Counters {
    let mut c = Counters { total: rules.len(), ..Counters::default() };
    for r in rules {
        if r.pass {
            c.passed += 1;
        } else {
            c.failed += 1;
        }
        if !r.compiled || r.has_errors() || r.has_violation_errors() {
            c.with_errors += 1;
        }
        if r.has_violation_warnings() {
            c.with_warnings += 1;
        }
    }
    c
}

#[derive(Default)]
struct ManifestTally {
    errors: bool,
    warnings: bool,
}

fn manifest_counters(rules: &[RuleResult]) -> Counters {
    let mut seen: BTreeMap<String, ManifestTally> = BTreeMap::new();
    for r in rules {
        for p in &r.passed {
            seen.entry(p.manifest.key()).or_default();
        }
        for v in &r.violations {
            let t = seen.entry(v.manifest.key()).or_default();
            t.errors |= v.has_errors;
            t.warnings |= v.has_warnings;
        }
    }
    let mut c = Counters { total: seen.len(), ..Counters::default() };
    for t in seen.values() {
        if t.errors || t.warnings {
            c.failed += 1;
        } else {
            c.passed += 1;
        }
        c.with_errors += usize::from(t.errors);
        c.with_warnings += usize::from(t.warnings);
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mref(name: &str) -> ManifestRef {
        ManifestRef {
            id: K8sObjectId {
                api_version: "v1".into(),
                api: String::new(),
                version: "v1".into(),
                kind: "ConfigMap".into(),
                namespace: Some("ns".into()),
                name: Some(name.into()),
            },
            source: None,
        }
    }

    fn rule(name: &str, violations: Vec<ManifestViolation>, passed: Vec<&str>) -> RuleResult {
        RuleResult {
            kind: RuleKind::ClusterRule,
            name: name.into(),
            namespace: None,
            compiled: true,
            pass: violations.is_empty(),
            errors: Vec::new(),
            violations,
            passed: passed.into_iter().map(|n| PassedManifest { manifest: mref(n), markers: Vec::new() }).collect(),
        }
    }

    fn violation(name: &str, errors: bool) -> ManifestViolation {
        ManifestViolation {
            manifest: mref(name),
            errors: if errors { vec!["e".into()] } else { Vec::new() },
            warnings: if errors { Vec::new() } else { vec!["w".into()] },
            has_errors: errors,
            has_warnings: !errors,
            markers: Vec::new(),
        }
    }

    #[test]
    fn manifests_are_counted_once_across_rules() {
        let res = RuleEngineResult::new(
            vec![rule("a", vec![violation("x", true)], vec!["y"]), rule("b", vec![violation("y", false)], vec!["x", "z"])],
            Vec::new(),
        );
        assert!(res.success);
        assert_eq!(res.counters.rules, Counters { total: 2, passed: 0, failed: 2, with_errors: 1, with_warnings: 1 });
        assert_eq!(res.counters.manifests, Counters { total: 3, passed: 1, failed: 2, with_errors: 1, with_warnings: 1 });
    }
}
