//! Rendering of a rules run for the terminal and for machines.

use std::fmt::Write as _;

use kubelint_core::ManifestPackage;
use kubelint_rules::{RuleEngineResult, RuleResult};
use serde_json::{json, Value as Json};

/// No broken rules and no manifest with error-level violations.
pub fn is_clean(result: &RuleEngineResult) -> bool {
    result.success && result.counters.manifests.with_errors == 0
}

fn status(rule: &RuleResult) -> &'static str {
    if !rule.compiled {
        "BROKEN"
    } else if rule.pass {
        "PASS"
    } else if rule.has_errors() {
        "ERROR"
    } else if rule.has_violation_errors() {
        "FAIL"
    } else {
        "WARN"
    }
}

pub fn human(result: &RuleEngineResult, package: &ManifestPackage) -> String {
    let mut out = String::new();
    for rule in &result.rules {
        let scope = rule.namespace.as_deref().unwrap_or("*");
        let _ = writeln!(out, "{:<6} {} {} [{}]", status(rule), rule.kind.as_str(), rule.name, scope);
        for err in &rule.errors {
            let _ = writeln!(out, "         ! {err}");
        }
        for v in &rule.violations {
            let at = v.manifest.source.as_ref().map(|s| format!(" ({})", s.path)).unwrap_or_default();
            let _ = writeln!(out, "         {}{at}", v.manifest.id.key());
            for msg in &v.errors {
                let _ = writeln!(out, "           error: {msg}");
            }
            for msg in &v.warnings {
                let _ = writeln!(out, "           warning: {msg}");
            }
        }
    }
    for skip in &result.skipped_rules {
        let name = skip.name.as_deref().unwrap_or("<unnamed>");
        let _ = writeln!(out, "SKIP   {} {}: {}", skip.kind.as_str(), name, skip.reason);
    }
    for m in package.manifests() {
        let state = m.state_ref();
        for msg in &state.errors {
            let _ = writeln!(out, "INVALID {}: {msg}", m.id().key());
        }
    }
    let (r, m) = (&result.counters.rules, &result.counters.manifests);
    let _ = writeln!(
        out,
        "rules: {} total, {} passed, {} failed | manifests: {} checked, {} with errors, {} with warnings",
        r.total, r.passed, r.failed, m.total, m.with_errors, m.with_warnings
    );
    out
}

/// The engine result plus every manifest that carries messages.
pub fn json(result: &RuleEngineResult, package: &ManifestPackage) -> Json {
    let manifests: Vec<Json> = package
        .manifests()
        .iter()
        .filter_map(|m| {
            let state = m.state();
            let noisy = !state.errors.is_empty() || !state.rules.errors.is_empty() || !state.rules.warnings.is_empty();
            noisy.then(|| {
                json!({
                    "id": m.id(),
                    "source": m.source_info(),
                    "errors": state.errors,
                    "warnings": state.warnings,
                    "rules": state.rules,
                })
            })
        })
        .collect();
    let mut out = serde_json::to_value(result).unwrap_or(Json::Null);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("manifests".to_string(), Json::Array(manifests));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubelint_rules::{RuleEngineResult, RuleKind};

    fn rule(compiled: bool, pass: bool) -> RuleResult {
        RuleResult {
            kind: RuleKind::ClusterRule,
            name: "r".into(),
            namespace: Some("ns1".into()),
            compiled,
            pass,
            errors: Vec::new(),
            violations: Vec::new(),
            passed: Vec::new(),
        }
    }

    #[test]
    fn broken_rules_make_the_run_unclean() {
        let pkg = ManifestPackage::new();
        let ok = RuleEngineResult::new(vec![rule(true, true)], Vec::new());
        assert!(is_clean(&ok));
        assert!(human(&ok, &pkg).starts_with("PASS   ClusterRule r [ns1]"));

        let broken = RuleEngineResult::new(vec![rule(false, false)], Vec::new());
        assert!(!is_clean(&broken));
        assert!(human(&broken, &pkg).starts_with("BROKEN"));
        assert_eq!(json(&broken, &pkg)["success"], json!(false));
    }
}
