use std::rc::Rc;
use std::sync::Arc;

use kubelint_core::{ManifestPackage, SourceKind};
use kubelint_query::QueryExecutor;
use kubelint_registry::{LocalRegistry, RegistryQueryExecutor};
use kubelint_rules::spec::{RuleScripts, RuleValues};
use kubelint_rules::{
    EngineConfig, MemoryRuleSourceLoader, Reporter, RuleCompiler, RuleEngineResult, RuleErrorSource,
    RuleExecutionRuntime, RuleInstance, RuleKind, RulesRuntime, COMPILE_FAILURE,
};
use kubelint_script::ScriptLimits;
use serde_json::{json, Value as Json};

fn deployment(name: &str, ns: &str, replicas: u32, image: &str) -> Json {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": ns },
        "spec": {
            "replicas": replicas,
            "template": { "spec": { "containers": [{ "name": "main", "image": image }] } }
        }
    })
}

fn cluster_rule(name: &str, spec: Json) -> Json {
    json!({ "apiVersion": "kubevious.io/v1", "kind": "ClusterRule", "metadata": { "name": name }, "spec": spec })
}

fn namespaced(kind: &str, name: &str, ns: &str, spec: Json) -> Json {
    json!({ "apiVersion": "kubevious.io/v1", "kind": kind, "metadata": { "name": name, "namespace": ns }, "spec": spec })
}

const DEPLOYMENTS: &str = "ApiVersion('apps/v1').Kind('Deployment')";

fn package(docs: Vec<Json>) -> Arc<ManifestPackage> {
    let pkg = ManifestPackage::new();
    let src = pkg.add_source(SourceKind::File, "manifests.yaml");
    for doc in docs {
        pkg.add_manifest(&src, doc).unwrap();
    }
    Arc::new(pkg)
}

async fn run_with(pkg: &Arc<ManifestPackage>, loader: &MemoryRuleSourceLoader) -> RuleEngineResult {
    let registry: Arc<dyn RegistryQueryExecutor> = Arc::new(LocalRegistry::from_package(pkg));
    let runtime = RulesRuntime::init(EngineConfig::default(), Arc::clone(pkg), registry, loader).await;
    runtime.execute()
}

async fn run(pkg: &Arc<ManifestPackage>) -> RuleEngineResult {
    run_with(pkg, &MemoryRuleSourceLoader::new()).await
}

#[tokio::test]
async fn too_few_replicas_is_a_violation() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx:1.25"),
        cluster_rule("min-replicas", json!({
            "target": DEPLOYMENTS,
            "rule": "if (config.spec.replicas < 2) error('too few replicas')"
        })),
    ]);
    let res = run(&pkg).await;

    assert!(res.success);
    assert_eq!(res.rules.len(), 1);
    let rule = &res.rules[0];
    assert_eq!(rule.namespace.as_deref(), Some("ns1"));
    assert!(rule.compiled);
    assert!(!rule.pass);
    assert_eq!(rule.violations.len(), 1);
    let v = &rule.violations[0];
    assert_eq!(v.manifest.id.name.as_deref(), Some("web"));
    assert!(v.has_errors && !v.has_warnings);
    assert!(v.errors[0].contains("too few replicas"));

    let web = pkg.manifests().into_iter().find(|m| m.name() == Some("web")).unwrap();
    let state = web.state();
    assert!(state.rules.processed);
    assert_eq!(state.rules.errors, vec!["too few replicas".to_string()]);
    assert_eq!(res.counters.manifests.with_errors, 1);
}

#[tokio::test]
async fn repeated_messages_are_reported_once() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        cluster_rule("dup", json!({
            "target": DEPLOYMENTS,
            "rule": "error('X'); error('X'); warning('W'); warning('W'); mark('m'); mark('m')"
        })),
    ]);
    let res = run(&pkg).await;
    let v = &res.rules[0].violations[0];
    assert_eq!(v.errors, vec!["X".to_string()]);
    assert_eq!(v.warnings, vec!["W".to_string()]);
    assert_eq!(v.markers, vec!["m".to_string()]);
}

#[tokio::test]
async fn broken_rule_does_not_affect_its_neighbours() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 3, "nginx"),
        cluster_rule("first", json!({ "target": DEPLOYMENTS, "rule": "if (config.spec.replicas < 2) error('few')" })),
        cluster_rule("second", json!({ "target": "ApiVersion('apps/v1'.Kind('Deployment')", "rule": "error('never')" })),
        cluster_rule("third", json!({ "target": DEPLOYMENTS, "rule": "mark('seen')" })),
    ]);
    let res = run(&pkg).await;
    assert!(!res.success);

    let second: Vec<_> = res.rule("second").collect();
    assert_eq!(second.len(), 2);
    for r in &second {
        assert!(!r.compiled && !r.pass);
        assert!(!r.errors.is_empty());
        assert_eq!(r.errors[0].source, RuleErrorSource::Target);
        assert!(r.violations.is_empty() && r.passed.is_empty());
    }
    let rule_manifest = pkg.manifests().into_iter().find(|m| m.name() == Some("second")).unwrap();
    assert_eq!(rule_manifest.state().errors, vec![COMPILE_FAILURE.to_string()]);

    let first: Vec<_> = res.rule("first").collect();
    assert_eq!(first.iter().map(|r| r.violations.len()).sum::<usize>(), 1);
    assert_eq!(first.iter().map(|r| r.passed.len()).sum::<usize>(), 1);
    assert!(res.rule("third").all(|r| r.compiled && r.pass && r.passed.len() == 1));
    assert_eq!(res.counters.rules.total, 6);
}

#[tokio::test]
async fn applicator_values_take_precedence() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 1, "nginx"),
        cluster_rule("valued", json!({
            "target": DEPLOYMENTS,
            "rule": "warning('x=' + values.x)",
            "values": { "x": 1 },
            "application": { "useApplicator": true, "namespaces": [{ "name": "ns1", "values": { "x": 2 } }] }
        })),
        namespaced("RuleApplicator", "apply-ns1", "ns1", json!({ "clusterRuleRef": { "name": "valued" }, "values": { "x": 3 } })),
        namespaced("RuleApplicator", "apply-ns2", "ns2", json!({ "clusterRuleRef": { "name": "valued" } })),
        namespaced("RuleApplicator", "dangling", "ns2", json!({ "clusterRuleRef": { "name": "missing" } })),
    ]);
    let res = run(&pkg).await;

    let warning = |name: &str| res.rule(name).next().map(|r| r.violations[0].warnings.clone()).unwrap();
    assert_eq!(warning("apply-ns1"), vec!["x=3".to_string()]);
    assert_eq!(warning("apply-ns2"), vec!["x=1".to_string()]);
    assert!(res.rule("valued").next().is_none());
    assert!(res.rules.iter().all(|r| r.kind == RuleKind::RuleApplicator));
    assert!(res
        .skipped_rules
        .iter()
        .any(|s| s.kind == RuleKind::RuleApplicator && s.name.as_deref() == Some("dangling")));
}

#[tokio::test]
async fn namespace_override_beats_rule_defaults() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 1, "nginx"),
        cluster_rule("valued", json!({
            "target": DEPLOYMENTS,
            "rule": "warning('x=' + values.x)",
            "values": { "x": 1 },
            "application": { "namespaces": [{ "name": "ns1", "values": { "x": 2 } }] }
        })),
    ]);
    let res = run(&pkg).await;
    let by_ns = |ns: &str| {
        res.rules.iter().find(|r| r.namespace.as_deref() == Some(ns)).map(|r| r.violations[0].warnings[0].clone())
    };
    assert_eq!(by_ns("ns1").as_deref(), Some("x=2"));
    assert_eq!(by_ns("ns2").as_deref(), Some("x=1"));
}

#[tokio::test]
async fn only_selected_namespaces_limits_expansion() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 1, "nginx"),
        cluster_rule("selected", json!({
            "target": DEPLOYMENTS,
            "rule": "error('hit')",
            "application": { "onlySelectedNamespaces": true, "namespaces": [{ "name": "ns2" }] }
        })),
        cluster_rule("selected-applied", json!({
            "target": DEPLOYMENTS,
            "rule": "error('hit')",
            "application": { "useApplicator": true, "onlySelectedNamespaces": true, "namespaces": [{ "name": "ns2" }] }
        })),
        namespaced("RuleApplicator", "ns1-applicator", "ns1", json!({ "clusterRuleRef": { "name": "selected-applied" } })),
    ]);
    let res = run(&pkg).await;
    let selected: Vec<_> = res.rule("selected").collect();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].namespace.as_deref(), Some("ns2"));
    assert_eq!(selected[0].violations[0].manifest.id.name.as_deref(), Some("api"));

    assert!(res.rule("ns1-applicator").next().is_none());
    assert!(res.skipped_rules.iter().any(|s| s.name.as_deref() == Some("ns1-applicator")));
}

#[tokio::test]
async fn clustered_rules_run_once_across_namespaces() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 1, "nginx"),
        cluster_rule("everywhere", json!({
            "target": DEPLOYMENTS,
            "rule": "mark(item.namespace)",
            "application": { "clustered": true, "useApplicator": true }
        })),
    ]);
    let res = run(&pkg).await;
    assert_eq!(res.rules.len(), 1);
    let rule = &res.rules[0];
    assert_eq!(rule.namespace, None);
    let marks: Vec<_> = rule.passed.iter().flat_map(|p| p.markers.clone()).collect();
    assert_eq!(marks, vec!["ns1".to_string(), "ns2".to_string()]);
}

const COUNTING_RULE: &str = r#"
    if (cache.ns !== item.namespace) error('cache from another scope')
    mark('local-' + globalCache.localRuns)
"#;

#[tokio::test]
async fn cache_scripts_run_once_per_scope() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        deployment("b", "ns2", 1, "nginx"),
        deployment("c", "ns1", 1, "nginx"),
        cluster_rule("cached", json!({
            "target": DEPLOYMENTS,
            "globalCache": "cache.localRuns = 0",
            "cache": "globalCache.localRuns += 1; cache.ns = namespace",
            "rule": COUNTING_RULE,
            "application": { "clustered": true }
        })),
    ]);
    let res = run(&pkg).await;
    let rule = &res.rules[0];
    assert!(rule.pass, "{:?}", rule.errors);
    let marks: Vec<_> = rule.passed.iter().map(|p| p.markers.join(",")).collect();
    assert_eq!(marks, vec!["local-1", "local-2", "local-2"]);
}

#[test]
fn execution_runtime_counts_cache_invocations() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        deployment("b", "ns2", 1, "nginx"),
        deployment("c", "ns1", 1, "nginx"),
        deployment("d", "ns2", 1, "nginx"),
    ]);
    let scripts = RuleScripts {
        target: DEPLOYMENTS.into(),
        rule: COUNTING_RULE.into(),
        global_cache: Some("cache.localRuns = 0".into()),
        cache: Some("globalCache.localRuns += 1; cache.ns = namespace".into()),
    };
    let instance = RuleInstance {
        kind: RuleKind::ClusterRule,
        name: "cached".into(),
        namespace: None,
        values: RuleValues::new(),
        manifest: pkg.manifests()[0].clone(),
        compiler: Rc::new(RuleCompiler::compile("cached", &scripts, ScriptLimits::default())),
    };
    let registry: Arc<dyn RegistryQueryExecutor> = Arc::new(LocalRegistry::from_package(&pkg));
    let reporter = Reporter::new(Arc::clone(&pkg));
    let mut runtime =
        RuleExecutionRuntime::new(&instance, Rc::new(QueryExecutor::new(registry)), &reporter, ScriptLimits::default());
    let result = runtime.execute();
    assert_eq!(result.passed.len(), 4);
    assert_eq!(runtime.cache_runs(), 3);
}

#[tokio::test]
async fn script_failures_are_rule_errors_not_violations() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        deployment("b", "ns1", 1, "nginx"),
        deployment("c", "ns1", 1, "nginx"),
        cluster_rule("throws", json!({
            "target": DEPLOYMENTS,
            "rule": "if (item.name == 'b') throw new Error('boom'); error('seen')"
        })),
    ]);
    let res = run(&pkg).await;
    assert!(!res.success);
    let rule = &res.rules[0];
    assert!(rule.compiled && !rule.pass);
    assert_eq!(rule.errors.len(), 1);
    assert_eq!(rule.errors[0].source, RuleErrorSource::Script);
    assert!(rule.errors[0].msg.contains("boom"));
    assert_eq!(rule.violations.len(), 2);
}

#[tokio::test]
async fn runaway_scripts_hit_the_step_budget() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        cluster_rule("spin", json!({ "target": DEPLOYMENTS, "rule": "while (true) {}" })),
    ]);
    let registry: Arc<dyn RegistryQueryExecutor> = Arc::new(LocalRegistry::from_package(&pkg));
    let config = EngineConfig { max_steps: 10_000, ..EngineConfig::default() };
    let runtime = RulesRuntime::init(config, Arc::clone(&pkg), registry, &MemoryRuleSourceLoader::new()).await;
    let res = runtime.execute();
    assert!(!res.success);
    assert_eq!(res.rules[0].errors[0].source, RuleErrorSource::Script);
}

#[tokio::test]
async fn nameless_and_disabled_rules_are_skipped() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        json!({ "apiVersion": "kubevious.io/v1", "kind": "ClusterRule", "metadata": {},
                "spec": { "target": DEPLOYMENTS, "rule": "error('x')" } }),
        cluster_rule("off", json!({ "target": DEPLOYMENTS, "rule": "error('x')", "disabled": true })),
        namespaced("Rule", "local-off", "ns1", json!({ "target": DEPLOYMENTS, "rule": "error('x')", "disabled": true })),
    ]);
    let res = run(&pkg).await;
    assert!(res.success);
    assert!(res.rules.is_empty());
    let reasons: Vec<_> = res.skipped_rules.iter().map(|s| (s.kind, s.reason.as_str())).collect();
    assert_eq!(
        reasons,
        vec![(RuleKind::ClusterRule, "name not set"), (RuleKind::ClusterRule, "disabled"), (RuleKind::Rule, "disabled")]
    );
}

#[tokio::test]
async fn namespaced_rules_query_their_own_namespace() {
    let pkg = package(vec![
        deployment("web", "ns1", 1, "nginx"),
        deployment("api", "ns2", 1, "nginx"),
        namespaced("Rule", "local", "ns2", json!({ "target": DEPLOYMENTS, "rule": "warning(item.name)" })),
    ]);
    let res = run(&pkg).await;
    let rule = &res.rules[0];
    assert_eq!(rule.kind, RuleKind::Rule);
    assert_eq!(rule.violations.len(), 1);
    assert_eq!(rule.violations[0].warnings, vec!["api".to_string()]);
}

#[tokio::test]
async fn library_rules_are_loaded_as_cluster_rules() {
    let pkg = ManifestPackage::new();
    let manifests = pkg.add_source(SourceKind::File, "manifests.yaml");
    pkg.add_manifest(&manifests, deployment("web", "ns1", 2, "nginx:latest")).unwrap();
    pkg.add_manifest(&manifests, deployment("api", "ns1", 2, "nginx:1.25")).unwrap();
    let lib_src = pkg.add_source(SourceKind::File, "lib/index.yaml");
    pkg.add_manifest(
        &lib_src,
        json!({
            "apiVersion": "kubevious.io/v1",
            "kind": "Library",
            "metadata": { "name": "community" },
            "spec": { "rules": [
                { "name": "no-latest", "path": "rules/no-latest.yaml", "category": "images" },
                { "name": "gone", "path": "rules/gone.yaml" }
            ] }
        }),
    )
    .unwrap();
    let pkg = Arc::new(pkg);
    let loader = MemoryRuleSourceLoader::new().with(
        "lib/rules/no-latest.yaml",
        vec![json!({
            "target": DEPLOYMENTS,
            "rule": "for (const c of config.spec.template.spec.containers) { if (helpers.parseImage(c.image).tag == 'latest') error('latest tag on ' + c.name) }"
        })],
    );
    let res = run_with(&pkg, &loader).await;

    let rule = res.rule("no-latest").next().unwrap();
    assert!(rule.compiled);
    assert_eq!(rule.violations.len(), 1);
    assert_eq!(rule.violations[0].manifest.id.name.as_deref(), Some("web"));
    assert_eq!(rule.violations[0].errors, vec!["latest tag on main".to_string()]);
    assert!(res.skipped_rules.iter().any(|s| s.kind == RuleKind::Library && s.name.as_deref() == Some("gone")));
    assert!(pkg.sources().iter().any(|s| s.path() == "lib/rules/no-latest.yaml"));
}

#[tokio::test]
async fn applicator_only_compile_failures_still_surface() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        cluster_rule("broken", json!({
            "target": DEPLOYMENTS,
            "rule": "if (",
            "application": { "useApplicator": true }
        })),
    ]);
    let res = run(&pkg).await;
    assert!(!res.success);
    let rule = res.rule("broken").next().unwrap();
    assert!(!rule.compiled);
    assert_eq!(rule.errors[0].source, RuleErrorSource::Script);
}

#[tokio::test]
async fn malformed_library_rule_files_are_skipped() {
    let pkg = ManifestPackage::new();
    let lib_src = pkg.add_source(SourceKind::File, "lib/index.yaml");
    pkg.add_manifest(
        &lib_src,
        json!({
            "apiVersion": "kubevious.io/v1",
            "kind": "Library",
            "metadata": { "name": "community" },
            "spec": { "rules": [{ "name": "odd", "path": "rules/odd.yaml" }] }
        }),
    )
    .unwrap();
    let pkg = Arc::new(pkg);
    let loader = MemoryRuleSourceLoader::new()
        .with("lib/rules/odd.yaml", vec![json!({ "kind": "ClusterRule", "metadata": "oops" })]);
    let res = run_with(&pkg, &loader).await;
    assert!(res.rules.is_empty());
    let skip = res.skipped_rules.iter().find(|s| s.kind == RuleKind::Library).unwrap();
    assert!(skip.reason.ends_with("metadata is not an object"), "{}", skip.reason);
}

#[tokio::test]
async fn hostile_scripts_become_rule_errors() {
    let pkg = package(vec![
        deployment("a", "ns1", 1, "nginx"),
        cluster_rule("sparse", json!({ "target": DEPLOYMENTS, "rule": "const a = []; a[1e15] = 1" })),
        cluster_rule("grow", json!({ "target": DEPLOYMENTS, "rule": "let s = 'x'; for (let i = 0; i < 64; i++) { s += s }" })),
        cluster_rule("recurse", json!({
            "target": DEPLOYMENTS,
            "rule": "function f(n) { return n == 0 ? 0 : f(n - 1) + 1 } f(100000)"
        })),
        cluster_rule("nested", json!({ "target": DEPLOYMENTS, "rule": format!("{}1{}", "(".repeat(500), ")".repeat(500)) })),
    ]);
    let res = run(&pkg).await;
    assert!(!res.success);
    for name in ["sparse", "grow", "recurse"] {
        let rule = res.rule(name).next().unwrap();
        assert!(rule.compiled, "{name}");
        assert_eq!(rule.errors.len(), 1, "{name}");
        assert_eq!(rule.errors[0].source, RuleErrorSource::Script, "{name}");
    }
    let nested = res.rule("nested").next().unwrap();
    assert!(!nested.compiled);
    assert!(nested.errors[0].msg.contains("nested too deeply"));
}
