use std::rc::Rc;
use std::sync::Arc;

use kubelint_core::{ManifestPackage, SourceKind};
use kubelint_query::{query_bindings, K8sQuery, QueryExecutor, QueryNode, QueryScopeLimiter};
use kubelint_registry::{LocalRegistry, RegistryQueryExecutor};
use kubelint_script::{CompiledScript, Interpreter, ScriptErrorKind, ScriptLimits, ScriptMode};
use serde_json::{json, Value as Json};

fn obj(api_version: &str, kind: &str, name: &str, ns: Option<&str>, labels: Json) -> Json {
    let mut meta = json!({ "name": name, "labels": labels });
    if let Some(ns) = ns {
        meta["namespace"] = json!(ns);
    }
    json!({ "apiVersion": api_version, "kind": kind, "metadata": meta })
}

fn deployment(name: &str, ns: &str, labels: Json) -> Json {
    let mut d = obj("apps/v1", "Deployment", name, Some(ns), labels);
    d["spec"] = json!({
        "replicas": 1,
        "template": {
            "metadata": { "labels": { "app": name } },
            "spec": {
                "initContainers": [{ "name": "init", "image": "busybox" }],
                "containers": [{ "name": "main", "image": "nginx:1.25" }, { "name": "sidecar", "image": "envoy" }]
            }
        }
    });
    d
}

fn job(name: &str, owned: bool) -> Json {
    let mut j = obj("batch/v1", "Job", name, Some("ns-a"), json!({}));
    j["spec"] = json!({ "template": { "spec": { "containers": [{ "name": "run", "image": "alpine" }] } } });
    if owned {
        j["metadata"]["ownerReferences"] = json!([{ "apiVersion": "batch/v1", "kind": "CronJob", "name": "nightly" }]);
    }
    j
}

fn package() -> ManifestPackage {
    let pkg = ManifestPackage::new();
    let src = pkg.add_source(SourceKind::File, "fixtures.yaml");
    for config in [
        deployment("web", "ns-a", json!({ "a": "1", "b": "2" })),
        deployment("api", "ns-b", json!({ "a": "1" })),
        deployment("db", "ns-a", json!({ "c": "3" })),
        obj("v1", "Secret", "creds", Some("ns-a"), json!({})),
        obj("bitnami.com/v1alpha1", "SealedSecret", "sealed", Some("ns-a"), json!({})),
        job("standalone", false),
        job("nightly-123", true),
    ] {
        pkg.add_manifest(&src, config).unwrap();
    }
    pkg
}

fn executor(pkg: &ManifestPackage) -> Rc<QueryExecutor> {
    let registry: Arc<dyn RegistryQueryExecutor> = Arc::new(LocalRegistry::from_package(pkg));
    Rc::new(QueryExecutor::new(registry))
}

fn eval(pkg: &ManifestPackage, ns: Option<&str>, source: &str) -> Json {
    let mut interp = Interpreter::with_context(ScriptLimits::default(), executor(pkg));
    let bindings = query_bindings(&QueryScopeLimiter::from(ns));
    let script = CompiledScript::compile(source, ScriptMode::Expression).expect("compile");
    script.run(&mut interp, &bindings).expect("run").to_json()
}

fn sorted(v: Json) -> Vec<String> {
    let mut out: Vec<String> = v.as_array().unwrap().iter().map(|s| s.as_str().unwrap().to_string()).collect();
    out.sort();
    out
}

#[test]
fn union_returns_each_manifest_once() {
    let pkg = package();
    let names = eval(
        &pkg,
        None,
        "many(Union(ApiVersion('apps/v1').Kind('Deployment'), ApiVersion('apps/v1').Kind('Deployment').name('web'))).map(i => i.name)",
    );
    assert_eq!(sorted(names), vec!["api", "db", "web"]);
}

#[test]
fn first_stops_at_the_first_non_empty_branch() {
    let pkg = package();
    // the second branch would throw if it were evaluated
    let v = eval(
        &pkg,
        None,
        "First(ApiVersion('v1').Kind('Secret').name('creds'), Manual(() => { throw new Error('evaluated') })).many().map(i => i.kind)",
    );
    assert_eq!(v, json!(["Secret"]));
    let fallback = eval(&pkg, None, "single(Shortcut('Secret', 'sealed')).kind");
    assert_eq!(fallback, json!("SealedSecret"));
    assert_eq!(eval(&pkg, None, "count(First(ApiVersion('v1').Kind('Missing')))"), json!(0));
}

#[test]
fn limiter_namespace_overrides_unless_all_namespaces() {
    let pkg = package();
    let deployments = "ApiVersion('apps/v1').Kind('Deployment')";
    assert_eq!(sorted(eval(&pkg, Some("ns-a"), &format!("many({deployments}).map(i => i.name)"))), vec!["db", "web"]);
    assert_eq!(eval(&pkg, Some("ns-a"), &format!("{deployments}.namespace('ns-b').count()")), json!(2));
    assert_eq!(eval(&pkg, Some("ns-a"), &format!("{deployments}.allNamespaces().count()")), json!(3));
    assert_eq!(eval(&pkg, None, &format!("{deployments}.namespace('ns-b').single().name")), json!("api"));
}

#[test]
fn label_filters_are_or_of_and() {
    let pkg = package();
    let v = eval(
        &pkg,
        None,
        "ApiVersion('apps/v1').Kind('Deployment').labels({a: '1', b: '2'}).labels({c: 3}).many().map(i => i.name)",
    );
    assert_eq!(sorted(v), vec!["db", "web"]);
    assert_eq!(eval(&pkg, None, "ApiVersion('apps/v1').Kind('Deployment').label('a', '1').count()"), json!(2));
}

#[test]
fn job_pod_spec_skips_owned_jobs() {
    let pkg = package();
    let v = eval(&pkg, None, "many(Shortcut('JobPodSpec')).map(i => [i.apiVersion, i.kind, i.name, i.namespace])");
    assert_eq!(v, json!([["kubevious.io/v1", "PodSpec", "Job-standalone", "ns-a"]]));
}

#[test]
fn container_spec_names_follow_the_pod_spec() {
    let pkg = package();
    let v = eval(&pkg, Some("ns-b"), "many(Shortcut('ContainerSpec')).map(i => i.name)");
    assert_eq!(
        sorted(v),
        vec!["Deployment-api-Cont-main", "Deployment-api-Cont-sidecar", "Deployment-api-InitCont-init"]
    );
    let image = eval(&pkg, Some("ns-b"), "single(Shortcut('ContainerSpec')).config.spec.image");
    assert_eq!(image, json!("nginx:1.25"));
}

#[test]
fn script_transforms_filters_and_manual_queries() {
    let pkg = package();
    let transformed = eval(
        &pkg,
        None,
        "Transform(ApiVersion('apps/v1').Kind('Deployment').name('web')).To(i => ({apiVersion: 'v1', kind: 'Probe', metadata: {name: i.name + '-probe'}})).many().map(i => [i.kind, i.name, i.source])",
    );
    assert_eq!(transformed, json!([["Probe", "web-probe", "fixtures.yaml"]]));

    let filtered = eval(&pkg, None, "Filter(ApiVersion('apps/v1').Kind('Deployment')).Criteria(i => i.namespace === 'ns-b').count()");
    assert_eq!(filtered, json!(1));

    let many = eval(
        &pkg,
        None,
        "TransformMany(ApiVersion('apps/v1').Kind('Deployment').name('web'), i => i.config.spec.template.spec.containers.map(c => ({apiVersion: 'v1', kind: 'Image', metadata: {name: c.image}}))).many().map(i => i.name)",
    );
    assert_eq!(many, json!(["nginx:1.25", "envoy"]));

    let manual = eval(
        &pkg,
        Some("ns-a"),
        "Manual(scope => scope.many(scope.ApiVersion('v1').Kind('Secret')).concat([scope.ApiVersion('apps/v1').Kind('Deployment').name('db')])).many().map(i => i.name)",
    );
    assert_eq!(manual, json!(["creds", "db"]));
}

#[test]
fn builders_are_immutable() {
    let pkg = package();
    let src = "(() => { const base = ApiVersion('apps/v1').Kind('Deployment'); base.name('web'); return base.count() })()";
    assert_eq!(eval(&pkg, None, src), json!(3));
}

#[test]
fn failures_become_failed_results() {
    let pkg = package();
    let exec = executor(&pkg);
    let mut interp = Interpreter::new(ScriptLimits::default());

    let no_kind = QueryNode::from(K8sQuery::api_version("apps/v1"));
    let result = exec.execute(&mut interp, &no_kind, &QueryScopeLimiter::default());
    assert!(!result.success);
    assert_eq!(result.messages, vec!["Kind not set".to_string()]);

    let bogus = QueryNode::shortcut("Bogus", Vec::new());
    let result = exec.execute(&mut interp, &bogus, &QueryScopeLimiter::default());
    assert!(!result.success);
    assert!(result.messages[0].contains("Bogus"));

    let ok = QueryNode::from(K8sQuery::api_version("v1").kind("Secret"));
    let result = exec.execute(&mut interp, &ok, &QueryScopeLimiter::default());
    assert!(result.success);
    assert_eq!(result.items.len(), 1);
}

#[test]
fn query_errors_inside_scripts_are_catchable() {
    let pkg = package();
    let v = eval(&pkg, None, "(() => { try { return many(Api('apps')) } catch (e) { return e.message } })()");
    assert_eq!(v, json!("Kind not set"));
}

#[test]
fn queries_need_an_executor() {
    let script = CompiledScript::compile("count(ApiVersion('v1').Kind('Pod'))", ScriptMode::Expression).unwrap();
    let bindings = query_bindings(&QueryScopeLimiter::default());
    let err = script.run(&mut Interpreter::new(ScriptLimits::default()), &bindings).unwrap_err();
    assert!(matches!(err.kind, ScriptErrorKind::Host(_)));
}
