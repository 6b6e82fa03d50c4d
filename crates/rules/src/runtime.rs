use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use kubelint_core::ManifestPackage;
use kubelint_query::QueryExecutor;
use kubelint_registry::RegistryQueryExecutor;
use metrics::{counter, gauge, histogram};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::execution::RuleExecutionRuntime;
use crate::library::RuleSourceLoader;
use crate::registry::{RuleKind, RuleRegistry};
use crate::reporter::Reporter;
use crate::result::{RuleEngineResult, RuleResult};

/// Top-level driver: resolve every rule once, then run all instances serially.
///
/// Not `Send`: compiled rules hold script values. Build and execute it on one task.
pub struct RulesRuntime {
    config: EngineConfig,
    registry: Arc<dyn RegistryQueryExecutor>,
    reporter: Reporter,
    rules: RuleRegistry,
}

impl RulesRuntime {
    pub async fn init(
        config: EngineConfig,
        package: Arc<ManifestPackage>,
        registry: Arc<dyn RegistryQueryExecutor>,
        loader: &dyn RuleSourceLoader,
    ) -> Self {
        gauge!("registry_manifests", package.len() as f64);
        debug!(registry = %registry.describe(), manifests = package.len(), "initializing rules runtime");
        let rules = RuleRegistry::load(registry.as_ref(), &package, loader, &config).await;
        Self { config, registry, reporter: Reporter::new(package), rules }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn package(&self) -> &Arc<ManifestPackage> {
        self.reporter.package()
    }

    pub fn execute(&self) -> RuleEngineResult {
        let started = Instant::now();
        let executor = Rc::new(QueryExecutor::new(Arc::clone(&self.registry)));
        let limits = self.config.script_limits();

        let mut results: Vec<RuleResult> = Vec::with_capacity(self.rules.instances().len());
        for instance in self.rules.instances() {
            let t0 = Instant::now();
            let result = RuleExecutionRuntime::new(instance, Rc::clone(&executor), &self.reporter, limits).execute();
            histogram!("rule_exec_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
            counter!("rule_instances_executed", 1u64);
            results.push(result);
        }

        // Broken cluster rules with no instance (e.g. applicator-only) still show up.
        for entry in self.rules.cluster_rules() {
            let Some(compiler) = entry.compiler.as_ref() else { continue };
            if entry.instances() > 0 || compiler.is_compiled() {
                continue;
            }
            self.reporter.compile_failure(&entry.manifest);
            results.push(RuleResult {
                kind: RuleKind::ClusterRule,
                name: entry.name.clone(),
                namespace: None,
                compiled: false,
                pass: false,
                errors: compiler.errors().to_vec(),
                violations: Vec::new(),
                passed: Vec::new(),
            });
        }

        let out = RuleEngineResult::new(results, self.rules.skipped().to_vec());
        info!(
            success = out.success,
            rules = out.counters.rules.total,
            failed_rules = out.counters.rules.failed,
            manifests = out.counters.manifests.total,
            failed_manifests = out.counters.manifests.failed,
            skipped = out.skipped_rules.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rules executed"
        );
        out
    }
}
