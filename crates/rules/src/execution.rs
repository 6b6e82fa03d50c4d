use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexSet;
use kubelint_core::K8sManifest;
use kubelint_query::{QueryExecutor, QueryScopeLimiter};
use kubelint_script::{Interpreter, ObjectMap, ScriptLimits, Value};
use metrics::counter;
use tracing::{debug, trace, warn};

use crate::compiler::RuleCompiler;
use crate::error::{RuleError, RuleErrorSource};
use crate::processors::CacheProcessor;
use crate::registry::RuleInstance;
use crate::reporter::Reporter;
use crate::result::{ManifestRef, ManifestViolation, PassedManifest, RuleResult};
use crate::spec::RuleValues;

/// Memoized outcome of one cache script for one scope.
#[derive(Debug, Clone)]
enum CacheSlot {
    Ready(Value),
    Failed,
}

/// Cache memo of one rule instance: the global slot plus one slot per scope.
#[derive(Debug, Default)]
struct CacheMemo {
    global: Option<CacheSlot>,
    cluster: Option<CacheSlot>,
    namespaces: HashMap<String, CacheSlot>,
}

/// Runs one rule instance against the registry the executor was built over.
pub struct RuleExecutionRuntime<'a> {
    instance: &'a RuleInstance,
    executor: Rc<QueryExecutor>,
    reporter: &'a Reporter,
    limits: ScriptLimits,
    errors: IndexSet<RuleError>,
    memo: CacheMemo,
    cache_runs: usize,
}

impl<'a> RuleExecutionRuntime<'a> {
    pub fn new(instance: &'a RuleInstance, executor: Rc<QueryExecutor>, reporter: &'a Reporter, limits: ScriptLimits) -> Self {
        Self { instance, executor, reporter, limits, errors: IndexSet::new(), memo: CacheMemo::default(), cache_runs: 0 }
    }

    /// Number of cache script invocations (global and local) made so far.
    pub fn cache_runs(&self) -> usize {
        self.cache_runs
    }

    pub fn execute(&mut self) -> RuleResult {
        let instance = self.instance;
        let compiler = Rc::clone(&instance.compiler);
        if !compiler.is_compiled() {
            debug!(rule = %instance.name, ns = ?instance.namespace, "skipping rule that failed to compile");
            self.reporter.compile_failure(&instance.manifest);
            return self.result(false, compiler.errors().to_vec(), Vec::new(), Vec::new());
        }

        let context: Rc<dyn std::any::Any> = Rc::clone(&self.executor) as Rc<dyn std::any::Any>;
        let mut interp = Interpreter::with_context(self.limits, context);
        let scope = QueryScopeLimiter::from(instance.namespace.as_deref());
        let target = compiler.target().execute(&mut interp, &self.executor, &scope);
        if !target.success {
            for msg in target.messages {
                self.runtime_error(RuleErrorSource::Target, msg);
            }
            return self.finish(Vec::new(), Vec::new());
        }

        let mut seen = IndexSet::new();
        let items: Vec<Arc<K8sManifest>> =
            target.items.into_iter().filter(|m| seen.insert(ManifestRef::of(m).key())).collect();
        trace!(rule = %instance.name, ns = ?instance.namespace, items = items.len(), "target resolved");

        let mut violations = Vec::new();
        let mut passed = Vec::new();
        for item in &items {
            self.validate(&mut interp, &compiler, item, &mut violations, &mut passed);
        }
        self.finish(violations, passed)
    }

    fn validate(
        &mut self,
        interp: &mut Interpreter,
        compiler: &RuleCompiler,
        item: &Arc<K8sManifest>,
        violations: &mut Vec<ManifestViolation>,
        passed: &mut Vec<PassedManifest>,
    ) {
        let Some(validation) = compiler.validation() else {
            return;
        };
        let instance = self.instance;
        let values = &instance.values;
        let global = match self.global_cache(interp, compiler, values) {
            Some(CacheSlot::Ready(v)) => Some(v),
            Some(CacheSlot::Failed) => return,
            None => None,
        };
        let cache = match self.local_cache(interp, compiler, item.namespace(), values, global.as_ref()) {
            Some(CacheSlot::Ready(v)) => v,
            Some(CacheSlot::Failed) => return,
            None => global.clone().unwrap_or_else(|| Value::object(ObjectMap::new())),
        };

        let result = validation.execute(interp, item, &cache, global.as_ref(), values);
        if !result.success {
            counter!("script_runtime_errors", 1u64);
            for msg in result.messages {
                warn!(rule = %instance.name, item = %item.id().key(), error = %msg, "validation script failed");
                self.runtime_error(RuleErrorSource::Script, msg);
            }
            return;
        }
        if result.is_violation() {
            counter!("rule_violations", 1u64);
            self.reporter.violation(item, &result.error_msgs, &result.warn_msgs);
            violations.push(ManifestViolation {
                manifest: ManifestRef::of(item),
                has_errors: !result.error_msgs.is_empty(),
                has_warnings: !result.warn_msgs.is_empty(),
                errors: result.error_msgs,
                warnings: result.warn_msgs,
                markers: result.markers,
            });
        } else {
            self.reporter.passed(item);
            passed.push(PassedManifest { manifest: ManifestRef::of(item), markers: result.markers });
        }
    }

    /// `None` when the rule has no global cache script.
    fn global_cache(&mut self, interp: &mut Interpreter, compiler: &RuleCompiler, values: &RuleValues) -> Option<CacheSlot> {
        let processor = compiler.global_cache()?;
        if let Some(slot) = &self.memo.global {
            return Some(slot.clone());
        }
        let slot = self.run_cache(interp, processor, RuleErrorSource::GlobalCache, None, values, None);
        self.memo.global = Some(slot.clone());
        Some(slot)
    }

    /// `None` when the rule has no local cache script.
    fn local_cache(
        &mut self,
        interp: &mut Interpreter,
        compiler: &RuleCompiler,
        namespace: Option<&str>,
        values: &RuleValues,
        global: Option<&Value>,
    ) -> Option<CacheSlot> {
        let processor = compiler.cache()?;
        let memoized = match namespace {
            Some(ns) => self.memo.namespaces.get(ns),
            None => self.memo.cluster.as_ref(),
        };
        if let Some(slot) = memoized {
            return Some(slot.clone());
        }
        let slot = self.run_cache(interp, processor, RuleErrorSource::Cache, namespace, values, global);
        match namespace {
            Some(ns) => {
                self.memo.namespaces.insert(ns.to_string(), slot.clone());
            }
            None => self.memo.cluster = Some(slot.clone()),
        }
        Some(slot)
    }

    fn run_cache(
        &mut self,
        interp: &mut Interpreter,
        processor: &CacheProcessor,
        source: RuleErrorSource,
        namespace: Option<&str>,
        values: &RuleValues,
        global: Option<&Value>,
    ) -> CacheSlot {
        self.cache_runs += 1;
        trace!(rule = %self.instance.name, scope = ?namespace, stage = source.as_str(), "running cache script");
        let result = processor.execute(interp, namespace, values, global);
        if result.success {
            return CacheSlot::Ready(result.cache);
        }
        counter!("script_runtime_errors", 1u64);
        for msg in result.messages {
            warn!(rule = %self.instance.name, scope = ?namespace, error = %msg, "cache script failed");
            self.runtime_error(source, msg);
        }
        CacheSlot::Failed
    }

    fn runtime_error(&mut self, source: RuleErrorSource, msg: String) {
        self.errors.insert(RuleError::new(source, msg));
    }

    fn finish(&mut self, violations: Vec<ManifestViolation>, passed: Vec<PassedManifest>) -> RuleResult {
        let errors: Vec<RuleError> = std::mem::take(&mut self.errors).into_iter().collect();
        self.result(true, errors, violations, passed)
    }

    fn result(
        &self,
        compiled: bool,
        errors: Vec<RuleError>,
        violations: Vec<ManifestViolation>,
        passed: Vec<PassedManifest>,
    ) -> RuleResult {
        let instance = self.instance;
        let pass = compiled && errors.is_empty() && violations.is_empty();
        debug!(
            rule = %instance.name,
            ns = ?instance.namespace,
            pass,
            violations = violations.len(),
            passed = passed.len(),
            errors = errors.len(),
            "rule executed"
        );
        RuleResult {
            kind: instance.kind,
            name: instance.name.clone(),
            namespace: instance.namespace.clone(),
            compiled,
            pass,
            errors,
            violations,
            passed,
        }
    }
}
