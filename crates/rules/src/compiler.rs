use kubelint_script::ScriptLimits;
use metrics::counter;
use tracing::debug;

use crate::error::{RuleError, RuleErrorSource};
use crate::processors::{CacheProcessor, ProcessorResult, TargetProcessor, ValidationProcessor};
use crate::spec::RuleScripts;

/// Every stage of one rule, compiled once and shared by all its instances.
///
/// All present stages are compiled even after a failure so the report lists
/// every broken script at once.
#[derive(Debug)]
pub struct RuleCompiler {
    target: TargetProcessor,
    validation: Option<ValidationProcessor>,
    global_cache: Option<CacheProcessor>,
    cache: Option<CacheProcessor>,
    errors: Vec<RuleError>,
}

impl RuleCompiler {
    pub fn compile(name: &str, scripts: &RuleScripts, limits: ScriptLimits) -> Self {
        let mut errors = Vec::new();

        let (target, result) = TargetProcessor::prepare(&scripts.target, limits);
        collect(&mut errors, RuleErrorSource::Target, result);

        let validation = stage(&mut errors, RuleErrorSource::Script, ValidationProcessor::prepare(&scripts.rule));
        let global_cache = scripts
            .global_cache
            .as_deref()
            .and_then(|src| stage(&mut errors, RuleErrorSource::GlobalCache, CacheProcessor::prepare(src)));
        let cache = scripts
            .cache
            .as_deref()
            .and_then(|src| stage(&mut errors, RuleErrorSource::Cache, CacheProcessor::prepare(src)));

        if errors.is_empty() {
            counter!("rules_compiled", 1u64);
            debug!(rule = %name, "rule compiled");
        } else {
            counter!("rules_compile_failed", 1u64);
            debug!(rule = %name, errors = errors.len(), "rule failed to compile");
        }
        Self { target, validation, global_cache, cache, errors }
    }

    /// A rule whose definition could not even be read.
    pub fn invalid(source: RuleErrorSource, msg: impl Into<String>) -> Self {
        counter!("rules_compile_failed", 1u64);
        Self {
            target: TargetProcessor::default(),
            validation: None,
            global_cache: None,
            cache: None,
            errors: vec![RuleError::new(source, msg)],
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[RuleError] {
        &self.errors
    }

    pub fn target(&self) -> &TargetProcessor {
        &self.target
    }

    pub fn validation(&self) -> Option<&ValidationProcessor> {
        self.validation.as_ref()
    }

    pub fn global_cache(&self) -> Option<&CacheProcessor> {
        self.global_cache.as_ref()
    }

    pub fn cache(&self) -> Option<&CacheProcessor> {
        self.cache.as_ref()
    }
}

fn collect(errors: &mut Vec<RuleError>, source: RuleErrorSource, result: ProcessorResult) {
    errors.extend(result.messages.into_iter().map(|msg| RuleError::new(source, msg)));
}

fn stage<T>(errors: &mut Vec<RuleError>, source: RuleErrorSource, prepared: Result<T, String>) -> Option<T> {
    prepared.map_err(|msg| errors.push(RuleError::new(source, msg))).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripts(target: &str, rule: &str) -> RuleScripts {
        RuleScripts { target: target.into(), rule: rule.into(), ..RuleScripts::default() }
    }

    #[test]
    fn all_stages_are_attempted() {
        let mut s = scripts("ApiVersion('v1'", "if (");
        s.cache = Some("cache.x = ".into());
        s.global_cache = Some("cache.ok = true".into());
        let c = RuleCompiler::compile("broken", &s, ScriptLimits::default());
        assert!(!c.is_compiled());
        let sources: Vec<_> = c.errors().iter().map(|e| e.source).collect();
        assert_eq!(sources, vec![RuleErrorSource::Target, RuleErrorSource::Script, RuleErrorSource::Cache]);
        assert!(c.global_cache().is_some());
    }

    #[test]
    fn good_rule_compiles() {
        let c = RuleCompiler::compile(
            "ok",
            &scripts("ApiVersion('apps/v1').Kind('Deployment')", "if (config.spec.replicas < 2) error('too few')"),
            ScriptLimits::default(),
        );
        assert!(c.is_compiled());
        assert!(c.validation().is_some());
        assert!(c.cache().is_none());
    }
}
