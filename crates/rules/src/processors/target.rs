use std::rc::Rc;

use kubelint_query::{Query, QueryExecutor, QueryNode, QueryResult, QueryScopeLimiter};
use kubelint_script::{Interpreter, ScriptLimits, ScriptMode};
use tracing::trace;

use super::{base_bindings, compile, ProcessorResult};
use crate::spec::RuleValues;

const NO_TARGET: &str = "No target specified.";
const UNKNOWN_TARGET: &str = "Unknown target specified.";

/// Compiled target: the query node the expression evaluated to.
///
/// The expression runs once, at prepare time; executions only re-resolve the node.
#[derive(Debug, Default)]
pub struct TargetProcessor {
    query: Option<Rc<QueryNode>>,
}

impl TargetProcessor {
    pub fn prepare(source: &str, limits: ScriptLimits) -> (Self, ProcessorResult) {
        let expr = source.trim().trim_end_matches(';').trim_end();
        if expr.is_empty() {
            return (Self::default(), ProcessorResult::failed(NO_TARGET));
        }
        let script = match compile(expr, ScriptMode::Expression) {
            Ok(script) => script,
            Err(msg) => return (Self::default(), ProcessorResult::failed(msg)),
        };
        let bindings = base_bindings(&QueryScopeLimiter::cluster(), &RuleValues::new());
        let value = match script.run(&mut Interpreter::new(limits), &bindings) {
            Ok(value) => value,
            Err(err) => return (Self::default(), ProcessorResult::failed(err.message())),
        };
        match value {
            v if v.is_nullish() => (Self::default(), ProcessorResult::failed(NO_TARGET)),
            v => match v.as_host::<Query>() {
                Some(query) => {
                    trace!(node = query.node().tag(), "target prepared");
                    (Self { query: Some(Rc::clone(query.node())) }, ProcessorResult::ok())
                }
                None => (Self::default(), ProcessorResult::failed(UNKNOWN_TARGET)),
            },
        }
    }

    pub fn query(&self) -> Option<&Rc<QueryNode>> {
        self.query.as_ref()
    }

    /// Resolve the target under the application scope of one rule instance.
    pub fn execute(&self, interp: &mut Interpreter, executor: &QueryExecutor, scope: &QueryScopeLimiter) -> QueryResult {
        match &self.query {
            Some(node) => executor.execute(interp, node, scope),
            None => QueryResult::failed(NO_TARGET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(src: &str) -> ProcessorResult {
        TargetProcessor::prepare(src, ScriptLimits::default()).1
    }

    #[test]
    fn target_must_be_a_query() {
        assert!(prepare("ApiVersion('apps/v1').Kind('Deployment');").success);
        assert_eq!(prepare("  "), ProcessorResult::failed(NO_TARGET));
        assert_eq!(prepare("null"), ProcessorResult::failed(NO_TARGET));
        assert_eq!(prepare("42"), ProcessorResult::failed(UNKNOWN_TARGET));
        let broken = prepare("ApiVersion('apps/v1'.Kind('Deployment')");
        assert!(!broken.success);
        assert!(broken.messages[0].starts_with("SyntaxError"));
    }

    #[test]
    fn prepared_target_keeps_its_node() {
        let (target, _) = TargetProcessor::prepare("Shortcut('PodSpec')", ScriptLimits::default());
        assert_eq!(target.query().map(|q| q.tag()), Some("Shortcut"));
    }
}
