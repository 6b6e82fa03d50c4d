//! The three script stages of a rule.
//!
//! Processors never fail outward: compile and runtime problems become
//! messages on a result with `success == false`.

use kubelint_query::{query_bindings, QueryScopeLimiter};
use kubelint_script::{CompiledScript, ScriptMode, Value};
use serde::Serialize;
use serde_json::Value as Json;

use crate::helpers;
use crate::spec::RuleValues;

mod cache;
mod target;
mod validation;

pub use cache::{CacheProcessor, CacheResult};
pub use target::TargetProcessor;
pub use validation::{ValidationProcessor, ValidationResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorResult {
    pub success: bool,
    pub messages: Vec<String>,
}

impl ProcessorResult {
    pub fn ok() -> Self {
        Self { success: true, messages: Vec::new() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, messages: vec![message.into()] }
    }
}

pub(crate) fn compile(source: &str, mode: ScriptMode) -> Result<CompiledScript, String> {
    CompiledScript::compile(source, mode).map_err(|err| err.message())
}

/// Query builders under `limiter`, plus `values` and `helpers`.
pub(crate) fn base_bindings(limiter: &QueryScopeLimiter, values: &RuleValues) -> Vec<(&'static str, Value)> {
    let mut bindings = query_bindings(limiter);
    bindings.push(("values", Value::from_json(&Json::Object(values.clone()))));
    bindings.push(("helpers", helpers::namespace()));
    bindings
}
