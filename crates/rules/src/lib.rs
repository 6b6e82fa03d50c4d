//! kubelint rules engine: compiles user-authored rules and runs them over a manifest registry.
//!
//! - [`RuleCompiler`]: target, validation and cache scripts of one rule
//! - [`RuleRegistry`]: ClusterRule / Rule / RuleApplicator / Library resolution
//! - [`RuleExecutionRuntime`]: one rule instance, with per-scope cache memoization
//! - [`RulesRuntime`]: top-level driver producing a [`RuleEngineResult`]
//!
//! Nothing here returns `Err` for a broken rule: compile and runtime problems
//! are reported inside the result next to the manifest violations.

#![forbid(unsafe_code)]

mod compiler;
mod config;
mod error;
mod execution;
pub mod helpers;
mod library;
pub mod processors;
mod registry;
mod reporter;
mod result;
mod runtime;
pub mod spec;

pub use compiler::RuleCompiler;
pub use config::EngineConfig;
pub use error::{LoadError, RuleError, RuleErrorSource};
pub use execution::RuleExecutionRuntime;
pub use library::{load_libraries, parse_yaml_documents, resolve_path, FsRuleSourceLoader, MemoryRuleSourceLoader, RuleSourceLoader};
pub use registry::{ClusterRuleEntry, RuleInstance, RuleKind, RuleRegistry};
pub use reporter::{Reporter, COMPILE_FAILURE};
pub use result::{
    Counters, EngineCounters, ManifestRef, ManifestViolation, PassedManifest, RuleEngineResult, RuleResult, SkippedRule,
};
pub use runtime::RulesRuntime;

pub mod prelude {
    pub use super::{EngineConfig, RuleEngineResult, RuleResult, RulesRuntime, RuleSourceLoader};
}
