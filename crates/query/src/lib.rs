//! kubelint queries: the algebra rule scripts use to select manifests.
//!
//! - [`QueryNode`]: immutable query description (K8s, Union, Transform, ...)
//! - [`Query`]: the script-facing handle with fluent builder methods
//! - [`QueryExecutor`]: resolves nodes against a registry under a [`QueryScopeLimiter`]
//! - [`ShortcutLibrary`]: named macros such as `PodSpec` and `ContainerSpec`
//! - [`ScriptItem`]: read-only view of one manifest inside a script

#![forbid(unsafe_code)]

use std::sync::Arc;

use kubelint_core::K8sManifest;
use kubelint_script::{error_object, Interrupt, ScriptError, Value};

mod builder;
mod executor;
mod item;
mod node;
mod shortcuts;

pub use builder::{query_bindings, Query, BUILDER_NAMES};
pub use executor::QueryExecutor;
pub use item::ScriptItem;
pub use node::{K8sQuery, Mapper, Predicate, QueryNode};
pub use shortcuts::{ShortcutFn, ShortcutLibrary, SYNTHETIC_API_VERSION};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("Kind not set")]
    KindNotSet,
    #[error("Unknown shortcut: {0}")]
    UnknownShortcut(String),
    #[error("{0} function not set")]
    MissingFunction(&'static str),
    #[error("invalid object produced by {0}")]
    InvalidObject(String),
    #[error("{0}")]
    Script(ScriptError),
}

impl QueryError {
    /// Surface inside a running script: budget exhaustion keeps unwinding, the rest is catchable.
    pub fn into_interrupt(self) -> Interrupt {
        match self {
            QueryError::Script(err) if err.is_limit() => Interrupt::Abort(err),
            other => Interrupt::Throw(error_object("Error", other.to_string())),
        }
    }
}

impl From<Interrupt> for QueryError {
    fn from(i: Interrupt) -> Self {
        QueryError::Script(i.into_error())
    }
}

/// Namespace restriction applied at execution time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryScopeLimiter {
    pub namespace: Option<String>,
}

impl QueryScopeLimiter {
    pub fn namespace(ns: &str) -> Self {
        Self { namespace: Some(ns.to_string()) }
    }

    pub fn cluster() -> Self {
        Self::default()
    }
}

impl From<Option<&str>> for QueryScopeLimiter {
    fn from(ns: Option<&str>) -> Self {
        Self { namespace: ns.map(str::to_string) }
    }
}

/// Outcome of one top-level execution. Failures never escape as errors.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub success: bool,
    pub messages: Vec<String>,
    pub items: Vec<Arc<K8sManifest>>,
}

impl QueryResult {
    pub fn ok(items: Vec<Arc<K8sManifest>>) -> Self {
        Self { success: true, messages: Vec::new(), items }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, messages: vec![message.into()], items: Vec::new() }
    }

    pub fn script_items(&self) -> Vec<Value> {
        self.items.iter().cloned().map(ScriptItem::value).collect()
    }
}

pub mod prelude {
    pub use super::{Query, QueryExecutor, QueryNode, QueryResult, QueryScopeLimiter, ScriptItem};
}
