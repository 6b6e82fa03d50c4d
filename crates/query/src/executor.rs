use std::rc::Rc;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use kubelint_core::K8sManifest;
use kubelint_registry::RegistryQueryExecutor;
use kubelint_script::{Interpreter, Value};
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::builder::{manual_scope, Query};
use crate::node::{Mapper, Predicate, QueryNode};
use crate::{QueryError, QueryResult, QueryScopeLimiter, ScriptItem, ShortcutLibrary};

/// Resolves query nodes against one registry.
///
/// Installed as the interpreter context so `many/single/count` inside
/// scripts reach the same registry.
pub struct QueryExecutor {
    registry: Arc<dyn RegistryQueryExecutor>,
    shortcuts: ShortcutLibrary,
}

impl QueryExecutor {
    pub fn new(registry: Arc<dyn RegistryQueryExecutor>) -> Self {
        Self { registry, shortcuts: ShortcutLibrary::default() }
    }

    pub fn with_shortcuts(mut self, shortcuts: ShortcutLibrary) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    pub fn registry(&self) -> &Arc<dyn RegistryQueryExecutor> {
        &self.registry
    }

    pub fn shortcuts(&self) -> &ShortcutLibrary {
        &self.shortcuts
    }

    /// Top-level entry point: any failure becomes a failed result.
    pub fn execute(&self, interp: &mut Interpreter, node: &QueryNode, limiter: &QueryScopeLimiter) -> QueryResult {
        counter!("query_executions", 1u64);
        match self.resolve(interp, node, limiter) {
            Ok(items) => {
                trace!(node = node.tag(), ns = ?limiter.namespace, count = items.len(), "query executed");
                QueryResult::ok(items)
            }
            Err(err) => {
                debug!(node = node.tag(), ns = ?limiter.namespace, error = %err, "query failed");
                QueryResult::failed(err.to_string())
            }
        }
    }

    pub fn resolve(
        &self,
        interp: &mut Interpreter,
        node: &QueryNode,
        limiter: &QueryScopeLimiter,
    ) -> Result<Vec<Arc<K8sManifest>>, QueryError> {
        match node {
            QueryNode::K8s(q) => Ok(self.registry.query(&q.to_filter(limiter)?)),
            QueryNode::Union(nodes) => {
                let mut seen: IndexMap<String, Arc<K8sManifest>> = IndexMap::new();
                for inner in nodes {
                    for m in self.resolve(interp, inner, limiter)? {
                        seen.entry(m.id().key()).or_insert(m);
                    }
                }
                Ok(seen.into_values().collect())
            }
            QueryNode::Transform { inner, mapper } => {
                let mapper = mapper.as_ref().ok_or(QueryError::MissingFunction("Transform"))?;
                self.transform(interp, inner, mapper, limiter, false)
            }
            QueryNode::TransformMany { inner, mapper } => {
                let mapper = mapper.as_ref().ok_or(QueryError::MissingFunction("TransformMany"))?;
                self.transform(interp, inner, mapper, limiter, true)
            }
            QueryNode::Filter { inner, predicate } => {
                let predicate = predicate.as_ref().ok_or(QueryError::MissingFunction("Filter"))?;
                let mut out = Vec::new();
                for m in self.resolve(interp, inner, limiter)? {
                    let keep = match predicate {
                        Predicate::Builtin(f) => f(&m),
                        Predicate::Script(f) => {
                            interp.call_function(f, Value::Undefined, &[ScriptItem::value(m.clone())])?.truthy()
                        }
                    };
                    if keep {
                        out.push(m);
                    }
                }
                Ok(out)
            }
            QueryNode::First(nodes) => {
                for inner in nodes {
                    if let Some(first) = self.resolve(interp, inner, limiter)?.into_iter().next() {
                        return Ok(vec![first]);
                    }
                }
                Ok(Vec::new())
            }
            QueryNode::Manual(f) => {
                let scope = manual_scope(limiter);
                let produced = interp.call_function(f, Value::Undefined, &[scope])?;
                self.collect(interp, &produced, limiter)
            }
            QueryNode::Shortcut { name, args } => {
                let expanded = self.shortcuts.expand(name, args)?;
                self.resolve(interp, &expanded, limiter)
            }
        }
    }

    fn transform(
        &self,
        interp: &mut Interpreter,
        inner: &QueryNode,
        mapper: &Mapper,
        limiter: &QueryScopeLimiter,
        many: bool,
    ) -> Result<Vec<Arc<K8sManifest>>, QueryError> {
        let mut out = Vec::new();
        for m in self.resolve(interp, inner, limiter)? {
            let configs = match mapper {
                Mapper::Builtin(f) => f(&m),
                Mapper::Script(f) => {
                    let produced = interp.call_function(f, Value::Undefined, &[ScriptItem::value(m.clone())])?;
                    match produced {
                        v if v.is_nullish() => Vec::new(),
                        v if many => interp.iterate(&v)?.iter().filter(|x| !x.is_nullish()).map(Value::to_json).collect(),
                        v => vec![v.to_json()],
                    }
                }
            };
            for config in configs {
                out.push(Arc::new(synthesize(config, m.source_ref())?));
            }
        }
        Ok(out)
    }

    /// Manual results: items, queries, plain objects, or arrays of those.
    fn collect(
        &self,
        interp: &mut Interpreter,
        produced: &Value,
        limiter: &QueryScopeLimiter,
    ) -> Result<Vec<Arc<K8sManifest>>, QueryError> {
        if produced.is_nullish() {
            return Ok(Vec::new());
        }
        if let Some(item) = produced.as_host::<ScriptItem>() {
            return Ok(vec![item.manifest().clone()]);
        }
        if let Some(query) = produced.as_host::<Query>() {
            let node = Rc::clone(query.node());
            return self.resolve(interp, &node, limiter);
        }
        if let Value::Array(items) = produced {
            let items = items.borrow().clone();
            let mut out = Vec::new();
            for v in &items {
                out.extend(self.collect(interp, v, limiter)?);
            }
            return Ok(out);
        }
        Ok(vec![Arc::new(synthesize(produced.to_json(), Weak::new())?)])
    }
}

fn synthesize(config: Json, source: Weak<kubelint_core::ManifestSource>) -> Result<K8sManifest, QueryError> {
    K8sManifest::new(config, source).map_err(|err| QueryError::InvalidObject(err.to_string()))
}
