//! Script-facing query builders.
//!
//! `ApiVersion`, `Union`, `Shortcut`, ... are injected as natives closed over
//! the limiter of the current run; every builder call returns a new [`Query`].

use std::any::Any;
use std::rc::Rc;

use kubelint_registry::LabelFilter;
use kubelint_script::{arg, type_error, EvalResult, HostObject, Interpreter, Interrupt, Namespace, Value};
use metrics::counter;

use crate::node::{K8sQuery, Mapper, Predicate, QueryNode};
use crate::{QueryError, QueryExecutor, QueryScopeLimiter, ScriptItem};

/// Names every script receives from [`query_bindings`].
pub const BUILDER_NAMES: [&str; 12] = [
    "ApiVersion", "Api", "Union", "Transform", "TransformMany", "Filter", "First", "Manual", "Shortcut", "many",
    "single", "count",
];

/// Immutable query handle held by scripts.
pub struct Query {
    node: Rc<QueryNode>,
    limiter: Rc<QueryScopeLimiter>,
}

impl Query {
    pub fn new(node: QueryNode, limiter: Rc<QueryScopeLimiter>) -> Self {
        Self { node: Rc::new(node), limiter }
    }

    pub fn node(&self) -> &Rc<QueryNode> {
        &self.node
    }

    fn derive(&self, node: QueryNode) -> EvalResult<Value> {
        Ok(Value::host(Query::new(node, Rc::clone(&self.limiter))))
    }

    fn k8s_method(&self, q: &K8sQuery, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
        let q = q.clone();
        let next = match name {
            "Kind" => q.kind(&arg(args, 0).to_display()),
            "namespace" => q.namespace(&arg(args, 0).to_display()),
            "allNamespaces" => q.all_namespaces(),
            "name" => q.name(&arg(args, 0).to_display()),
            "label" => {
                let mut filter = LabelFilter::new();
                filter.insert(arg(args, 0).to_display(), arg(args, 1).to_display());
                q.labels(filter)
            }
            "labels" => match label_map(&arg(args, 0)) {
                Ok(filter) => q.labels(filter),
                Err(err) => return Some(Err(err)),
            },
            _ => return None,
        };
        Some(self.derive(QueryNode::K8s(next)))
    }
}

#[derive(Clone, Copy)]
enum Fetch {
    Many,
    Single,
    Count,
}

fn fetch(interp: &mut Interpreter, node: &QueryNode, limiter: &QueryScopeLimiter, mode: Fetch) -> EvalResult<Value> {
    let executor = interp
        .context::<QueryExecutor>()
        .ok_or_else(|| Interrupt::host("queries are not available in this script"))?;
    counter!("query_executions", 1u64);
    let items = executor.resolve(interp, node, limiter).map_err(QueryError::into_interrupt)?;
    Ok(match mode {
        Fetch::Many => Value::array(items.into_iter().map(ScriptItem::value).collect()),
        Fetch::Single => items.into_iter().next().map_or(Value::Null, ScriptItem::value),
        Fetch::Count => Value::from(items.len()),
    })
}

fn label_map(v: &Value) -> EvalResult<LabelFilter> {
    match v {
        Value::Object(map) => Ok(map.borrow().iter().map(|(k, v)| (k.to_string(), v.to_display())).collect()),
        other => Err(type_error(format!("labels() expects an object, got {}", other.type_of()))),
    }
}

fn query_arg(v: &Value, what: &str) -> EvalResult<Rc<QueryNode>> {
    match v.as_host::<Query>() {
        Some(q) => Ok(Rc::clone(&q.node)),
        None => Err(type_error(format!("{what}() expects a query, got {}", v.type_of()))),
    }
}

fn function_arg(v: &Value, what: &str) -> EvalResult<Option<Value>> {
    match v {
        Value::Undefined => Ok(None),
        f if f.is_callable() => Ok(Some(f.clone())),
        other => Err(type_error(format!("{what}() expects a function, got {}", other.type_of()))),
    }
}

fn query_args(args: &[Value], what: &str) -> EvalResult<Vec<Rc<QueryNode>>> {
    args.iter().map(|v| query_arg(v, what)).collect()
}

impl HostObject for Query {
    fn type_name(&self) -> &str {
        "Query"
    }

    fn get(&self, _interp: &mut Interpreter, key: &str) -> EvalResult<Value> {
        Ok(match key {
            "kind" => Value::string(self.node.tag()),
            _ => Value::Undefined,
        })
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
        let mode = match name {
            "many" | "toArray" => Some(Fetch::Many),
            "single" => Some(Fetch::Single),
            "count" => Some(Fetch::Count),
            _ => None,
        };
        if let Some(mode) = mode {
            return Some(fetch(interp, &self.node, &self.limiter, mode));
        }
        match (&*self.node, name) {
            (QueryNode::K8s(q), _) => self.k8s_method(q, name, args),
            (QueryNode::Transform { inner, .. }, "To") => Some(function_arg(&arg(args, 0), "To").and_then(|f| {
                self.derive(QueryNode::Transform { inner: Rc::clone(inner), mapper: f.map(Mapper::Script) })
            })),
            (QueryNode::TransformMany { inner, .. }, "To") => Some(function_arg(&arg(args, 0), "To").and_then(|f| {
                self.derive(QueryNode::TransformMany { inner: Rc::clone(inner), mapper: f.map(Mapper::Script) })
            })),
            (QueryNode::Filter { inner, .. }, "Criteria") => Some(function_arg(&arg(args, 0), "Criteria").and_then(|f| {
                self.derive(QueryNode::Filter { inner: Rc::clone(inner), predicate: f.map(Predicate::Script) })
            })),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<Rc<str>> {
        vec![Rc::from("kind")]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builder natives and `many/single/count`, bound to `limiter`.
pub fn query_bindings(limiter: &QueryScopeLimiter) -> Vec<(&'static str, Value)> {
    let limiter = Rc::new(limiter.clone());
    let query = {
        let limiter = Rc::clone(&limiter);
        move |node: QueryNode| -> EvalResult<Value> { Ok(Value::host(Query::new(node, Rc::clone(&limiter)))) }
    };

    let mut out: Vec<(&'static str, Value)> = Vec::with_capacity(BUILDER_NAMES.len());
    let q = query.clone();
    out.push(("ApiVersion", Value::native("ApiVersion", move |_, _, args| {
        q(K8sQuery::api_version(&arg(args, 0).to_display()).into())
    })));
    let q = query.clone();
    out.push(("Api", Value::native("Api", move |_, _, args| {
        let group = match arg(args, 0) {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_display(),
        };
        q(K8sQuery::api(&group).into())
    })));
    let q = query.clone();
    out.push(("Union", Value::native("Union", move |_, _, args| q(QueryNode::Union(query_args(args, "Union")?)))));
    let q = query.clone();
    out.push(("Transform", Value::native("Transform", move |_, _, args| {
        let inner = query_arg(&arg(args, 0), "Transform")?;
        let mapper = function_arg(&arg(args, 1), "Transform")?.map(Mapper::Script);
        q(QueryNode::Transform { inner, mapper })
    })));
    let q = query.clone();
    out.push(("TransformMany", Value::native("TransformMany", move |_, _, args| {
        let inner = query_arg(&arg(args, 0), "TransformMany")?;
        let mapper = function_arg(&arg(args, 1), "TransformMany")?.map(Mapper::Script);
        q(QueryNode::TransformMany { inner, mapper })
    })));
    let q = query.clone();
    out.push(("Filter", Value::native("Filter", move |_, _, args| {
        let inner = query_arg(&arg(args, 0), "Filter")?;
        let predicate = function_arg(&arg(args, 1), "Filter")?.map(Predicate::Script);
        q(QueryNode::Filter { inner, predicate })
    })));
    let q = query.clone();
    out.push(("First", Value::native("First", move |_, _, args| q(QueryNode::First(query_args(args, "First")?)))));
    let q = query.clone();
    out.push(("Manual", Value::native("Manual", move |_, _, args| match function_arg(&arg(args, 0), "Manual")? {
        Some(f) => q(QueryNode::Manual(f)),
        None => Err(type_error("Manual() expects a function")),
    })));
    let q = query;
    out.push(("Shortcut", Value::native("Shortcut", move |_, _, args| {
        let name = arg(args, 0).to_display();
        q(QueryNode::shortcut(&name, args.iter().skip(1).cloned().collect()))
    })));

    for (name, mode) in [("many", Fetch::Many), ("single", Fetch::Single), ("count", Fetch::Count)] {
        let limiter = Rc::clone(&limiter);
        out.push((name, Value::native(name, move |interp, _, args| {
            let node = query_arg(&arg(args, 0), name)?;
            fetch(interp, &node, &limiter, mode)
        })));
    }
    out
}

/// Argument handed to `Manual` callbacks: builders plus fetchers under the same limiter.
pub(crate) fn manual_scope(limiter: &QueryScopeLimiter) -> Value {
    let scope = query_bindings(limiter)
        .into_iter()
        .fold(Namespace::new("QueryScope"), |ns, (name, value)| ns.with(name, value));
    let ns = limiter.namespace.as_deref().map_or(Value::Null, Value::string);
    Value::host(scope.with("namespace", ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_cover_every_builder() {
        let names: Vec<_> = query_bindings(&QueryScopeLimiter::default()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, BUILDER_NAMES);
    }
}
