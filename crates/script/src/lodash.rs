//! The `_` namespace: a lodash-style helper subset for rule scripts.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::builtins::{arg, sort_values, Namespace};
use crate::interp::{EvalResult, Interpreter};
use crate::value::{deep_equals, ObjectMap, Value};

pub(crate) fn namespace() -> Value {
    let ns = Namespace::new("_")
        .function("stableStringify", |_, _, args| Ok(Value::from(stable_stringify(&arg(args, 0).to_json()))))
        .function("isEqual", |_, _, args| Ok(Value::Bool(deep_equals(&arg(args, 0), &arg(args, 1)))))
        .function("keys", |interp, _, args| {
            Ok(Value::array(interp.enumerate_keys(&arg(args, 0)).into_iter().map(Value::String).collect()))
        })
        .function("values", |interp, _, args| {
            let items = entries(interp, &arg(args, 0))?;
            Ok(Value::array(items.into_iter().map(|(_, v)| v).collect()))
        })
        .function("get", |interp, _, args| {
            let found = get_path(interp, &arg(args, 0), &arg(args, 1))?;
            Ok(match found {
                Value::Undefined => arg(args, 2),
                other => other,
            })
        })
        .function("has", |interp, _, args| {
            let path = path_segments(&arg(args, 1));
            let Some((last, parents)) = path.split_last() else { return Ok(Value::Bool(false)) };
            let mut cur = arg(args, 0);
            for seg in parents {
                if cur.is_nullish() {
                    return Ok(Value::Bool(false));
                }
                cur = interp.get_property(&cur, seg)?;
            }
            Ok(Value::Bool(!cur.is_nullish() && interp.enumerate_keys(&cur).contains(last)))
        })
        .function("isEmpty", |interp, _, args| {
            let v = arg(args, 0);
            Ok(Value::Bool(match &v {
                Value::Array(items) => items.borrow().is_empty(),
                Value::String(s) => s.is_empty(),
                Value::Object(_) | Value::Host(_) => interp.enumerate_keys(&v).is_empty(),
                _ => true,
            }))
        })
        .function("isNil", |_, _, args| Ok(Value::Bool(arg(args, 0).is_nullish())))
        .function("isArray", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_)))))
        .function("isObject", |_, _, args| {
            Ok(Value::Bool(matches!(
                arg(args, 0),
                Value::Object(_) | Value::Array(_) | Value::Host(_) | Value::Function(_) | Value::Native(_)
            )))
        })
        .function("isPlainObject", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Object(_)))))
        .function("isString", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::String(_)))))
        .function("isNumber", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Number(_)))))
        .function("isBoolean", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Bool(_)))))
        .function("isFunction", |_, _, args| Ok(Value::Bool(arg(args, 0).is_callable())))
        .function("uniq", |_, _, args| {
            let mut out: Vec<Value> = Vec::new();
            for item in array_items(&arg(args, 0)) {
                if !out.iter().any(|seen| deep_equals(seen, &item)) {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        })
        .function("flatten", |interp, _, args| {
            let mut out = Vec::new();
            for item in array_items(&arg(args, 0)) {
                match item {
                    Value::Array(inner) => {
                        let inner = inner.borrow();
                        interp.check_array_len(out.len() + inner.len())?;
                        out.extend(inner.iter().cloned());
                    }
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        })
        .function("compact", |_, _, args| {
            Ok(Value::array(array_items(&arg(args, 0)).into_iter().filter(Value::truthy).collect()))
        })
        .function("head", |_, _, args| Ok(array_items(&arg(args, 0)).into_iter().next().unwrap_or_default()))
        .function("first", |_, _, args| Ok(array_items(&arg(args, 0)).into_iter().next().unwrap_or_default()))
        .function("last", |_, _, args| Ok(array_items(&arg(args, 0)).pop().unwrap_or_default()))
        .function("includes", |interp, _, args| {
            let needle = arg(args, 1);
            Ok(Value::Bool(match arg(args, 0) {
                Value::String(s) => s.contains(needle.to_display().as_str()),
                other => entries(interp, &other)?.iter().any(|(_, v)| deep_equals(v, &needle)),
            }))
        })
        .function("map", |interp, _, args| {
            let mut out = Vec::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                out.push(apply_iteratee(interp, &arg(args, 1), &item, &key)?);
            }
            Ok(Value::array(out))
        })
        .function("filter", |interp, _, args| {
            let mut out = Vec::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                if apply_iteratee(interp, &arg(args, 1), &item, &key)?.truthy() {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        })
        .function("reject", |interp, _, args| {
            let mut out = Vec::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                if !apply_iteratee(interp, &arg(args, 1), &item, &key)?.truthy() {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        })
        .function("find", |interp, _, args| {
            for (key, item) in entries(interp, &arg(args, 0))? {
                if apply_iteratee(interp, &arg(args, 1), &item, &key)?.truthy() {
                    return Ok(item);
                }
            }
            Ok(Value::Undefined)
        })
        .function("some", |interp, _, args| {
            for (key, item) in entries(interp, &arg(args, 0))? {
                if apply_iteratee(interp, &arg(args, 1), &item, &key)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        })
        .function("every", |interp, _, args| {
            for (key, item) in entries(interp, &arg(args, 0))? {
                if !apply_iteratee(interp, &arg(args, 1), &item, &key)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        })
        .function("sum", |_, _, args| Ok(Value::Number(array_items(&arg(args, 0)).iter().map(Value::to_number).sum())))
        .function("max", |_, _, args| Ok(extreme(array_items(&arg(args, 0)), Ordering::Greater)))
        .function("min", |_, _, args| Ok(extreme(array_items(&arg(args, 0)), Ordering::Less)))
        .function("size", |interp, _, args| {
            let v = arg(args, 0);
            Ok(Value::from(match &v {
                Value::Array(items) => items.borrow().len(),
                Value::String(s) => s.chars().count(),
                Value::Object(_) | Value::Host(_) => interp.enumerate_keys(&v).len(),
                _ => 0,
            }))
        })
        .function("defaults", |interp, _, args| {
            let target = arg(args, 0);
            for source in args.iter().skip(1) {
                for key in interp.enumerate_keys(source) {
                    if matches!(interp.get_property(&target, &key)?, Value::Undefined) {
                        let v = interp.get_property(source, &key)?;
                        interp.set_property(&target, &key, v)?;
                    }
                }
            }
            Ok(target)
        })
        .function("pick", |interp, _, args| {
            let source = arg(args, 0);
            let mut out = ObjectMap::new();
            for key in key_list(&args[1.min(args.len())..]) {
                let v = interp.get_property(&source, &key)?;
                if !matches!(v, Value::Undefined) {
                    out.insert(key, v);
                }
            }
            Ok(Value::object(out))
        })
        .function("omit", |interp, _, args| {
            let source = arg(args, 0);
            let omitted = key_list(&args[1.min(args.len())..]);
            let mut out = ObjectMap::new();
            for (key, v) in entries(interp, &source)? {
                if !omitted.contains(&key) {
                    out.insert(key, v);
                }
            }
            Ok(Value::object(out))
        })
        .function("mapValues", |interp, _, args| {
            let mut out = ObjectMap::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                let v = apply_iteratee(interp, &arg(args, 1), &item, &key)?;
                out.insert(key, v);
            }
            Ok(Value::object(out))
        })
        .function("keyBy", |interp, _, args| {
            let mut out = ObjectMap::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                let k = apply_iteratee(interp, &arg(args, 1), &item, &key)?.to_property_key();
                out.insert(k, item);
            }
            Ok(Value::object(out))
        })
        .function("groupBy", |interp, _, args| {
            let mut groups: IndexMap<Rc<str>, Vec<Value>> = IndexMap::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                let k = apply_iteratee(interp, &arg(args, 1), &item, &key)?.to_property_key();
                groups.entry(k).or_default().push(item);
            }
            Ok(Value::object(groups.into_iter().map(|(k, v)| (k, Value::array(v))).collect()))
        })
        .function("countBy", |interp, _, args| {
            let mut counts: IndexMap<Rc<str>, usize> = IndexMap::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                let k = apply_iteratee(interp, &arg(args, 1), &item, &key)?.to_property_key();
                *counts.entry(k).or_default() += 1;
            }
            Ok(Value::object(counts.into_iter().map(|(k, n)| (k, Value::from(n))).collect()))
        })
        .function("sortBy", |interp, _, args| {
            let mut keyed = Vec::new();
            for (key, item) in entries(interp, &arg(args, 0))? {
                let sort_key = apply_iteratee(interp, &arg(args, 1), &item, &key)?;
                keyed.push(Value::array(vec![sort_key, item]));
            }
            let sorted = sort_values(keyed, &mut |a: &Value, b: &Value| Ok(compare_keys(&pair_first(a), &pair_first(b))))?;
            Ok(Value::array(sorted.iter().map(pair_second).collect()))
        })
        .function("cloneDeep", |_, _, args| Ok(arg(args, 0).deep_clone()))
        .function("toPairs", |interp, _, args| {
            let items = entries(interp, &arg(args, 0))?;
            Ok(Value::array(items.into_iter().map(|(k, v)| Value::array(vec![Value::String(k), v])).collect()))
        })
        .function("startsWith", |_, _, args| {
            Ok(Value::Bool(arg(args, 0).to_display().starts_with(arg(args, 1).to_display().as_str())))
        })
        .function("endsWith", |_, _, args| {
            Ok(Value::Bool(arg(args, 0).to_display().ends_with(arg(args, 1).to_display().as_str())))
        })
        .function("toLower", |_, _, args| Ok(Value::from(nil_to_empty(&arg(args, 0)).to_lowercase())))
        .function("toUpper", |_, _, args| Ok(Value::from(nil_to_empty(&arg(args, 0)).to_uppercase())))
        .function("trim", |_, _, args| Ok(Value::string(nil_to_empty(&arg(args, 0)).trim())));
    Value::host(ns)
}

fn nil_to_empty(v: &Value) -> String {
    if v.is_nullish() {
        String::new()
    } else {
        v.to_display()
    }
}

fn array_items(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.borrow().clone(),
        _ => Vec::new(),
    }
}

/// `(key, value)` pairs of an array (index keys) or object.
fn entries(interp: &mut Interpreter, v: &Value) -> EvalResult<Vec<(Rc<str>, Value)>> {
    match v {
        Value::Array(items) => Ok(items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, item)| (Rc::from(i.to_string().as_str()), item.clone()))
            .collect()),
        Value::Object(map) => Ok(map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Host(_) => {
            let mut out = Vec::new();
            for key in interp.enumerate_keys(v) {
                let item = interp.get_property(v, &key)?;
                out.push((key, item));
            }
            Ok(out)
        }
        _ => Ok(Vec::new()),
    }
}

fn key_list(args: &[Value]) -> Vec<Rc<str>> {
    let mut out = Vec::new();
    for a in args {
        match a {
            Value::Array(items) => out.extend(items.borrow().iter().map(Value::to_property_key)),
            other => out.push(other.to_property_key()),
        }
    }
    out
}

/// Lodash iteratee shorthands: function, property path, or partial-match object.
fn apply_iteratee(interp: &mut Interpreter, iteratee: &Value, item: &Value, key: &str) -> EvalResult<Value> {
    match iteratee {
        Value::Undefined | Value::Null => Ok(item.clone()),
        f if f.is_callable() => interp.call_function(f, Value::Undefined, &[item.clone(), Value::string(key)]),
        Value::String(_) | Value::Array(_) => get_path(interp, item, iteratee),
        Value::Object(matcher) => {
            let matcher: Vec<(Rc<str>, Value)> = matcher.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            if item.is_nullish() {
                return Ok(Value::Bool(false));
            }
            for (k, expected) in matcher {
                let actual = interp.get_property(item, &k)?;
                if !partial_match(&actual, &expected) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        other => get_path(interp, item, &Value::from(other.to_display())),
    }
}

fn partial_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(a), Value::Object(e)) => {
            let (a, e) = (a.borrow(), e.borrow());
            e.iter().all(|(k, ev)| a.get(k).is_some_and(|av| partial_match(av, ev)))
        }
        _ => deep_equals(actual, expected),
    }
}

/// Split `a.b[0].c` (or an array of keys) into path segments.
fn path_segments(path: &Value) -> Vec<Rc<str>> {
    match path {
        Value::Array(items) => items.borrow().iter().map(Value::to_property_key).collect(),
        Value::Undefined | Value::Null => Vec::new(),
        other => {
            let text = other.to_display();
            text.split(['.', '[', ']'])
                .filter(|seg| !seg.is_empty())
                .map(|seg| Rc::from(seg.trim_matches(|c: char| c == '"' || c == '\'')))
                .collect()
        }
    }
}

fn get_path(interp: &mut Interpreter, root: &Value, path: &Value) -> EvalResult<Value> {
    let mut cur = root.clone();
    for seg in path_segments(path) {
        if cur.is_nullish() {
            return Ok(Value::Undefined);
        }
        cur = interp.get_property(&cur, &seg)?;
    }
    Ok(cur)
}

fn pair_first(v: &Value) -> Value {
    match v {
        Value::Array(items) => items.borrow().first().cloned().unwrap_or_default(),
        _ => Value::Undefined,
    }
}

fn pair_second(v: &Value) -> Value {
    match v {
        Value::Array(items) => items.borrow().get(1).cloned().unwrap_or_default(),
        _ => Value::Undefined,
    }
}

/// Ordering used by `sortBy`: numbers numerically, everything else as text,
/// `undefined` last.
fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => a.to_display().cmp(&b.to_display()),
    }
}

fn extreme(items: Vec<Value>, want: Ordering) -> Value {
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(current) if compare_keys(&item, &current) != want => Some(current),
            _ => Some(item),
        };
    }
    best.unwrap_or_default()
}

/// JSON with object keys sorted at every level.
pub fn stable_stringify(json: &Json) -> String {
    fn sorted(json: &Json) -> Json {
        match json {
            Json::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Json::Object(keys.into_iter().map(|k| (k.clone(), sorted(&map[k]))).collect())
            }
            Json::Array(items) => Json::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(json).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_stringify_sorts_nested_keys() {
        let a = stable_stringify(&json!({"b": 1, "a": {"d": [2, {"z": 1, "y": 2}], "c": null}}));
        assert_eq!(a, r#"{"a":{"c":null,"d":[2,{"y":2,"z":1}]},"b":1}"#);
    }

    #[test]
    fn path_segments_understand_brackets() {
        let segs = path_segments(&Value::string("spec.containers[0].image"));
        let segs: Vec<&str> = segs.iter().map(|s| &**s).collect();
        assert_eq!(segs, vec!["spec", "containers", "0", "image"]);
    }
}
