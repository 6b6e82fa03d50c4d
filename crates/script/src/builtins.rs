//! Built-in globals and the methods of primitive values.
//!
//! The global scope is built once per thread and shared by every run. It is
//! immutable: bindings are constant and namespaces are read-only host objects,
//! so one script cannot leak state into the next.

use std::any::Any;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::interp::{error_object, type_error, EvalResult, Interpreter, Interrupt, Scope};
use crate::lodash;
use crate::value::{number_to_string, strict_equals, HostObject, ObjectMap, Value};

thread_local! {
    static GLOBALS: Rc<Scope> = build_globals();
}

pub(crate) fn globals() -> Rc<Scope> {
    GLOBALS.with(Rc::clone)
}

/// Argument `i`, or `undefined`.
pub fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

/// Read-only bag of named values (`Math`, `JSON`, `_`, ...).
pub struct Namespace {
    name: &'static str,
    members: IndexMap<&'static str, Value>,
}

impl Namespace {
    pub fn new(name: &'static str) -> Self {
        Self { name, members: IndexMap::new() }
    }

    pub fn with(mut self, key: &'static str, value: Value) -> Self {
        self.members.insert(key, value);
        self
    }

    pub fn function<F>(self, key: &'static str, func: F) -> Self
    where
        F: Fn(&mut Interpreter, Value, &[Value]) -> EvalResult<Value> + 'static,
    {
        let name = format!("{}.{key}", self.name);
        self.with(key, Value::native(&name, func))
    }
}

impl HostObject for Namespace {
    fn type_name(&self) -> &str {
        self.name
    }

    fn get(&self, _interp: &mut Interpreter, key: &str) -> EvalResult<Value> {
        Ok(self.members.get(key).cloned().unwrap_or_default())
    }

    fn keys(&self) -> Vec<Rc<str>> {
        self.members.keys().map(|k| Rc::from(*k)).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn build_globals() -> Rc<Scope> {
    let scope = Scope::root();
    let define = |name: &str, value: Value| scope.define(name, value, false);

    define("NaN", Value::Number(f64::NAN));
    define("Infinity", Value::Number(f64::INFINITY));
    define("_", lodash::namespace());
    define("Math", math());
    define("JSON", json());
    define("console", console());

    define("Number", Value::native("Number", |_, _, args| Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))));
    define("String", Value::native("String", |_, _, args| Ok(Value::from(args.first().map_or(String::new(), Value::to_display)))));
    define("Boolean", Value::native("Boolean", |_, _, args| Ok(Value::Bool(arg(args, 0).truthy()))));
    define("Object", Value::native("Object", |_, _, args| match arg(args, 0) {
        v @ (Value::Object(_) | Value::Array(_) | Value::Host(_)) => Ok(v),
        _ => Ok(Value::object(ObjectMap::new())),
    }));
    define("Array", Value::native("Array", |_, _, args| Ok(Value::array(args.to_vec()))));
    define("parseInt", Value::native("parseInt", |_, _, args| Ok(Value::Number(parse_int(&arg(args, 0).to_display(), &arg(args, 1))))));
    define("parseFloat", Value::native("parseFloat", |_, _, args| Ok(Value::Number(parse_float(&arg(args, 0).to_display())))));
    define("isNaN", Value::native("isNaN", |_, _, args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))));
    define("isFinite", Value::native("isFinite", |_, _, args| Ok(Value::Bool(arg(args, 0).to_number().is_finite()))));
    for name in ["Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError"] {
        define(name, Value::native(name, move |_, _, args| {
            let message = match arg(args, 0) {
                Value::Undefined => String::new(),
                other => other.to_display(),
            };
            Ok(error_object(name, message))
        }));
    }
    define("RegExp", Value::native("RegExp", |_, _, args| {
        if let Some(re) = arg(args, 0).as_host::<RegExp>() {
            return new_regex(&re.source, &re.flags);
        }
        let flags = match arg(args, 1) {
            Value::Undefined => String::new(),
            other => other.to_display(),
        };
        new_regex(&arg(args, 0).to_display(), &flags)
    }));
    scope
}

/// Members reachable through a global constructor (`Object.keys`, `Number.isInteger`).
pub(crate) fn static_member(owner: &str, key: &str) -> Value {
    match (owner, key) {
        ("Object", "keys") => Value::native("Object.keys", |interp, _, args| {
            Ok(Value::array(interp.enumerate_keys(&arg(args, 0)).into_iter().map(Value::String).collect()))
        }),
        ("Object", "values") => Value::native("Object.values", |interp, _, args| {
            let target = arg(args, 0);
            let mut out = Vec::new();
            for key in interp.enumerate_keys(&target) {
                out.push(interp.get_property(&target, &key)?);
            }
            Ok(Value::array(out))
        }),
        ("Object", "entries") => Value::native("Object.entries", |interp, _, args| {
            let target = arg(args, 0);
            let mut out = Vec::new();
            for key in interp.enumerate_keys(&target) {
                let v = interp.get_property(&target, &key)?;
                out.push(Value::array(vec![Value::String(key), v]));
            }
            Ok(Value::array(out))
        }),
        ("Object", "fromEntries") => Value::native("Object.fromEntries", |interp, _, args| {
            let mut map = ObjectMap::new();
            for entry in interp.iterate(&arg(args, 0))? {
                let pair = interp.iterate(&entry)?;
                map.insert(arg(&pair, 0).to_property_key(), arg(&pair, 1));
            }
            Ok(Value::object(map))
        }),
        ("Object", "assign") => Value::native("Object.assign", |interp, _, args| {
            let target = arg(args, 0);
            for source in args.iter().skip(1).filter(|s| !s.is_nullish()) {
                for key in interp.enumerate_keys(source) {
                    let v = interp.get_property(source, &key)?;
                    interp.set_property(&target, &key, v)?;
                }
            }
            Ok(target)
        }),
        ("Object", "freeze") => Value::native("Object.freeze", |_, _, args| Ok(arg(args, 0))),
        ("Array", "isArray") => Value::native("Array.isArray", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))),
        ("Array", "from") => Value::native("Array.from", |interp, _, args| {
            let items = match arg(args, 0) {
                Value::Undefined | Value::Null => Vec::new(),
                v => interp.iterate(&v)?,
            };
            let f = arg(args, 1);
            if !f.is_callable() {
                return Ok(Value::array(items));
            }
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(interp.call_function(&f, Value::Undefined, &[item, Value::from(i)])?);
            }
            Ok(Value::array(out))
        }),
        ("Number", "isInteger") => Value::native("Number.isInteger", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0)))
        }),
        ("Number", "isFinite") => Value::native("Number.isFinite", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
        }),
        ("Number", "isNaN") => Value::native("Number.isNaN", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())))
        }),
        ("Number", "parseFloat") => Value::native("Number.parseFloat", |_, _, args| Ok(Value::Number(parse_float(&arg(args, 0).to_display())))),
        ("Number", "parseInt") => Value::native("Number.parseInt", |_, _, args| Ok(Value::Number(parse_int(&arg(args, 0).to_display(), &arg(args, 1))))),
        ("Number", "MAX_SAFE_INTEGER") => Value::Number(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => Value::Number(-9_007_199_254_740_991.0),
        _ => Value::Undefined,
    }
}

fn math() -> Value {
    fn unary(ns: Namespace, key: &'static str, f: fn(f64) -> f64) -> Namespace {
        ns.function(key, move |_, _, args| Ok(Value::Number(f(arg(args, 0).to_number()))))
    }
    let mut ns = Namespace::new("Math").with("PI", Value::Number(std::f64::consts::PI)).with("E", Value::Number(std::f64::consts::E));
    ns = unary(ns, "abs", f64::abs);
    ns = unary(ns, "floor", f64::floor);
    ns = unary(ns, "ceil", f64::ceil);
    ns = unary(ns, "round", |n| (n + 0.5).floor());
    ns = unary(ns, "trunc", f64::trunc);
    ns = unary(ns, "sqrt", f64::sqrt);
    ns = unary(ns, "log", f64::ln);
    ns = unary(ns, "log10", f64::log10);
    ns = unary(ns, "log2", f64::log2);
    ns = unary(ns, "sign", |n| if n.is_nan() || n == 0.0 { n } else { n.signum() });
    ns = ns.function("pow", |_, _, args| Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number()))));
    ns = ns.function("max", |_, _, args| {
        Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) })))
    });
    ns = ns.function("min", |_, _, args| {
        Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) })))
    });
    Value::host(ns)
}

fn json() -> Value {
    let ns = Namespace::new("JSON")
        .function("stringify", |_, _, args| {
            let v = arg(args, 0);
            if matches!(v, Value::Undefined | Value::Function(_) | Value::Native(_)) {
                return Ok(Value::Undefined);
            }
            let json = v.to_json();
            let pretty = match arg(args, 2) {
                Value::Number(n) => n >= 1.0,
                Value::String(s) => !s.is_empty(),
                _ => false,
            };
            let text = if pretty { serde_json::to_string_pretty(&json) } else { serde_json::to_string(&json) };
            text.map(Value::from).map_err(|e| Interrupt::host(format!("JSON.stringify failed: {e}")))
        })
        .function("parse", |_, _, args| {
            let text = arg(args, 0).to_display();
            serde_json::from_str::<Json>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| Interrupt::Throw(error_object("SyntaxError", format!("JSON.parse: {e}"))))
        });
    Value::host(ns)
}

fn console() -> Value {
    fn join(args: &[Value]) -> String {
        args.iter()
            .map(|v| match v {
                Value::String(s) => s.to_string(),
                Value::Array(_) | Value::Object(_) => v.to_json().to_string(),
                other => other.to_display(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
    let ns = Namespace::new("console")
        .function("log", |_, _, args| {
            debug!(target: "kubelint::script", "{}", join(args));
            Ok(Value::Undefined)
        })
        .function("info", |_, _, args| {
            info!(target: "kubelint::script", "{}", join(args));
            Ok(Value::Undefined)
        })
        .function("warn", |_, _, args| {
            warn!(target: "kubelint::script", "{}", join(args));
            Ok(Value::Undefined)
        })
        .function("error", |_, _, args| {
            warn!(target: "kubelint::script", "{}", join(args));
            Ok(Value::Undefined)
        });
    Value::host(ns)
}

fn parse_int(text: &str, radix: &Value) -> f64 {
    let mut s = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let mut radix = match radix {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if radix == 16 || matches!(radix, 10) && (s.starts_with("0x") || s.starts_with("0X")) {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut n = 0.0;
    for c in digits.chars() {
        n = n * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0));
    }
    sign * n
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if s.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut seen_digit = false;
    while end < bytes.len() {
        let b = bytes[end];
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 || matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    // Back off until the prefix parses ("1e" -> "1").
    while end > 0 {
        if let Ok(n) = s[..end].parse::<f64>() {
            return n;
        }
        end -= 1;
    }
    f64::NAN
}

// ---------------- regular expressions ----------------

/// Compiled regular expression value.
pub struct RegExp {
    pub source: String,
    pub flags: String,
    pub regex: Regex,
}

impl RegExp {
    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

pub fn new_regex(pattern: &str, flags: &str) -> EvalResult<Value> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .size_limit(1 << 20)
        .build()
        .map_err(|e| Interrupt::Throw(error_object("SyntaxError", format!("Invalid regular expression /{pattern}/: {e}"))))?;
    Ok(Value::host(RegExp { source: pattern.to_string(), flags: flags.to_string(), regex }))
}

fn match_array(caps: &regex::Captures<'_>) -> Value {
    Value::array(
        caps.iter()
            .map(|m| m.map_or(Value::Undefined, |m| Value::string(m.as_str())))
            .collect(),
    )
}

impl HostObject for RegExp {
    fn type_name(&self) -> &str {
        "RegExp"
    }

    fn get(&self, _interp: &mut Interpreter, key: &str) -> EvalResult<Value> {
        Ok(match key {
            "source" => Value::string(&self.source),
            "flags" => Value::string(&self.flags),
            "global" => Value::Bool(self.is_global()),
            "ignoreCase" => Value::Bool(self.flags.contains('i')),
            _ => Value::Undefined,
        })
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
        let text = arg(args, 0).to_display();
        match name {
            "test" => Some(Ok(Value::Bool(self.regex.is_match(&text)))),
            "exec" => Some(Ok(self.regex.captures(&text).map_or(Value::Null, |caps| match_array(&caps)))),
            "toString" => Some(Ok(Value::from(format!("/{}/{}", self.source, self.flags)))),
            _ => None,
        }
    }

    fn to_json(&self) -> Json {
        Json::Object(serde_json::Map::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------- primitive methods ----------------

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "join", "indexOf", "lastIndexOf", "includes",
    "map", "filter", "forEach", "find", "findIndex", "findLast", "some", "every", "reduce", "flatMap", "flat",
    "sort", "reverse", "at", "entries", "keys", "toString",
];

const STRING_METHODS: &[&str] = &[
    "charAt", "charCodeAt", "indexOf", "lastIndexOf", "includes", "startsWith", "endsWith", "slice", "substring",
    "substr", "toLowerCase", "toUpperCase", "trim", "trimStart", "trimEnd", "split", "replace", "replaceAll",
    "match", "search", "padStart", "padEnd", "repeat", "concat", "at", "localeCompare", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

/// Method looked up as a property (`const f = arr.map`); bound to its receiver.
pub(crate) fn bound_method(receiver: &Value, key: &str) -> Value {
    let known = match receiver {
        Value::Array(_) => ARRAY_METHODS.contains(&key),
        Value::String(_) => STRING_METHODS.contains(&key),
        Value::Number(_) => NUMBER_METHODS.contains(&key),
        _ => false,
    };
    if !known {
        return Value::Undefined;
    }
    let recv = receiver.clone();
    let name: Rc<str> = Rc::from(key);
    Value::native(key, move |interp, _, args| {
        call_method(interp, &recv, &name, args).unwrap_or_else(|| Err(type_error(format!("{name} is not a function"))))
    })
}

pub(crate) fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    match receiver {
        Value::Array(_) => array_method(interp, receiver, name, args),
        Value::String(s) => string_method(interp, s, name, args),
        Value::Number(n) => number_method(*n, name, args),
        Value::Object(map) => match name {
            "hasOwnProperty" => Some(Ok(Value::Bool(map.borrow().contains_key(&*arg(args, 0).to_property_key())))),
            "toString" => Some(Ok(Value::from(receiver.to_display()))),
            _ => None,
        },
        _ => None,
    }
}

/// Relative index as `slice` interprets it.
fn relative_index(v: &Value, len: usize, default: usize) -> usize {
    if matches!(v, Value::Undefined) {
        return default;
    }
    let n = v.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// Stable merge sort with a comparator that may fail.
pub(crate) fn sort_values(
    items: Vec<Value>,
    cmp: &mut dyn FnMut(&Value, &Value) -> EvalResult<Ordering>,
) -> EvalResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut items = items;
    let right = items.split_off(items.len() / 2);
    let left = sort_values(items, cmp)?;
    let right = sort_values(right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if cmp(l, r)? == Ordering::Greater {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => a.to_display().cmp(&b.to_display()),
    }
}

fn array_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let Value::Array(cell) = receiver else { return None };
    let snapshot = || cell.borrow().clone();
    let callback = || arg(args, 0);

    let result = match name {
        "push" => {
            let mut items = cell.borrow_mut();
            items.extend(args.iter().cloned());
            Ok(Value::from(items.len()))
        }
        "pop" => Ok(cell.borrow_mut().pop().unwrap_or_default()),
        "shift" => {
            let mut items = cell.borrow_mut();
            Ok(if items.is_empty() { Value::Undefined } else { items.remove(0) })
        }
        "unshift" => {
            let mut items = cell.borrow_mut();
            for (i, v) in args.iter().enumerate() {
                items.insert(i, v.clone());
            }
            Ok(Value::from(items.len()))
        }
        "slice" => {
            let items = cell.borrow();
            let start = relative_index(&arg(args, 0), items.len(), 0);
            let end = relative_index(&arg(args, 1), items.len(), items.len());
            Ok(Value::array(if start < end { items[start..end].to_vec() } else { Vec::new() }))
        }
        "splice" => {
            let mut items = cell.borrow_mut();
            let len = items.len();
            let start = relative_index(&arg(args, 0), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(v) => (v.to_number().max(0.0) as usize).min(len - start),
            };
            let removed: Vec<Value> = items.splice(start..start + count, args.iter().skip(2).cloned()).collect();
            Ok(Value::array(removed))
        }
        "concat" => {
            let mut out = snapshot();
            for a in args {
                match a {
                    Value::Array(other) => {
                        let other = other.borrow();
                        if let Err(e) = interp.check_array_len(out.len() + other.len()) {
                            return Some(Err(e));
                        }
                        out.extend(other.iter().cloned());
                    }
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::array(out))
        }
        "join" | "toString" => {
            let sep = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other if name == "join" => other.to_display(),
                _ => ",".to_string(),
            };
            let mut out = String::new();
            for (i, v) in cell.borrow().iter().enumerate() {
                let piece = if v.is_nullish() { String::new() } else { v.to_display() };
                let sep = if i == 0 { "" } else { sep.as_str() };
                if let Err(e) = interp.check_string_len(out.len() + sep.len() + piece.len()) {
                    return Some(Err(e));
                }
                out.push_str(sep);
                out.push_str(&piece);
            }
            Ok(Value::from(out))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Ok(Value::Number(cell.borrow().iter().position(|v| strict_equals(v, &needle)).map_or(-1.0, |i| i as f64)))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0);
            Ok(Value::Number(cell.borrow().iter().rposition(|v| strict_equals(v, &needle)).map_or(-1.0, |i| i as f64)))
        }
        "includes" => {
            let needle = arg(args, 0);
            Ok(Value::Bool(cell.borrow().iter().any(|v| same_value_zero(v, &needle))))
        }
        "at" => {
            let items = cell.borrow();
            let i = arg(args, 0).to_number();
            let idx = if i < 0.0 { items.len() as f64 + i } else { i };
            Ok(if idx >= 0.0 { items.get(idx as usize).cloned().unwrap_or_default() } else { Value::Undefined })
        }
        "entries" => Ok(Value::array(
            snapshot().into_iter().enumerate().map(|(i, v)| Value::array(vec![Value::from(i), v])).collect(),
        )),
        "keys" => Ok(Value::array((0..cell.borrow().len()).map(Value::from).collect())),
        "reverse" => {
            cell.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        "flat" => {
            let depth = match arg(args, 0) {
                Value::Undefined => 1,
                v => v.to_number().max(0.0) as usize,
            };
            let mut out = Vec::new();
            match flatten(interp, &snapshot(), depth, &mut out) {
                Ok(()) => Ok(Value::array(out)),
                Err(e) => Err(e),
            }
        }
        "map" | "filter" | "forEach" | "find" | "findIndex" | "findLast" | "some" | "every" | "flatMap" => {
            let f = callback();
            if !f.is_callable() {
                return Some(Err(type_error(format!("{} is not a function", f.to_display()))));
            }
            iterate_with(interp, receiver, snapshot(), name, &f)
        }
        "reduce" => {
            let f = callback();
            if !f.is_callable() {
                return Some(Err(type_error(format!("{} is not a function", f.to_display()))));
            }
            let items = snapshot();
            let mut iter = items.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => return Some(Err(type_error("Reduce of empty array with no initial value"))),
                },
            };
            for (i, item) in iter {
                acc = match interp.call_function(&f, Value::Undefined, &[acc, item, Value::from(i), receiver.clone()]) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e)),
                };
            }
            Ok(acc)
        }
        "sort" => {
            let f = callback();
            let items = snapshot();
            let sorted = if f.is_callable() {
                sort_values(items, &mut |a: &Value, b: &Value| {
                    let n = interp.call_function(&f, Value::Undefined, &[a.clone(), b.clone()])?.to_number();
                    Ok(if n > 0.0 { Ordering::Greater } else if n < 0.0 { Ordering::Less } else { Ordering::Equal })
                })
            } else {
                sort_values(items, &mut |a: &Value, b: &Value| Ok(default_order(a, b)))
            };
            match sorted {
                Ok(sorted) => {
                    *cell.borrow_mut() = sorted;
                    Ok(receiver.clone())
                }
                Err(e) => Err(e),
            }
        }
        _ => return None,
    };
    Some(result)
}

/// Nested arrays deeper than this are left as they are; a self-containing array stops here too.
const MAX_FLAT_DEPTH: usize = 64;

fn flatten(interp: &Interpreter, items: &[Value], depth: usize, out: &mut Vec<Value>) -> EvalResult<()> {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => flatten(interp, &inner.borrow(), depth.min(MAX_FLAT_DEPTH) - 1, out)?,
            other => {
                interp.check_array_len(out.len() + 1)?;
                out.push(other.clone());
            }
        }
    }
    Ok(())
}

fn iterate_with(interp: &mut Interpreter, receiver: &Value, items: Vec<Value>, name: &str, f: &Value) -> EvalResult<Value> {
    let mut mapped = Vec::new();
    let indexed: Box<dyn Iterator<Item = (usize, Value)>> = if name == "findLast" {
        Box::new(items.into_iter().enumerate().rev())
    } else {
        Box::new(items.into_iter().enumerate())
    };
    for (i, item) in indexed {
        let out = interp.call_function(f, Value::Undefined, &[item.clone(), Value::from(i), receiver.clone()])?;
        match name {
            "map" => mapped.push(out),
            "flatMap" => match out {
                Value::Array(inner) => mapped.extend(inner.borrow().iter().cloned()),
                other => mapped.push(other),
            },
            "filter" if out.truthy() => mapped.push(item),
            "find" | "findLast" if out.truthy() => return Ok(item),
            "findIndex" if out.truthy() => return Ok(Value::from(i)),
            "some" if out.truthy() => return Ok(Value::Bool(true)),
            "every" if !out.truthy() => return Ok(Value::Bool(false)),
            _ => {}
        }
    }
    Ok(match name {
        "map" | "filter" | "flatMap" => Value::array(mapped),
        "findIndex" => Value::Number(-1.0),
        "some" => Value::Bool(false),
        "every" => Value::Bool(true),
        _ => Value::Undefined,
    })
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn string_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let len = s.chars().count();
    let text = |i: usize| arg(args, i).to_display();
    let result = match name {
        "charAt" => Ok(Value::from(s.chars().nth(arg(args, 0).to_number().max(0.0) as usize).map(String::from).unwrap_or_default())),
        "charCodeAt" => Ok(s
            .chars()
            .nth(arg(args, 0).to_number().max(0.0) as usize)
            .map_or(Value::Number(f64::NAN), |c| Value::Number(f64::from(u32::from(c))))),
        "indexOf" => Ok(Value::Number(char_position(s, &text(0), false))),
        "lastIndexOf" => Ok(Value::Number(char_position(s, &text(0), true))),
        "includes" => Ok(Value::Bool(s.contains(text(0).as_str()))),
        "startsWith" => Ok(Value::Bool(s.starts_with(text(0).as_str()))),
        "endsWith" => Ok(Value::Bool(s.ends_with(text(0).as_str()))),
        "slice" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Ok(Value::from(char_slice(s, start, end)))
        }
        "substring" => {
            let clamp = |v: Value, default: usize| match v {
                Value::Undefined => default,
                v => (v.to_number().max(0.0) as usize).min(len),
            };
            let (a, b) = (clamp(arg(args, 0), 0), clamp(arg(args, 1), len));
            Ok(Value::from(char_slice(s, a.min(b), a.max(b))))
        }
        "substr" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let count = match arg(args, 1) {
                Value::Undefined => len,
                v => v.to_number().max(0.0) as usize,
            };
            Ok(Value::from(char_slice(s, start, start.saturating_add(count))))
        }
        "toLowerCase" => Ok(Value::from(s.to_lowercase())),
        "toUpperCase" => Ok(Value::from(s.to_uppercase())),
        "trim" => Ok(Value::string(s.trim())),
        "trimStart" => Ok(Value::string(s.trim_start())),
        "trimEnd" => Ok(Value::string(s.trim_end())),
        "padStart" | "padEnd" => {
            let target = arg(args, 0).to_number().max(0.0) as usize;
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                v => v.to_display(),
            };
            if target <= len || fill.is_empty() {
                Ok(Value::String(s.clone()))
            } else if let Err(e) = interp.check_string_len(s.len().saturating_add(target - len)) {
                Err(e)
            } else {
                let pad: String = fill.chars().cycle().take(target - len).collect();
                Ok(Value::from(if name == "padStart" { format!("{pad}{s}") } else { format!("{s}{pad}") }))
            }
        }
        "repeat" => {
            let n = arg(args, 0).to_number();
            if n < 0.0 || !n.is_finite() {
                Err(Interrupt::Throw(error_object("RangeError", "Invalid count value")))
            } else if let Err(e) = interp.check_string_len((n as usize).saturating_mul(s.len())) {
                Err(e)
            } else {
                Ok(Value::from(s.repeat(n as usize)))
            }
        }
        "concat" => {
            let mut out = s.to_string();
            for v in args {
                let piece = v.to_display();
                if let Err(e) = interp.check_string_len(out.len() + piece.len()) {
                    return Some(Err(e));
                }
                out.push_str(&piece);
            }
            Ok(Value::from(out))
        }
        "at" => {
            let i = arg(args, 0).to_number();
            let idx = if i < 0.0 { len as f64 + i } else { i };
            Ok(if idx >= 0.0 {
                s.chars().nth(idx as usize).map_or(Value::Undefined, |c| Value::from(c.to_string()))
            } else {
                Value::Undefined
            })
        }
        "localeCompare" => Ok(Value::Number(match (**s).cmp(text(0).as_str()) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        })),
        "toString" => Ok(Value::String(s.clone())),
        "split" => Ok(split(s, &arg(args, 0), &arg(args, 1))),
        "match" => Ok(match arg(args, 0).as_host::<RegExp>() {
            Some(re) if re.is_global() => {
                let all: Vec<Value> = re.regex.find_iter(s).map(|m| Value::string(m.as_str())).collect();
                if all.is_empty() { Value::Null } else { Value::array(all) }
            }
            Some(re) => re.regex.captures(s).map_or(Value::Null, |caps| match_array(&caps)),
            None => {
                let needle = text(0);
                if s.contains(needle.as_str()) { Value::array(vec![Value::from(needle)]) } else { Value::Null }
            }
        }),
        "search" => Ok(Value::Number(match arg(args, 0).as_host::<RegExp>() {
            Some(re) => re.regex.find(s).map_or(-1.0, |m| s[..m.start()].chars().count() as f64),
            None => char_position(s, &text(0), false),
        })),
        "replace" | "replaceAll" => replace(interp, s, &arg(args, 0), &arg(args, 1), name == "replaceAll"),
        _ => return None,
    };
    Some(result)
}

fn char_position(haystack: &str, needle: &str, last: bool) -> f64 {
    let found = if last { haystack.rfind(needle) } else { haystack.find(needle) };
    found.map_or(-1.0, |byte| haystack[..byte].chars().count() as f64)
}

fn split(s: &str, separator: &Value, limit: &Value) -> Value {
    let limit = match limit {
        Value::Undefined => usize::MAX,
        v => v.to_number().max(0.0) as usize,
    };
    let parts: Vec<Value> = match separator {
        Value::Undefined => vec![Value::string(s)],
        sep => match sep.as_host::<RegExp>() {
            Some(re) => re.regex.split(s).map(Value::string).collect(),
            None => {
                let sep = sep.to_display();
                if sep.is_empty() {
                    s.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(Value::string).collect()
                }
            }
        },
    };
    Value::array(parts.into_iter().take(limit).collect())
}

fn replace(interp: &mut Interpreter, s: &str, pattern: &Value, replacement: &Value, all: bool) -> EvalResult<Value> {
    let callable = replacement.is_callable();
    let template = replacement.to_display();
    if let Some(re) = pattern.as_host::<RegExp>() {
        let global = all || re.is_global();
        let mut out = String::new();
        let mut last = 0;
        for caps in re.regex.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            if callable {
                let mut cb_args: Vec<Value> = caps
                    .iter()
                    .map(|m| m.map_or(Value::Undefined, |m| Value::string(m.as_str())))
                    .collect();
                cb_args.push(Value::from(s[..whole.start()].chars().count()));
                out.push_str(&interp.call_function(replacement, Value::Undefined, &cb_args)?.to_display());
            } else {
                let mut expanded = String::new();
                caps.expand(&template.replace("$&", "${0}"), &mut expanded);
                out.push_str(&expanded);
            }
            last = whole.end();
            if !global {
                break;
            }
        }
        out.push_str(&s[last..]);
        return Ok(Value::from(out));
    }

    let needle = pattern.to_display();
    let mut out = String::new();
    let mut rest = s;
    let mut consumed = 0;
    while let Some(pos) = rest.find(needle.as_str()) {
        out.push_str(&rest[..pos]);
        if callable {
            let offset = s[..consumed + pos].chars().count();
            out.push_str(
                &interp
                    .call_function(replacement, Value::Undefined, &[Value::string(&needle), Value::from(offset)])?
                    .to_display(),
            );
        } else {
            out.push_str(&template.replace("$&", &needle));
        }
        let step = pos + needle.len();
        consumed += step;
        rest = &rest[step..];
        if !all || needle.is_empty() {
            break;
        }
    }
    out.push_str(rest);
    Ok(Value::from(out))
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Ok(Value::from(if n.is_finite() { format!("{n:.digits$}") } else { number_to_string(n) }))
        }
        "toString" => {
            let radix = match arg(args, 0) {
                Value::Undefined => 10,
                v => v.to_number() as u32,
            };
            if radix == 10 || !n.is_finite() || n.fract() != 0.0 {
                Ok(Value::from(number_to_string(n)))
            } else if (2..=36).contains(&radix) {
                Ok(Value::from(integer_to_radix(n as i64, radix)))
            } else {
                Err(Interrupt::Throw(error_object("RangeError", "toString() radix must be between 2 and 36")))
            }
        }
        _ => return None,
    };
    Some(result)
}

fn integer_to_radix(mut n: i64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let negative = n < 0;
    let mut digits = Vec::new();
    while n != 0 {
        let d = (n % i64::from(radix)).unsigned_abs() as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        n /= i64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}
