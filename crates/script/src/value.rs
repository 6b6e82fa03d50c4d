//! Runtime values of the script language.
//!
//! Arrays and objects are shared, mutable and single-threaded (`Rc<RefCell>`),
//! so aliasing behaves the way script authors expect. Host objects are opaque
//! handles owned by the embedding crate.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast::FunctionDef;
use crate::interp::{EvalResult, Interpreter, Scope};

/// Nesting depth at which conversions and comparisons stop descending.
const MAX_VALUE_DEPTH: usize = 256;
/// Rendering of nested arrays stops growing past this size.
const MAX_DISPLAY_BYTES: usize = 1 << 24;

pub type ObjectMap = IndexMap<Rc<str>, Value>;

pub type NativeFn = dyn Fn(&mut Interpreter, Value, &[Value]) -> EvalResult<Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Host(Rc<dyn HostObject>),
}

/// A user-defined function together with the scope it closes over.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

pub struct NativeFunction {
    pub name: Rc<str>,
    pub func: Box<NativeFn>,
}

/// Object implemented by the embedder (query builders, manifest items).
///
/// Host objects are read-only from the script's point of view.
pub trait HostObject {
    fn type_name(&self) -> &str;

    /// Property read. Unknown properties are `undefined`.
    fn get(&self, _interp: &mut Interpreter, _key: &str) -> EvalResult<Value> {
        Ok(Value::Undefined)
    }

    /// Method call; `None` falls back to calling the property value.
    fn call_method(&self, _interp: &mut Interpreter, _name: &str, _args: &[Value]) -> Option<EvalResult<Value>> {
        None
    }

    fn keys(&self) -> Vec<Rc<str>> {
        Vec::new()
    }

    fn to_json(&self) -> Json {
        Json::Null
    }

    fn as_any(&self) -> &dyn Any;
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Interpreter, Value, &[Value]) -> EvalResult<Value> + 'static,
    {
        Value::Native(Rc::new(NativeFunction { name: Rc::from(name), func: Box::new(func) }))
    }

    pub fn host<H: HostObject + 'static>(host: H) -> Self {
        Value::Host(Rc::new(host))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Downcast a host value to its concrete type.
    pub fn as_host<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Host(h) => h.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Array(_) | Value::Object(_) | Value::Host(_) => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `String(value)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Array(_) => {
                let mut out = String::new();
                self.write_array_display(&mut out, 0);
                out
            }
            Value::Object(map) => {
                let map = map.borrow();
                if let (Some(Value::String(name)), Some(msg)) = (map.get("name"), map.get("message")) {
                    format!("{name}: {}", msg.to_display())
                } else {
                    "[object Object]".to_string()
                }
            }
            Value::Function(c) => format!("function {}() {{ [code] }}", c.def.name.as_deref().unwrap_or("")),
            Value::Native(n) => format!("function {}() {{ [native code] }}", n.name),
            Value::Host(h) => format!("[object {}]", h.type_name()),
        }
    }

    /// Property key for computed access (`obj[key]`).
    pub fn to_property_key(&self) -> Rc<str> {
        match self {
            Value::String(s) => s.clone(),
            other => Rc::from(other.to_display().as_str()),
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::string(s),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                Value::object(map.iter().map(|(k, v)| (Rc::from(k.as_str()), Value::from_json(v))).collect())
            }
        }
    }

    /// `JSON.stringify` semantics: functions and `undefined` drop out of
    /// objects and become `null` inside arrays.
    /// Nested and self-containing arrays stop at a fixed depth and output size.
    fn write_array_display(&self, out: &mut String, depth: usize) {
        let Value::Array(items) = self else {
            out.push_str(&self.to_display());
            return;
        };
        if depth > MAX_VALUE_DEPTH {
            return;
        }
        for (i, v) in items.borrow().iter().enumerate() {
            if out.len() > MAX_DISPLAY_BYTES {
                return;
            }
            if i > 0 {
                out.push(',');
            }
            if !v.is_nullish() {
                v.write_array_display(out, depth + 1);
            }
        }
    }

    pub fn to_json(&self) -> Json {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> Json {
        if depth > MAX_VALUE_DEPTH {
            return Json::Null;
        }
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Native(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.to_string()),
            Value::Array(items) => Json::Array(items.borrow().iter().map(|v| v.to_json_depth(depth + 1)).collect()),
            Value::Object(map) => Json::Object(
                map.borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_) | Value::Native(_)))
                    .map(|(k, v)| (k.to_string(), v.to_json_depth(depth + 1)))
                    .collect(),
            ),
            Value::Host(h) => h.to_json(),
        }
    }

    /// Deep copy of arrays and objects; everything else is shared.
    pub fn deep_clone(&self) -> Value {
        self.deep_clone_depth(0)
    }

    fn deep_clone_depth(&self, depth: usize) -> Value {
        match self {
            _ if depth > 256 => self.clone(),
            Value::Array(items) => Value::array(items.borrow().iter().map(|v| v.deep_clone_depth(depth + 1)).collect()),
            Value::Object(map) => {
                Value::object(map.borrow().iter().map(|(k, v)| (k.clone(), v.deep_clone_depth(depth + 1))).collect())
            }
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
            other => f.write_str(&other.to_display()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        Value::from_json(json)
    }
}

pub fn number_to_json(n: f64) -> Json {
    if !n.is_finite() {
        return Json::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Json::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
}

/// Number formatting as `String(n)` does for the common cases.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.abs() >= 1e21 || n.abs() < 1e-6 {
        let s = format!("{n:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    if n.fract() == 0.0 {
        return format!("{n:.0}");
    }
    format!("{n}")
}

pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if t.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) => {
            t.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// `===`
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Host(x), Value::Host(y)) => std::ptr::addr_eq(Rc::as_ptr(x), Rc::as_ptr(y)),
        _ => false,
    }
}

/// `==`
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => {
            if matches!((a, b), (Value::Bool(x), Value::Bool(y)) if x == y) {
                return true;
            }
            a.to_number() == b.to_number()
        }
        (Value::Array(_) | Value::Object(_), Value::String(_) | Value::Number(_)) => {
            loose_equals(&Value::string(a.to_display()), b)
        }
        (Value::String(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
            loose_equals(a, &Value::string(b.to_display()))
        }
        _ => strict_equals(a, b),
    }
}

/// Structural equality used by `_.isEqual` and `includes` on plain data.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    deep_equals_at(a, b, 0)
}

fn deep_equals_at(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_VALUE_DEPTH {
        return false;
    }
    let deep_equals = |l: &Value, r: &Value| deep_equals_at(l, r, depth + 1);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| deep_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| deep_equals(v, w)))
        }
        (Value::Host(_), Value::Host(_)) => strict_equals(a, b) || a.to_json() == b.to_json(),
        _ => strict_equals(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_scripts_expect() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
    }

    #[test]
    fn loose_and_strict_equality() {
        assert!(loose_equals(&Value::Number(1.0), &Value::string("1")));
        assert!(!strict_equals(&Value::Number(1.0), &Value::string("1")));
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &Value::Number(0.0)));
        assert!(loose_equals(&Value::Bool(true), &Value::Number(1.0)));
    }

    #[test]
    fn json_conversion_drops_undefined_members() {
        let v = Value::from_json(&serde_json::json!({"a": 1, "b": [true, null]}));
        if let Value::Object(map) = &v {
            map.borrow_mut().insert(Rc::from("c"), Value::Undefined);
        }
        assert_eq!(v.to_json(), serde_json::json!({"a": 1, "b": [true, null]}));
    }

    #[test]
    fn self_containing_arrays_terminate() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        for v in [&a, &b] {
            if let Value::Array(items) = v {
                items.borrow_mut().push(v.clone());
            }
        }
        assert!(a.to_display().starts_with("1,1,"));
        assert!(!deep_equals(&a, &b));
        assert!(deep_equals(&a, &a));
    }
}
