//! Tree-walking evaluator.
//!
//! Every statement, loop iteration and call consumes one step from the
//! interpreter's budget; exhausting it (or the call depth, or the native
//! stack budget, or the string size limit) aborts the run with a
//! `LimitExceeded` error that scripts cannot catch. Oversized arrays throw a
//! catchable `RangeError` instead.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Element, Expr, ForInit, FunctionBody, FunctionDef, Literal, LogicalOp, Param,
    Pattern, PropKey, Property, Stmt, TemplatePart, UnaryOp,
};
use crate::builtins;
use crate::error::ScriptError;
use crate::stack::{StackGuard, STACK_BUDGET};
use crate::value::{loose_equals, strict_equals, Closure, ObjectMap, Value};

/// Non-local exit from evaluation.
#[derive(Debug)]
pub enum Interrupt {
    /// A script-level exception; `try/catch` can observe it.
    Throw(Value),
    /// Budget exhaustion or host failure; unwinds the whole run.
    Abort(ScriptError),
}

pub type EvalResult<T> = std::result::Result<T, Interrupt>;

impl Interrupt {
    pub fn host(message: impl Into<String>) -> Self {
        Interrupt::Abort(ScriptError::host(message))
    }

    /// Convert an escaped interrupt into the error reported to the caller.
    pub fn into_error(self) -> ScriptError {
        match self {
            Interrupt::Abort(err) => err,
            Interrupt::Throw(value) => thrown_to_error(&value),
        }
    }
}

fn thrown_to_error(value: &Value) -> ScriptError {
    if let Value::Object(map) = value {
        let map = map.borrow();
        let message = map.get("message").map(Value::to_display).unwrap_or_default();
        match map.get("name").and_then(Value::as_str) {
            Some("TypeError") => return ScriptError::type_error(message),
            Some("ReferenceError") => return ScriptError::reference(message),
            _ => {}
        }
    }
    ScriptError::thrown(value.to_display())
}

/// `{name, message}` error object, as `new Error(message)` builds.
pub fn error_object(name: &str, message: impl Into<String>) -> Value {
    let mut map = ObjectMap::new();
    map.insert(Rc::from("name"), Value::string(name));
    map.insert(Rc::from("message"), Value::string(message.into()));
    Value::object(map)
}

pub fn type_error(message: impl Into<String>) -> Interrupt {
    Interrupt::Throw(error_object("TypeError", message))
}

pub fn reference_error(message: impl Into<String>) -> Interrupt {
    Interrupt::Throw(error_object("ReferenceError", message))
}

/// Execution budget for one interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Longest string a script may build, in bytes.
    pub max_string_bytes: usize,
    /// Largest length an array may grow to.
    pub max_array_len: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self { max_steps: 5_000_000, max_call_depth: 64, max_string_bytes: 1 << 24, max_array_len: 1 << 20 }
    }
}

impl ScriptLimits {
    /// Defaults overridden by `KUBELINT_SCRIPT_MAX_STEPS` / `KUBELINT_SCRIPT_MAX_DEPTH` /
    /// `KUBELINT_SCRIPT_MAX_STRING_BYTES` / `KUBELINT_SCRIPT_MAX_ARRAY_LEN`.
    pub fn from_env() -> Self {
        let mut limits = Self::default();
        if let Some(v) = std::env::var("KUBELINT_SCRIPT_MAX_STEPS").ok().and_then(|s| s.parse().ok()) {
            limits.max_steps = v;
        }
        if let Some(v) = std::env::var("KUBELINT_SCRIPT_MAX_DEPTH").ok().and_then(|s| s.parse().ok()) {
            limits.max_call_depth = v;
        }
        if let Some(v) = std::env::var("KUBELINT_SCRIPT_MAX_STRING_BYTES").ok().and_then(|s| s.parse().ok()) {
            limits.max_string_bytes = v;
        }
        if let Some(v) = std::env::var("KUBELINT_SCRIPT_MAX_ARRAY_LEN").ok().and_then(|s| s.parse().ok()) {
            limits.max_array_len = v;
        }
        limits
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// Lexical scope. Function scopes receive `var` declarations.
pub struct Scope {
    vars: RefCell<HashMap<Rc<str>, Binding>>,
    parent: Option<Rc<Scope>>,
    function_scope: bool,
}

enum AssignFailure {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope { vars: RefCell::new(HashMap::new()), parent: None, function_scope: true })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope { vars: RefCell::new(HashMap::new()), parent: Some(parent.clone()), function_scope: false })
    }

    fn function(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope { vars: RefCell::new(HashMap::new()), parent: Some(parent.clone()), function_scope: true })
    }

    pub fn define(&self, name: &str, value: Value, mutable: bool) {
        self.vars.borrow_mut().insert(Rc::from(name), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut cur = Some(self);
        while let Some(scope) = cur {
            if let Some(binding) = scope.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            cur = scope.parent.as_deref();
        }
        None
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), AssignFailure> {
        let mut cur = Some(self);
        while let Some(scope) = cur {
            if let Some(binding) = scope.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(AssignFailure::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            cur = scope.parent.as_deref();
        }
        Err(AssignFailure::Undeclared)
    }

    fn declare_var(&self, name: &str, value: Value) {
        let mut cur = self;
        while !cur.function_scope {
            match cur.parent.as_deref() {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        cur.define(name, value, true);
    }

    /// Fresh sibling scope holding copies of this scope's own bindings
    /// (per-iteration `let` semantics in `for` loops).
    fn fork(&self) -> Rc<Scope> {
        let vars = self
            .vars
            .borrow()
            .iter()
            .map(|(k, b)| (k.clone(), Binding { value: b.value.clone(), mutable: b.mutable }))
            .collect();
        Rc::new(Scope { vars: RefCell::new(vars), parent: self.parent.clone(), function_scope: false })
    }
}

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Clone, Copy)]
enum BindMode {
    Let,
    Const,
    Var,
}

impl From<DeclKind> for BindMode {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Let => BindMode::Let,
            DeclKind::Const => BindMode::Const,
            DeclKind::Var => BindMode::Var,
        }
    }
}

pub struct Interpreter {
    limits: ScriptLimits,
    steps: u64,
    depth: usize,
    stack: StackGuard,
    context: Option<Rc<dyn Any>>,
}

impl Interpreter {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits, steps: 0, depth: 0, stack: StackGuard::arm(STACK_BUDGET), context: None }
    }

    pub fn with_context(limits: ScriptLimits, context: Rc<dyn Any>) -> Self {
        Self { context: Some(context), ..Self::new(limits) }
    }

    pub fn set_context(&mut self, context: Option<Rc<dyn Any>>) {
        self.context = context;
    }

    /// Embedder state reachable from natives (e.g. the active registry).
    pub fn context<T: 'static>(&self) -> Option<Rc<T>> {
        self.context.clone().and_then(|ctx| ctx.downcast::<T>().ok())
    }

    pub fn limits(&self) -> ScriptLimits {
        self.limits
    }

    pub fn steps_used(&self) -> u64 {
        self.steps
    }

    /// Start a fresh budget; every top-level run gets the full step allowance.
    pub fn reset_budget(&mut self) {
        self.steps = 0;
        self.depth = 0;
        self.stack = StackGuard::arm(STACK_BUDGET);
    }

    /// Abort when a string of `len` bytes would exceed the string limit.
    pub fn check_string_len(&self, len: usize) -> EvalResult<()> {
        if len > self.limits.max_string_bytes {
            return Err(Interrupt::Abort(ScriptError::limit(format!(
                "string of {len} bytes exceeds the limit of {}",
                self.limits.max_string_bytes
            ))));
        }
        Ok(())
    }

    /// `RangeError` when an array would grow past the array length limit.
    pub fn check_array_len(&self, len: usize) -> EvalResult<()> {
        if len > self.limits.max_array_len {
            return Err(Interrupt::Throw(error_object("RangeError", "Invalid array length")));
        }
        Ok(())
    }

    /// Top-level scope of one run: built-ins plus the given bindings.
    pub fn global_scope(&self, bindings: &[(&str, Value)]) -> Rc<Scope> {
        let scope = Scope::function(&builtins::globals());
        for (name, value) in bindings {
            scope.define(name, value.clone(), true);
        }
        scope
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Interrupt::Abort(ScriptError::limit(format!(
                "script exceeded the step limit of {}",
                self.limits.max_steps
            ))));
        }
        Ok(())
    }

    /// Execute a statement list in `scope`; a top-level `return` yields its value.
    pub fn run_program(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> EvalResult<Value> {
        self.hoist(body, scope);
        for stmt in body {
            match self.exec(stmt, scope)? {
                Completion::Return(v) => return Ok(v),
                Completion::Normal | Completion::Break | Completion::Continue => {}
            }
        }
        Ok(Value::Undefined)
    }

    pub fn eval_expression(&mut self, expr: &Expr, scope: &Rc<Scope>) -> EvalResult<Value> {
        self.eval(expr, scope)
    }

    pub fn call_function(&mut self, f: &Value, this: Value, args: &[Value]) -> EvalResult<Value> {
        match f {
            Value::Native(native) => {
                let native = native.clone();
                self.enter_call()?;
                let out = (native.func)(self, this, args);
                self.depth -= 1;
                out
            }
            Value::Function(closure) => {
                let closure = closure.clone();
                self.enter_call()?;
                let out = self.invoke(&closure, args);
                self.depth -= 1;
                out
            }
            other => Err(type_error(format!("{} is not a function", other.type_of()))),
        }
    }

    fn enter_call(&mut self) -> EvalResult<()> {
        self.tick()?;
        if self.depth >= self.limits.max_call_depth {
            return Err(Interrupt::Abort(ScriptError::limit(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            ))));
        }
        self.depth += 1;
        Ok(())
    }

    fn invoke(&mut self, closure: &Closure, args: &[Value]) -> EvalResult<Value> {
        let def: &FunctionDef = &closure.def;
        let scope = Scope::function(&closure.env);
        if let (Some(name), false) = (&def.name, def.is_arrow) {
            scope.define(name, Value::Function(Rc::new(Closure { def: closure.def.clone(), env: closure.env.clone() })), true);
        }
        self.bind_params(&def.params, args, &scope)?;
        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => {
                self.hoist(body, &scope);
                for stmt in body {
                    if let Completion::Return(v) = self.exec(stmt, &scope)? {
                        return Ok(v);
                    }
                }
                Ok(Value::Undefined)
            }
        }
    }

    fn bind_params(&mut self, params: &[Param], args: &[Value], scope: &Rc<Scope>) -> EvalResult<()> {
        for (i, param) in params.iter().enumerate() {
            let value = if param.rest {
                Value::array(args.get(i..).map(<[Value]>::to_vec).unwrap_or_default())
            } else {
                let v = args.get(i).cloned().unwrap_or_default();
                match &param.default {
                    Some(default) if matches!(v, Value::Undefined) => self.eval(default, scope)?,
                    _ => v,
                }
            };
            self.bind_pattern(&param.pattern, value, scope, BindMode::Let)?;
        }
        Ok(())
    }

    fn hoist(&mut self, body: &[Stmt], scope: &Rc<Scope>) {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Closure { def: def.clone(), env: scope.clone() };
                    scope.define(name, Value::Function(Rc::new(closure)), true);
                }
            }
        }
    }

    fn exec_block(&mut self, body: &[Stmt], parent: &Rc<Scope>) -> EvalResult<Completion> {
        let scope = Scope::child(parent);
        self.hoist(body, &scope);
        for stmt in body {
            match self.exec(stmt, &scope)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> EvalResult<Completion> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Decl { kind, decls, .. } => {
                for (pattern, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(pattern, value, scope, (*kind).into())?;
                }
                Ok(Completion::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Completion::Normal),
            Stmt::If { test, cons, alt } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec_nested(cons, scope)
                } else if let Some(alt) = alt {
                    self.exec_nested(alt, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::For { init, test, update, body } => self.exec_for(init.as_ref(), test.as_ref(), update.as_ref(), body, scope),
            Stmt::ForOf { kind, pattern, iter, body } => {
                let subject = self.eval(iter, scope)?;
                let items = self.iterate(&subject)?;
                self.exec_each(*kind, pattern, items, body, scope)
            }
            Stmt::ForIn { kind, pattern, object, body } => {
                let subject = self.eval(object, scope)?;
                let keys = self.enumerate_keys(&subject).into_iter().map(Value::String).collect();
                self.exec_each(*kind, pattern, keys, body, scope)
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                    match self.exec_nested(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    self.tick()?;
                    match self.exec_nested(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::Return(value, _) => {
                let v = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(v))
            }
            Stmt::Break(_) => Ok(Completion::Break),
            Stmt::Continue(_) => Ok(Completion::Continue),
            Stmt::Throw(expr, _) => {
                let v = self.eval(expr, scope)?;
                Err(Interrupt::Throw(v))
            }
            Stmt::Try { block, param, handler, finalizer } => {
                let mut outcome = self.exec_block(block, scope);
                let caught = matches!(outcome, Err(Interrupt::Throw(_)));
                if let Some(handler) = handler.as_ref().filter(|_| caught) {
                    let thrown = match std::mem::replace(&mut outcome, Ok(Completion::Normal)) {
                        Err(Interrupt::Throw(v)) => v,
                        _ => Value::Undefined,
                    };
                    let catch_scope = Scope::child(scope);
                    if let Some(param) = param {
                        self.bind_pattern(param, thrown, &catch_scope, BindMode::Let)?;
                    }
                    outcome = self.exec_block(handler, &catch_scope);
                }
                if let Some(finalizer) = finalizer {
                    if matches!(outcome, Err(Interrupt::Abort(_))) {
                        return outcome;
                    }
                    match self.exec_block(finalizer, scope)? {
                        Completion::Normal => {}
                        abrupt => return Ok(abrupt),
                    }
                }
                outcome
            }
        }
    }

    /// Body of `if`/loops: a bare block gets its own scope, anything else runs in place.
    fn exec_nested(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> EvalResult<Completion> {
        match stmt {
            Stmt::Block(body) => self.exec_block(body, scope),
            other => self.exec(other, scope),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> EvalResult<Completion> {
        let mut iter_scope = Scope::child(scope);
        match init {
            Some(ForInit::Decl(kind, decls)) => {
                for (pattern, value) in decls {
                    let v = match value {
                        Some(expr) => self.eval(expr, &iter_scope)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(pattern, v, &iter_scope, (*kind).into())?;
                }
            }
            Some(ForInit::Expr(expr)) => {
                self.eval(expr, &iter_scope)?;
            }
            None => {}
        }
        loop {
            self.tick()?;
            if let Some(test) = test {
                if !self.eval(test, &iter_scope)?.truthy() {
                    break;
                }
            }
            match self.exec_nested(body, &iter_scope)? {
                Completion::Break => break,
                Completion::Return(v) => return Ok(Completion::Return(v)),
                Completion::Normal | Completion::Continue => {}
            }
            iter_scope = iter_scope.fork();
            if let Some(update) = update {
                self.eval(update, &iter_scope)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_each(
        &mut self,
        kind: DeclKind,
        pattern: &Pattern,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> EvalResult<Completion> {
        for item in items {
            self.tick()?;
            let iter_scope = Scope::child(scope);
            self.bind_pattern(pattern, item, &iter_scope, kind.into())?;
            match self.exec_nested(body, &iter_scope)? {
                Completion::Break => break,
                Completion::Return(v) => return Ok(Completion::Return(v)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    /// Values produced by `for..of` and spread.
    pub fn iterate(&mut self, subject: &Value) -> EvalResult<Vec<Value>> {
        match subject {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            Value::Host(host) => {
                let host = host.clone();
                match host.call_method(self, "toArray", &[]) {
                    Some(result) => self.iterate(&result?),
                    None => Err(type_error(format!("{} is not iterable", host.type_name()))),
                }
            }
            other => Err(type_error(format!("{} is not iterable", other.to_display()))),
        }
    }

    /// Keys visited by `for..in` and `Object.keys`.
    pub fn enumerate_keys(&self, subject: &Value) -> Vec<Rc<str>> {
        match subject {
            Value::Object(map) => map.borrow().keys().cloned().collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| Rc::from(i.to_string().as_str())).collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| Rc::from(i.to_string().as_str())).collect(),
            Value::Host(host) => host.keys(),
            _ => Vec::new(),
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, scope: &Rc<Scope>, mode: BindMode) -> EvalResult<()> {
        match pattern {
            Pattern::Ident(name) => {
                match mode {
                    BindMode::Let => scope.define(name, value, true),
                    BindMode::Const => scope.define(name, value, false),
                    BindMode::Var => scope.declare_var(name, value),
                }
                Ok(())
            }
            Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    return Err(type_error(format!("Cannot destructure '{}'", value.to_display())));
                }
                for (key, target, default) in props {
                    let mut v = self.get_property(&value, key)?;
                    if let Some(default) = default.as_ref().filter(|_| matches!(v, Value::Undefined)) {
                        v = self.eval(default, scope)?;
                    }
                    self.bind_pattern(target, v, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let mut remaining = ObjectMap::new();
                    for key in self.enumerate_keys(&value) {
                        if props.iter().any(|(k, _, _)| *k == key) {
                            continue;
                        }
                        let v = self.get_property(&value, &key)?;
                        remaining.insert(key, v);
                    }
                    self.bind_pattern(&Pattern::Ident(rest.clone()), Value::object(remaining), scope, mode)?;
                }
                Ok(())
            }
            Pattern::Array { items, rest } => {
                let values = self.iterate(&value)?;
                for (i, item) in items.iter().enumerate() {
                    let Some((target, default)) = item else { continue };
                    let mut v = values.get(i).cloned().unwrap_or_default();
                    if let Some(default) = default.as_ref().filter(|_| matches!(v, Value::Undefined)) {
                        v = self.eval(default, scope)?;
                    }
                    self.bind_pattern(target, v, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let tail = values.get(items.len()..).map(<[Value]>::to_vec).unwrap_or_default();
                    self.bind_pattern(&Pattern::Ident(rest.clone()), Value::array(tail), scope, mode)?;
                }
                Ok(())
            }
        }
    }

    // ---------------- expressions ----------------

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> EvalResult<Value> {
        if self.stack.exhausted() {
            return Err(Interrupt::Abort(ScriptError::limit("maximum call depth exceeded: native stack budget exhausted")));
        }
        match expr {
            Expr::Literal(lit, _) => Ok(match lit {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
                Literal::Undefined => Value::Undefined,
            }),
            Expr::Template(parts, _) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Str(s) => out.push_str(s),
                        TemplatePart::Expr(e) => {
                            let piece = self.eval(e, scope)?.to_display();
                            self.check_string_len(out.len() + piece.len())?;
                            out.push_str(&piece);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Regex { pattern, flags, .. } => builtins::new_regex(pattern, flags),
            Expr::Ident(name, _) => scope.lookup(name).ok_or_else(|| reference_error(format!("{name} is not defined"))),
            Expr::Array(elements, _) => Ok(Value::array(self.eval_elements(elements, scope)?)),
            Expr::Object(props, _) => self.eval_object(props, scope),
            Expr::Member { .. } | Expr::Call { .. } => Ok(self.eval_chain(expr, scope)?.unwrap_or_default()),
            Expr::New { callee, args, .. } => {
                let ctor = self.eval(callee, scope)?;
                let args = self.eval_elements(args, scope)?;
                match &ctor {
                    Value::Native(_) => self.call_function(&ctor, Value::Undefined, &args),
                    _ => Err(type_error(format!("{} is not a constructor", describe_callee(callee)))),
                }
            }
            Expr::Unary { op, expr, .. } => {
                if let (UnaryOp::Typeof, Expr::Ident(name, _)) = (op, expr.as_ref()) {
                    return Ok(Value::string(scope.lookup(name).map_or("undefined", |v| v.type_of())));
                }
                let v = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Neg => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::Typeof => Value::string(v.type_of()),
                })
            }
            Expr::Binary { op, left, right, .. } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                self.binary(*op, &l, &r)
            }
            Expr::Logical { op, left, right, .. } => {
                let l = self.eval(left, scope)?;
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short {
                    Ok(l)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional { test, cons, alt, .. } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(cons, scope)
                } else {
                    self.eval(alt, scope)
                }
            }
            Expr::Assign { op, target, value, .. } => self.eval_assign(*op, target, value, scope),
            Expr::Update { increment, prefix, target, .. } => {
                let old = self.eval(target, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.store(target, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure { def: def.clone(), env: scope.clone() }))),
            Expr::Sequence(items, _) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
        }
    }

    /// Member/call chains; `None` means an optional link short-circuited.
    fn eval_chain(&mut self, expr: &Expr, scope: &Rc<Scope>) -> EvalResult<Option<Value>> {
        match expr {
            Expr::Member { object, property, optional, .. } => {
                let Some(obj) = self.eval_chain(object, scope)? else { return Ok(None) };
                if *optional && obj.is_nullish() {
                    return Ok(None);
                }
                let key = self.eval_key(property, scope)?;
                self.get_property(&obj, &key).map(Some)
            }
            Expr::Call { callee, args, optional, .. } => {
                if let Expr::Member { object, property, optional: member_optional, .. } = callee.as_ref() {
                    let Some(obj) = self.eval_chain(object, scope)? else { return Ok(None) };
                    if *member_optional && obj.is_nullish() {
                        return Ok(None);
                    }
                    let key = self.eval_key(property, scope)?;
                    if *optional {
                        let f = self.get_property(&obj, &key)?;
                        if f.is_nullish() {
                            return Ok(None);
                        }
                    }
                    let args = self.eval_elements(args, scope)?;
                    return self.call_member(&obj, &key, &args, callee).map(Some);
                }
                let Some(f) = self.eval_chain(callee, scope)? else { return Ok(None) };
                if *optional && f.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_elements(args, scope)?;
                if !f.is_callable() {
                    return Err(type_error(format!("{} is not a function", describe_callee(callee))));
                }
                self.call_function(&f, Value::Undefined, &args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    fn eval_key(&mut self, property: &PropKey, scope: &Rc<Scope>) -> EvalResult<Rc<str>> {
        match property {
            PropKey::Static(name) => Ok(name.clone()),
            PropKey::Computed(expr) => Ok(self.eval(expr, scope)?.to_property_key()),
        }
    }

    fn eval_elements(&mut self, elements: &[Element], scope: &Rc<Scope>) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Item(expr) => out.push(self.eval(expr, scope)?),
                Element::Spread(expr) => {
                    let v = self.eval(expr, scope)?;
                    let items = self.iterate(&v)?;
                    self.check_array_len(out.len() + items.len())?;
                    out.extend(items);
                }
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[Property], scope: &Rc<Scope>) -> EvalResult<Value> {
        let mut map = ObjectMap::new();
        for prop in props {
            match prop {
                Property::KeyValue(key, value) => {
                    let key = self.eval_key(key, scope)?;
                    let v = self.eval(value, scope)?;
                    map.insert(key, v);
                }
                Property::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    if source.is_nullish() {
                        continue;
                    }
                    for key in self.enumerate_keys(&source) {
                        let v = self.get_property(&source, &key)?;
                        map.insert(key, v);
                    }
                }
            }
        }
        Ok(Value::object(map))
    }

    fn call_member(&mut self, obj: &Value, key: &str, args: &[Value], callee: &Expr) -> EvalResult<Value> {
        match obj {
            Value::Host(host) => {
                let host = host.clone();
                if let Some(result) = host.call_method(self, key, args) {
                    return result;
                }
            }
            Value::Object(map) if map.borrow().contains_key(key) => {}
            Value::Array(_) | Value::String(_) | Value::Number(_) | Value::Object(_) => {
                if let Some(result) = builtins::call_method(self, obj, key, args) {
                    return result;
                }
            }
            _ => {}
        }
        let f = self.get_property(obj, key)?;
        if !f.is_callable() {
            return Err(type_error(format!("{} is not a function", describe_callee(callee))));
        }
        self.call_function(&f, obj.clone(), args)
    }

    pub fn get_property(&mut self, obj: &Value, key: &str) -> EvalResult<Value> {
        match obj {
            Value::Undefined | Value::Null => {
                Err(type_error(format!("Cannot read properties of {} (reading '{key}')", obj.to_display())))
            }
            Value::Object(map) => Ok(map.borrow().get(key).cloned().unwrap_or_default()),
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::from(items.borrow().len()));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                }
                Ok(builtins::bound_method(obj, key))
            }
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::from(s.chars().count()));
                }
                if let Some(index) = array_index(key) {
                    return Ok(s.chars().nth(index).map_or(Value::Undefined, |c| Value::string(c.to_string())));
                }
                Ok(builtins::bound_method(obj, key))
            }
            Value::Number(_) => Ok(builtins::bound_method(obj, key)),
            Value::Host(host) => {
                let host = host.clone();
                host.get(self, key)
            }
            Value::Function(c) if key == "name" => Ok(Value::string(c.def.name.as_deref().unwrap_or(""))),
            Value::Native(n) if key == "name" => Ok(Value::String(n.name.clone())),
            Value::Native(n) => Ok(builtins::static_member(&n.name, key)),
            _ => Ok(Value::Undefined),
        }
    }

    pub fn set_property(&mut self, obj: &Value, key: &str, value: Value) -> EvalResult<()> {
        match obj {
            Value::Undefined | Value::Null => {
                Err(type_error(format!("Cannot set properties of {} (setting '{key}')", obj.to_display())))
            }
            Value::Object(map) => {
                map.borrow_mut().insert(Rc::from(key), value);
                Ok(())
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || len > self.limits.max_array_len as f64 {
                        return Err(Interrupt::Throw(error_object("RangeError", "Invalid array length")));
                    }
                    items.resize(len as usize, Value::Undefined);
                } else if let Some(index) = array_index(key) {
                    if index >= items.len() {
                        self.check_array_len(index.saturating_add(1))?;
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Host(host) => {
                Err(type_error(format!("Cannot assign to read only property '{key}' of {}", host.type_name())))
            }
            _ => Ok(()),
        }
    }

    fn eval_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, scope: &Rc<Scope>) -> EvalResult<Value> {
        let result = match op {
            AssignOp::Assign => self.eval(value, scope)?,
            AssignOp::Compound(bin) => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                self.binary(bin, &current, &rhs)?
            }
            AssignOp::Logical(logical) => {
                let current = self.eval(target, scope)?;
                let keep = match logical {
                    LogicalOp::And => !current.truthy(),
                    LogicalOp::Or => current.truthy(),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value, scope)?
            }
        };
        self.store(target, result.clone(), scope)?;
        Ok(result)
    }

    fn store(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> EvalResult<()> {
        match target {
            Expr::Ident(name, _) => scope.assign(name, value).map_err(|failure| match failure {
                AssignFailure::Undeclared => reference_error(format!("{name} is not defined")),
                AssignFailure::Constant => type_error("Assignment to constant variable."),
            }),
            Expr::Member { object, property, .. } => {
                let obj = self.eval(object, scope)?;
                let key = self.eval_key(property, scope)?;
                self.set_property(&obj, &key, value)
            }
            other => Err(Interrupt::Throw(error_object(
                "SyntaxError",
                format!("invalid assignment target at {}", other.span()),
            ))),
        }
    }

    fn binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> EvalResult<Value> {
        Ok(match op {
            BinaryOp::Add => {
                let l = to_primitive(l);
                let r = to_primitive(r);
                if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                    let mut s = l.to_display();
                    let tail = r.to_display();
                    self.check_string_len(s.len() + tail.len())?;
                    s.push_str(&tail);
                    Value::from(s)
                } else {
                    Value::Number(l.to_number() + r.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
            BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
            BinaryOp::Div => Value::Number(l.to_number() / r.to_number()),
            BinaryOp::Rem => Value::Number(l.to_number() % r.to_number()),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => Value::Bool(compare(op, l, r)),
            BinaryOp::Eq => Value::Bool(loose_equals(l, r)),
            BinaryOp::NotEq => Value::Bool(!loose_equals(l, r)),
            BinaryOp::StrictEq => Value::Bool(strict_equals(l, r)),
            BinaryOp::StrictNotEq => Value::Bool(!strict_equals(l, r)),
            BinaryOp::In => {
                let key = l.to_property_key();
                match r {
                    Value::Object(map) => Value::Bool(map.borrow().contains_key(&key)),
                    Value::Array(items) => {
                        Value::Bool(&*key == "length" || array_index(&key).is_some_and(|i| i < items.borrow().len()))
                    }
                    Value::Host(host) => Value::Bool(host.keys().contains(&key)),
                    other => {
                        return Err(type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            other.to_display()
                        )))
                    }
                }
            }
        })
    }
}

fn to_primitive(v: &Value) -> Value {
    match v {
        Value::Array(_) | Value::Object(_) | Value::Host(_) | Value::Function(_) | Value::Native(_) => {
            Value::from(v.to_display())
        }
        other => other.clone(),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> bool {
    let (l, r) = (to_primitive(l), to_primitive(r));
    if let (Value::String(a), Value::String(b)) = (&l, &r) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::LtEq => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (l.to_number(), r.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

/// Canonical array index (`"3"`, not `"03"` or `"3.0"`).
pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name, _) => name.to_string(),
        Expr::Member { object, property, .. } => match property.as_ref() {
            PropKey::Static(name) => format!("{}.{name}", describe_callee(object)),
            PropKey::Computed(_) => format!("{}[...]", describe_callee(object)),
        },
        Expr::Call { callee, .. } => format!("{}(...)", describe_callee(callee)),
        _ => "expression".to_string(),
    }
}
