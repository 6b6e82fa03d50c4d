//! kubelint rule scripts: a small sandboxed JavaScript-like language.
//!
//! Scripts see only the identifiers they are given plus a fixed set of
//! built-ins (`_`, `Math`, `JSON`, `Object`, ...). There is no I/O. Runaway
//! scripts are stopped by a step budget and a call-depth limit.

#![forbid(unsafe_code)]

mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod lodash;
mod parser;
mod span;
mod stack;
mod token;
mod value;

use std::rc::Rc;

use tracing::trace;

pub use builtins::{arg, Namespace, RegExp};
pub use error::{Result, ScriptError, ScriptErrorKind};
pub use interp::{error_object, reference_error, type_error, EvalResult, Interpreter, Interrupt, Scope, ScriptLimits};
pub use lodash::stable_stringify;
pub use span::Span;
pub use value::{deep_equals, number_to_string, HostObject, NativeFunction, ObjectMap, Value};

use ast::{Expr, Stmt};
use parser::Parser;

/// How a source text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// A single expression; its value is the result.
    Expression,
    /// A statement list; a top-level `return` provides the result.
    Block,
}

enum Program {
    Expression(Expr),
    Block(Vec<Stmt>),
}

/// A parsed script, ready to run any number of times.
pub struct CompiledScript {
    mode: ScriptMode,
    source: Rc<str>,
    program: Program,
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript").field("mode", &self.mode).field("len", &self.source.len()).finish()
    }
}

impl CompiledScript {
    pub fn compile(source: &str, mode: ScriptMode) -> Result<Self> {
        let mut parser = Parser::new(source)?;
        let program = match mode {
            ScriptMode::Expression => Program::Expression(parser.parse_standalone_expression()?),
            ScriptMode::Block => Program::Block(parser.parse_program()?),
        };
        trace!(?mode, len = source.len(), "script compiled");
        Ok(Self { mode, source: Rc::from(source), program })
    }

    pub fn mode(&self) -> ScriptMode {
        self.mode
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run with `bindings` as the only visible identifiers beyond built-ins.
    /// The interpreter's step budget is reset first.
    pub fn run(&self, interp: &mut Interpreter, bindings: &[(&str, Value)]) -> Result<Value> {
        interp.reset_budget();
        let scope = interp.global_scope(bindings);
        let outcome = match &self.program {
            Program::Expression(expr) => interp.eval_expression(expr, &scope),
            Program::Block(body) => interp.run_program(body, &scope),
        };
        outcome.map_err(Interrupt::into_error)
    }
}

/// Compile and run an expression once with default limits.
pub fn eval_expression(source: &str, bindings: &[(&str, Value)]) -> Result<Value> {
    let script = CompiledScript::compile(source, ScriptMode::Expression)?;
    script.run(&mut Interpreter::new(ScriptLimits::default()), bindings)
}

pub mod prelude {
    pub use super::{
        CompiledScript, EvalResult, HostObject, Interpreter, Interrupt, ScriptError, ScriptLimits, ScriptMode, Value,
    };
}
