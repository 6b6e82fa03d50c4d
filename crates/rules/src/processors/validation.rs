use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexSet;
use kubelint_core::K8sManifest;
use kubelint_query::{QueryScopeLimiter, ScriptItem};
use kubelint_script::{arg, CompiledScript, Interpreter, ScriptMode, Value};

use super::{base_bindings, compile};
use crate::spec::RuleValues;

/// Per-manifest validation script.
#[derive(Debug)]
pub struct ValidationProcessor {
    script: CompiledScript,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// False when the script itself failed; that is a rule bug, not a violation.
    pub success: bool,
    pub messages: Vec<String>,
    pub error_msgs: Vec<String>,
    pub warn_msgs: Vec<String>,
    pub markers: Vec<String>,
}

impl ValidationResult {
    pub fn is_violation(&self) -> bool {
        !self.error_msgs.is_empty() || !self.warn_msgs.is_empty()
    }
}

#[derive(Default)]
struct Sink {
    errors: IndexSet<String>,
    warnings: IndexSet<String>,
    markers: IndexSet<String>,
}

fn errors(s: &mut Sink) -> &mut IndexSet<String> {
    &mut s.errors
}

fn warnings(s: &mut Sink) -> &mut IndexSet<String> {
    &mut s.warnings
}

fn markers(s: &mut Sink) -> &mut IndexSet<String> {
    &mut s.markers
}

fn message(args: &[Value]) -> String {
    match arg(args, 0) {
        Value::Undefined => String::new(),
        v => v.to_display(),
    }
}

fn recorder(name: &str, sink: &Rc<RefCell<Sink>>, pick: fn(&mut Sink) -> &mut IndexSet<String>) -> Value {
    let sink = Rc::clone(sink);
    Value::native(name, move |_, _, args| {
        pick(&mut *sink.borrow_mut()).insert(message(args));
        Ok(Value::Undefined)
    })
}

impl ValidationProcessor {
    pub fn prepare(source: &str) -> Result<Self, String> {
        compile(source, ScriptMode::Block).map(|script| Self { script })
    }

    /// Queries issued by the script are limited to the item's own namespace.
    pub fn execute(
        &self,
        interp: &mut Interpreter,
        item: &Arc<K8sManifest>,
        cache: &Value,
        global_cache: Option<&Value>,
        values: &RuleValues,
    ) -> ValidationResult {
        let sink = Rc::new(RefCell::new(Sink::default()));
        let script_item = ScriptItem::new(Arc::clone(item));
        let config = script_item.config();

        let mut bindings = base_bindings(&QueryScopeLimiter::from(item.namespace()), values);
        bindings.push(("item", Value::host(script_item)));
        bindings.push(("config", config));
        bindings.push(("cache", cache.clone()));
        bindings.push(("globalCache", global_cache.cloned().unwrap_or(Value::Null)));
        bindings.push(("error", recorder("error", &sink, errors)));
        bindings.push(("warning", recorder("warning", &sink, warnings)));
        bindings.push(("mark", recorder("mark", &sink, markers)));

        let outcome = self.script.run(interp, &bindings);
        let sink = std::mem::take(&mut *sink.borrow_mut());
        let (success, messages) = match outcome {
            Ok(_) => (true, Vec::new()),
            Err(err) => (false, vec![err.message()]),
        };
        ValidationResult {
            success,
            messages,
            error_msgs: sink.errors.into_iter().collect(),
            warn_msgs: sink.warnings.into_iter().collect(),
            markers: sink.markers.into_iter().collect(),
        }
    }
}
