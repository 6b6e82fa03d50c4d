use kubelint_query::QueryScopeLimiter;
use kubelint_script::{CompiledScript, Interpreter, ObjectMap, ScriptMode, Value};

use super::{base_bindings, compile};
use crate::spec::RuleValues;

/// Statement block filling the `cache` object for one scope.
///
/// Memoizing the produced cache per scope is up to the caller.
#[derive(Debug)]
pub struct CacheProcessor {
    script: CompiledScript,
}

#[derive(Debug, Clone)]
pub struct CacheResult {
    pub success: bool,
    pub messages: Vec<String>,
    pub cache: Value,
}

impl CacheProcessor {
    pub fn prepare(source: &str) -> Result<Self, String> {
        compile(source, ScriptMode::Block).map(|script| Self { script })
    }

    /// Run with a fresh `cache`; `namespace == None` is the cluster (or global) scope.
    pub fn execute(
        &self,
        interp: &mut Interpreter,
        namespace: Option<&str>,
        values: &RuleValues,
        global_cache: Option<&Value>,
    ) -> CacheResult {
        let cache = Value::object(ObjectMap::new());
        let mut bindings = base_bindings(&QueryScopeLimiter::from(namespace), values);
        bindings.push(("namespace", namespace.map_or(Value::Null, Value::string)));
        bindings.push(("cache", cache.clone()));
        if let Some(global) = global_cache {
            bindings.push(("globalCache", global.clone()));
        }
        match self.script.run(interp, &bindings) {
            Ok(_) => CacheResult { success: true, messages: Vec::new(), cache },
            Err(err) => CacheResult { success: false, messages: vec![err.message()], cache },
        }
    }
}
