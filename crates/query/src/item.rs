use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use kubelint_core::K8sManifest;
use kubelint_script::{EvalResult, HostObject, Interpreter, ObjectMap, Value};
use serde_json::Value as Json;

const KEYS: [&str; 8] = ["apiVersion", "kind", "name", "namespace", "labels", "annotations", "config", "source"];

/// Script view of one manifest. Reads only; the manifest itself is never touched.
pub struct ScriptItem {
    manifest: Arc<K8sManifest>,
    // built on first access so `item.config === item.config` holds
    config: RefCell<Option<Value>>,
}

impl ScriptItem {
    pub fn new(manifest: Arc<K8sManifest>) -> Self {
        Self { manifest, config: RefCell::new(None) }
    }

    pub fn value(manifest: Arc<K8sManifest>) -> Value {
        Value::host(Self::new(manifest))
    }

    pub fn manifest(&self) -> &Arc<K8sManifest> {
        &self.manifest
    }

    pub fn config(&self) -> Value {
        self.config.borrow_mut().get_or_insert_with(|| Value::from_json(self.manifest.config())).clone()
    }
}

fn pairs(pairs: &[(String, String)]) -> Value {
    let map: ObjectMap = pairs.iter().map(|(k, v)| (Rc::from(k.as_str()), Value::string(v))).collect();
    Value::object(map)
}

fn optional(s: Option<&str>) -> Value {
    s.map_or(Value::Null, Value::string)
}

impl HostObject for ScriptItem {
    fn type_name(&self) -> &str {
        "ScriptItem"
    }

    fn get(&self, _interp: &mut Interpreter, key: &str) -> EvalResult<Value> {
        let id = self.manifest.id();
        Ok(match key {
            "apiVersion" => Value::string(&id.api_version),
            "kind" => Value::string(&id.kind),
            "name" => optional(self.manifest.name()),
            "namespace" => optional(self.manifest.namespace()),
            "labels" => pairs(self.manifest.labels()),
            "annotations" => pairs(self.manifest.annotations()),
            "config" => self.config(),
            "source" => self.manifest.source().map_or(Value::Null, |s| Value::string(s.path())),
            _ => Value::Undefined,
        })
    }

    fn keys(&self) -> Vec<Rc<str>> {
        KEYS.iter().map(|k| Rc::from(*k)).collect()
    }

    fn to_json(&self) -> Json {
        self.manifest.config().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
