//! Shapes of the Kubevious rule manifests (`spec` sections), as written by users.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

pub const RULES_API_GROUP: &str = "kubevious.io";
pub const RULES_API_VERSION: &str = "kubevious.io/v1";

/// Rule parameters visible to scripts as `values`.
pub type RuleValues = Map<String, Json>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterRuleSpec {
    pub target: String,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    pub disabled: bool,
    pub values: RuleValues,
    pub dependencies: Vec<Json>,
    pub application: ApplicationSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub clustered: bool,
    pub use_applicator: bool,
    pub only_selected_namespaces: bool,
    pub namespaces: Vec<NamespaceApplication>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceApplication {
    pub name: String,
    pub values: RuleValues,
}

/// Namespaced rule: the script part of a cluster rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSpec {
    pub target: String,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    pub disabled: bool,
    pub values: RuleValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleApplicatorSpec {
    pub cluster_rule_ref: ClusterRuleRef,
    pub disabled: bool,
    pub values: RuleValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRuleRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySpec {
    pub rules: Vec<LibraryRuleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryRuleRef {
    pub name: String,
    pub path: String,
    pub category: Option<String>,
    pub summary: Option<String>,
}

/// The four scripts of one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleScripts {
    pub target: String,
    pub rule: String,
    pub global_cache: Option<String>,
    pub cache: Option<String>,
}

impl From<&ClusterRuleSpec> for RuleScripts {
    fn from(s: &ClusterRuleSpec) -> Self {
        Self { target: s.target.clone(), rule: s.rule.clone(), global_cache: s.global_cache.clone(), cache: s.cache.clone() }
    }
}

impl From<&RuleSpec> for RuleScripts {
    fn from(s: &RuleSpec) -> Self {
        Self { target: s.target.clone(), rule: s.rule.clone(), global_cache: s.global_cache.clone(), cache: s.cache.clone() }
    }
}

/// Decode the `spec` section of a rule manifest; a missing spec decodes as defaults.
pub fn parse_spec<T: DeserializeOwned + Default>(config: &Json) -> Result<T, serde_json::Error> {
    match config.get("spec") {
        None | Some(Json::Null) => Ok(T::default()),
        Some(spec) => T::deserialize(spec),
    }
}

/// Shallow merge; earlier layers win.
pub fn merge_values<'a>(layers: impl IntoIterator<Item = &'a RuleValues>) -> RuleValues {
    let mut out = RuleValues::new();
    for layer in layers {
        for (k, v) in layer {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cluster_rule_defaults() {
        let spec: ClusterRuleSpec = parse_spec(&json!({ "spec": { "target": "x", "rule": "y" } })).unwrap();
        assert!(!spec.disabled);
        assert!(spec.values.is_empty());
        assert_eq!(spec.application, ApplicationSpec::default());
        let empty: ClusterRuleSpec = parse_spec(&json!({})).unwrap();
        assert_eq!(empty, ClusterRuleSpec::default());
    }

    #[test]
    fn application_fields_are_camel_case() {
        let spec: ClusterRuleSpec = parse_spec(&json!({ "spec": {
            "application": { "useApplicator": true, "onlySelectedNamespaces": true,
                             "namespaces": [{ "name": "a", "values": { "x": 2 } }] }
        }}))
        .unwrap();
        assert!(spec.application.use_applicator && spec.application.only_selected_namespaces);
        assert_eq!(spec.application.namespaces[0].values["x"], json!(2));
    }

    #[test]
    fn merge_is_first_wins() {
        let a = json!({ "x": 3 }).as_object().cloned().unwrap();
        let b = json!({ "x": 2, "y": 2 }).as_object().cloned().unwrap();
        let c = json!({ "x": 1, "y": 1, "z": 1 }).as_object().cloned().unwrap();
        assert_eq!(Json::Object(merge_values([&a, &b, &c])), json!({ "x": 3, "y": 2, "z": 1 }));
    }
}
