//! Object identity derived from `apiVersion` / `kind` / `metadata`.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ManifestError;

/// Parsed identity of one Kubernetes-like object.
///
/// `api` is the API group (`""` for the core group) and `version` is always set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct K8sObjectId {
    pub api_version: String,
    pub api: String,
    pub version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl K8sObjectId {
    pub fn from_config(config: &Json) -> Result<Self, ManifestError> {
        let api_version = config
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingApiVersion)?;
        let kind = config
            .get("kind")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingKind)?;
        let (api, version) = split_api_version(api_version);
        let meta = config.get("metadata");
        let str_field = |key: &str| {
            meta.and_then(|m| m.get(key))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        Ok(Self {
            api_version: api_version.to_string(),
            api,
            version,
            kind: kind.to_string(),
            namespace: str_field("namespace"),
            name: str_field("name"),
        })
    }

    /// Stable identity key: `group/version/kind/namespace/name`.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.api,
            self.version,
            self.kind,
            self.namespace.as_deref().unwrap_or(""),
            self.name.as_deref().unwrap_or("")
        )
    }

    /// `v1/Kind` or `group/v1/Kind`.
    pub fn gvk_key(&self) -> String {
        if self.api.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.api, self.version, self.kind)
        }
    }
}

/// Split `apps/v1` into `("apps", "v1")` and `v1` into `("", "v1")`.
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_is_empty() {
        let id = K8sObjectId::from_config(&serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm", "namespace": "default" }
        }))
        .unwrap();
        assert_eq!(id.api, "");
        assert_eq!(id.version, "v1");
        assert_eq!(id.gvk_key(), "v1/ConfigMap");
        assert_eq!(id.key(), "/v1/ConfigMap/default/cm");
    }

    #[test]
    fn grouped_api_version() {
        let id = K8sObjectId::from_config(&serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" }
        }))
        .unwrap();
        assert_eq!(id.api, "apps");
        assert_eq!(id.namespace, None);
        assert_eq!(id.gvk_key(), "apps/v1/Deployment");
    }

    #[test]
    fn missing_kind_is_rejected() {
        let err = K8sObjectId::from_config(&serde_json::json!({ "apiVersion": "v1" })).unwrap_err();
        assert!(matches!(err, ManifestError::MissingKind));
    }
}
