use kubelint_script::ScriptLimits;
use serde::{Deserialize, Serialize};

/// Engine tunables. Defaults suit a CLI run; every field can be overridden from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Library rule files loaded in parallel.
    pub library_concurrency: usize,
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub max_string_bytes: usize,
    pub max_array_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_limits(10, ScriptLimits::default())
    }
}

impl EngineConfig {
    fn with_limits(library_concurrency: usize, limits: ScriptLimits) -> Self {
        Self {
            library_concurrency,
            max_steps: limits.max_steps,
            max_call_depth: limits.max_call_depth,
            max_string_bytes: limits.max_string_bytes,
            max_array_len: limits.max_array_len,
        }
    }

    /// `KUBELINT_LIBRARY_CONCURRENCY` plus the `KUBELINT_SCRIPT_*` limits.
    pub fn from_env() -> Self {
        let library_concurrency = std::env::var("KUBELINT_LIBRARY_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| Self::default().library_concurrency);
        Self::with_limits(library_concurrency, ScriptLimits::from_env())
    }

    pub fn script_limits(&self) -> ScriptLimits {
        ScriptLimits {
            max_steps: self.max_steps,
            max_call_depth: self.max_call_depth,
            max_string_bytes: self.max_string_bytes,
            max_array_len: self.max_array_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"libraryConcurrency": 2}"#).unwrap();
        assert_eq!(cfg.library_concurrency, 2);
        assert_eq!(cfg.script_limits(), ScriptLimits::default());
    }

    #[test]
    fn env_without_overrides_matches_defaults() {
        std::env::remove_var("KUBELINT_LIBRARY_CONCURRENCY");
        assert_eq!(EngineConfig::from_env().library_concurrency, EngineConfig::default().library_concurrency);
    }
}
