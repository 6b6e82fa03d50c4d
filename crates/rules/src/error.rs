use serde::Serialize;

/// Which stage of a rule a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleErrorSource {
    Target,
    /// The validation script.
    Script,
    GlobalCache,
    Cache,
}

impl RuleErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleErrorSource::Target => "target",
            RuleErrorSource::Script => "script",
            RuleErrorSource::GlobalCache => "globalCache",
            RuleErrorSource::Cache => "cache",
        }
    }
}

/// A compile or runtime problem of the rule itself (never a manifest violation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleError {
    pub source: RuleErrorSource,
    pub msg: String,
}

impl RuleError {
    pub fn new(source: RuleErrorSource, msg: impl Into<String>) -> Self {
        Self { source, msg: msg.into() }
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.source.as_str(), self.msg)
    }
}

/// Failure to load a library rule file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("rule source not found: {0}")]
    NotFound(String),
}
