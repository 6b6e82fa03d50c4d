use std::sync::Arc;

use kubelint_core::{K8sManifest, ManifestPackage};
use tracing::debug;

pub const COMPILE_FAILURE: &str = "Failed to compile the rule";

/// Writes rule outcomes back onto manifests.
#[derive(Debug, Clone)]
pub struct Reporter {
    package: Arc<ManifestPackage>,
}

impl Reporter {
    pub fn new(package: Arc<ManifestPackage>) -> Self {
        Self { package }
    }

    pub fn package(&self) -> &Arc<ManifestPackage> {
        &self.package
    }

    /// Flag a broken rule on its own manifest. Repeated reports are dropped.
    pub fn compile_failure(&self, rule_manifest: &K8sManifest) {
        {
            let mut state = rule_manifest.state_mut();
            if state.errors_with_rule {
                return;
            }
            state.errors_with_rule = true;
        }
        debug!(rule = ?rule_manifest.name(), "rule compile failure reported");
        self.package.manifest_error(rule_manifest, COMPILE_FAILURE);
    }

    pub fn violation(&self, manifest: &K8sManifest, errors: &[String], warnings: &[String]) {
        let mut state = manifest.state_mut();
        state.rules.processed = true;
        state.rules.errors.extend(errors.iter().cloned());
        state.rules.warnings.extend(warnings.iter().cloned());
    }

    pub fn passed(&self, manifest: &K8sManifest) {
        manifest.state_mut().rules.processed = true;
    }
}
