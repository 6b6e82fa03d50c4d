//! Union of a local and a remote registry.

use std::collections::HashSet;
use std::sync::Arc;

use kubelint_core::K8sManifest;

use crate::{RegistryFilter, RegistryQueryExecutor};

/// Local results first; remote objects with an identity already seen locally are dropped.
pub struct CombinedRegistry<L, R> {
    local: L,
    remote: R,
}

impl<L: RegistryQueryExecutor, R: RegistryQueryExecutor> CombinedRegistry<L, R> {
    pub fn new(local: L, remote: R) -> Self { Self { local, remote } }
}

impl<L: RegistryQueryExecutor, R: RegistryQueryExecutor> RegistryQueryExecutor for CombinedRegistry<L, R> {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> {
        let mut out = self.local.query(filter);
        let mut seen: HashSet<String> = out.iter().map(|m| m.id().key()).collect();
        for m in self.remote.query(filter) {
            if seen.insert(m.id().key()) {
                out.push(m);
            }
        }
        out
    }

    fn describe(&self) -> String {
        format!("combined({}, {})", self.local.describe(), self.remote.describe())
    }
}
