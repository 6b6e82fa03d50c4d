//! Memoizing wrapper keyed by the stable filter key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kubelint_core::K8sManifest;
use tracing::trace;

use crate::{RegistryFilter, RegistryQueryExecutor};

pub struct CachedRegistry<R> {
    inner: R,
    cache: RwLock<HashMap<String, Vec<Arc<K8sManifest>>>>,
}

impl<R: RegistryQueryExecutor> CachedRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, cache: RwLock::new(HashMap::new()) }
    }

    pub fn inner(&self) -> &R { &self.inner }

    pub fn cached_queries(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl<R: RegistryQueryExecutor> RegistryQueryExecutor for CachedRegistry<R> {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> {
        let key = filter.cache_key();
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(&key) {
                trace!(key = %key, "registry cache hit");
                return hit.clone();
            }
        }
        let items = self.inner.query(filter);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, items.clone());
        }
        items
    }

    fn describe(&self) -> String { format!("cached({})", self.inner.describe()) }
}
