//! kubelint kubehub: live cluster objects exposed as a manifest registry.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use kubelint_core::{K8sManifest, ManifestSource, SourceKind};
use kubelint_registry::{RegistryFilter, RegistryQueryExecutor};
use tracing::{debug, info, warn};

/// A served resource kind, as reported by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
    pub resource: ApiResource,
    pub namespaced: bool,
    pub preferred: bool,
}

impl DiscoveredResource {
    fn matches(&self, f: &RegistryFilter) -> bool {
        let ar = &self.resource;
        f.kind.as_deref().map_or(false, |k| ar.kind == k)
            && f.api_name.as_deref().map_or(true, |g| ar.group == g)
            && f.version.as_deref().map_or(self.preferred, |v| ar.version == v)
    }
}

/// Discover served resources (incl. CRDs) across all versions.
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        let preferred = group.preferred_version_or_latest().to_string();
        for version in group.versions() {
            for (ar, caps) in group.versioned_resources(version) {
                out.push(DiscoveredResource {
                    resource: ar,
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                    preferred: version == preferred,
                });
            }
        }
    }
    // Stable-ish order
    out.sort_by(|a, b| {
        a.resource.group.cmp(&b.resource.group)
            .then(a.resource.version.cmp(&b.resource.version))
            .then(a.resource.kind.cmp(&b.resource.kind))
    });
    Ok(out)
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn manifest_from(obj: &DynamicObject, ar: &ApiResource, source: &Arc<ManifestSource>) -> Result<Arc<K8sManifest>> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    // list items come back without type meta
    if let Some(map) = raw.as_object_mut() {
        map.entry("apiVersion").or_insert_with(|| serde_json::Value::String(ar.api_version.clone()));
        map.entry("kind").or_insert_with(|| serde_json::Value::String(ar.kind.clone()));
    }
    K8sManifest::attached(raw, source).map_err(|e| anyhow!("invalid object from cluster: {}", e))
}

type ListKey = (String, String, String, Option<String>);

/// Registry backed by a live cluster. Each (gvk, namespace) list is fetched once.
///
/// The registry trait is synchronous; lists run on the captured tokio runtime
/// via `block_in_place`, so it must be used from a multi-threaded runtime.
pub struct RemoteRegistry {
    client: Client,
    handle: tokio::runtime::Handle,
    resources: Vec<DiscoveredResource>,
    source: Arc<ManifestSource>,
    lists: RwLock<HashMap<ListKey, Vec<Arc<K8sManifest>>>>,
}

impl RemoteRegistry {
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Self::with_client(client, "cluster").await
    }

    pub async fn with_client(client: Client, cluster: &str) -> Result<Self> {
        let resources = discover(client.clone()).await?;
        info!(kinds = resources.len(), cluster = %cluster, "cluster discovery complete");
        Ok(Self {
            client,
            handle: tokio::runtime::Handle::current(),
            resources,
            source: ManifestSource::new(SourceKind::K8s, cluster),
            lists: RwLock::new(HashMap::new()),
        })
    }

    pub fn source(&self) -> &Arc<ManifestSource> { &self.source }
    pub fn resources(&self) -> &[DiscoveredResource] { &self.resources }

    async fn list(&self, res: &DiscoveredResource, namespace: Option<&str>) -> Result<Vec<Arc<K8sManifest>>> {
        let ar = &res.resource;
        let ns = if res.namespaced { namespace } else { None };
        let key: ListKey = (ar.group.clone(), ar.version.clone(), ar.kind.clone(), ns.map(|s| s.to_string()));
        if let Some(hit) = self.lists.read().ok().and_then(|l| l.get(&key).cloned()) {
            return Ok(hit);
        }
        let api: Api<DynamicObject> = match ns {
            Some(n) => Api::namespaced_with(self.client.clone(), n, ar),
            None => Api::all_with(self.client.clone(), ar),
        };
        let list = api.list(&ListParams::default()).await.with_context(|| format!("listing {}", ar.kind))?;
        metrics::counter!("remote_list_calls", 1u64);
        let mut out = Vec::with_capacity(list.items.len());
        for o in list.items.iter() {
            out.push(manifest_from(o, ar, &self.source)?);
        }
        debug!(kind = %ar.kind, ns = ?ns, count = out.len(), "listed from cluster");
        if let Ok(mut lists) = self.lists.write() {
            lists.insert(key, out.clone());
        }
        Ok(out)
    }

    async fn query_async(&self, filter: &RegistryFilter) -> Result<Vec<Arc<K8sManifest>>> {
        let mut out = Vec::new();
        for res in self.resources.iter().filter(|r| r.matches(filter)) {
            let items = self.list(res, filter.namespace.as_deref()).await?;
            out.extend(items.into_iter().filter(|m| filter.matches(m)));
        }
        Ok(out)
    }
}

impl RegistryQueryExecutor for RemoteRegistry {
    fn query(&self, filter: &RegistryFilter) -> Vec<Arc<K8sManifest>> {
        if filter.kind.is_none() {
            warn!("remote registry query without kind ignored");
            return Vec::new();
        }
        let res = tokio::task::block_in_place(|| self.handle.block_on(self.query_async(filter)));
        match res {
            Ok(items) => items,
            Err(e) => {
                warn!(error = ?e, kind = ?filter.kind, "remote query failed");
                Vec::new()
            }
        }
    }

    fn describe(&self) -> String { format!("remote({})", self.source.path()) }
}
