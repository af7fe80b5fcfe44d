//! Versa public API façade.
//!
//! [`WorkloadApi`] is the uniform CRUD/watch/export surface over one pinned [`Gvr`].
//! [`WorkloadAdapter`] implements it on top of a generic [`ResourceClient`] and the codec.

#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use versa_core::{codec, text, Error, EventType, Gvr, JsonMap, KindFamily, Result, WorkloadEntity};
use versa_kubehub::{DiscoveryService, ResourceClient};
use versa_store::{resolve, GvrCache, Registry};

pub mod watch;

pub use versa_core::prelude;
pub use versa_schema::{validate_fields, validate_spec_from_schema, SchemaStore};
pub use watch::{EventCallback, WatchHandle, WatchState};

/// Uniform operations for one workload kind, independent of the served group-version.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    fn kind(&self) -> &str;
    fn gvr(&self) -> &Gvr;

    /// Upsert: merge `spec` and labels into an existing object of the same name, else create.
    async fn create(&self, namespace: &str, entity: &WorkloadEntity) -> Result<()>;
    /// Merge `spec` and labels into an existing object; [`Error::NotFound`] when absent.
    async fn update(&self, namespace: &str, entity: &WorkloadEntity) -> Result<()>;
    async fn get(&self, namespace: &str, name: &str) -> Result<WorkloadEntity>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
    /// Best-effort: objects that fail to decode are skipped.
    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadEntity>>;
    /// Overwrite the top-level keys in `patch` on the fetched object and submit it whole.
    /// Read-modify-write without a concurrency check.
    async fn patch(&self, namespace: &str, name: &str, patch: &JsonMap) -> Result<()>;
    /// Open the change-feed and spawn a listener. Only the open step can fail.
    async fn watch(&self, namespace: &str, cancel: CancellationToken, on_event: EventCallback) -> Result<WatchHandle>;
    /// Raw object as YAML, every field the plane returned included.
    async fn export_yaml(&self, namespace: &str, name: &str) -> Result<String>;
}

/// Adapter pinned to the GVR resolved at construction.
#[derive(Clone)]
pub struct WorkloadAdapter {
    client: Arc<dyn ResourceClient>,
    gvr: Gvr,
    kind: String,
}

impl std::fmt::Debug for WorkloadAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadAdapter").field("kind", &self.kind).field("gvr", &self.gvr).finish()
    }
}

impl WorkloadAdapter {
    /// Resolve `kind` against a fresh capability query and pin the winner.
    pub async fn new(
        registry: &Registry,
        discovery: &dyn DiscoveryService,
        client: Arc<dyn ResourceClient>,
        kind: &str,
    ) -> Result<Self> {
        let gvr = resolve(discovery, registry, kind).await.map_err(|e| match e {
            Error::UnsupportedKind { .. } => e,
            other => {
                warn!(kind = %kind, error = %other, "resolution failed");
                Error::UnsupportedKind { kind: kind.to_string() }
            }
        })?;
        Ok(Self::with_gvr(client, gvr, kind))
    }

    /// Reuse a cached GVR; on a miss resolve and store the result in `cache`.
    pub async fn from_cache(
        cache: &GvrCache,
        registry: &Registry,
        discovery: &dyn DiscoveryService,
        client: Arc<dyn ResourceClient>,
        kind: &str,
    ) -> Result<Self> {
        if let Some(gvr) = cache.get(kind) {
            debug!(kind = %kind, gvr = %gvr, "gvr cache hit");
            return Ok(Self::with_gvr(client, gvr, kind));
        }
        let adapter = Self::new(registry, discovery, client, kind).await?;
        cache.set(kind, adapter.gvr.clone());
        Ok(adapter)
    }

    /// Pin an already known GVR without querying discovery.
    pub fn with_gvr(client: Arc<dyn ResourceClient>, gvr: Gvr, kind: impl Into<String>) -> Self {
        Self { client, gvr, kind: kind.into() }
    }

    fn encode(&self, entity: &WorkloadEntity) -> Json {
        codec::encode(&self.gvr.group_version(), &self.kind, entity)
    }
}

/// Build an adapter against the process-wide registry.
pub async fn new_adapter(
    discovery: &dyn DiscoveryService,
    client: Arc<dyn ResourceClient>,
    kind: &str,
) -> Result<WorkloadAdapter> {
    WorkloadAdapter::new(Registry::global(), discovery, client, kind).await
}

/// Build an adapter against the process-wide registry, reusing the process-wide GVR cache.
pub async fn new_adapter_cached(
    discovery: &dyn DiscoveryService,
    client: Arc<dyn ResourceClient>,
    kind: &str,
) -> Result<WorkloadAdapter> {
    WorkloadAdapter::from_cache(GvrCache::global(), Registry::global(), discovery, client, kind).await
}

/// Factory for the kinds with a dedicated spec shape (Deployment, StatefulSet, DaemonSet, Job, CronJob).
pub async fn new_adapter_for(
    discovery: &dyn DiscoveryService,
    client: Arc<dyn ResourceClient>,
    kind: &str,
) -> Result<Box<dyn WorkloadApi>> {
    if KindFamily::for_kind(kind) == KindFamily::Generic {
        return Err(Error::UnsupportedKind { kind: kind.to_string() });
    }
    Ok(Box::new(new_adapter(discovery, client, kind).await?))
}

#[async_trait]
impl WorkloadApi for WorkloadAdapter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    async fn create(&self, namespace: &str, entity: &WorkloadEntity) -> Result<()> {
        let desired = self.encode(entity);
        match self.client.get(&self.gvr, namespace, &entity.name).await {
            Ok(mut existing) => {
                debug!(gvr = %self.gvr, ns = %namespace, name = %entity.name, "exists; updating");
                codec::merge_desired(&mut existing, &desired)?;
                self.client.update(&self.gvr, namespace, &existing).await?;
            }
            Err(e) if e.is_not_found() => {
                self.client.create(&self.gvr, namespace, &desired).await?;
            }
            Err(e) => return Err(e),
        }
        info!(gvr = %self.gvr, ns = %namespace, name = %entity.name, "applied");
        Ok(())
    }

    async fn update(&self, namespace: &str, entity: &WorkloadEntity) -> Result<()> {
        let mut existing = self.client.get(&self.gvr, namespace, &entity.name).await?;
        codec::merge_desired(&mut existing, &self.encode(entity))?;
        self.client.update(&self.gvr, namespace, &existing).await?;
        debug!(gvr = %self.gvr, ns = %namespace, name = %entity.name, "updated");
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<WorkloadEntity> {
        let obj = self.client.get(&self.gvr, namespace, name).await?;
        codec::decode(&self.kind, &obj)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.client.delete(&self.gvr, namespace, name).await?;
        debug!(gvr = %self.gvr, ns = %namespace, name = %name, "deleted");
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<WorkloadEntity>> {
        let items = self.client.list(&self.gvr, namespace).await?;
        let mut out = Vec::with_capacity(items.len());
        for obj in &items {
            match codec::decode(&self.kind, obj) {
                Ok(entity) => out.push(entity),
                Err(e) => {
                    counter!("adapter_list_skipped_total", 1u64);
                    warn!(gvr = %self.gvr, ns = %namespace, error = %e, "skipping undecodable object");
                }
            }
        }
        Ok(out)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &JsonMap) -> Result<()> {
        let mut obj = self.client.get(&self.gvr, namespace, name).await?;
        let root = obj
            .as_object_mut()
            .ok_or_else(|| Error::Conversion(format!("{} {:?} is not a mapping", self.gvr, name)))?;
        for (k, v) in patch {
            root.insert(k.clone(), v.clone());
        }
        self.client.update(&self.gvr, namespace, &obj).await?;
        debug!(gvr = %self.gvr, ns = %namespace, name = %name, keys = patch.len(), "patched");
        Ok(())
    }

    async fn watch(&self, namespace: &str, cancel: CancellationToken, on_event: EventCallback) -> Result<WatchHandle> {
        let feed = self.client.watch(&self.gvr, namespace).await?;
        Ok(watch::spawn_listener(
            self.kind.clone(),
            self.gvr.clone(),
            namespace.to_string(),
            feed,
            cancel,
            on_event,
        ))
    }

    async fn export_yaml(&self, namespace: &str, name: &str) -> Result<String> {
        let obj = self.client.get(&self.gvr, namespace, name).await?;
        text::to_yaml(&obj)
    }
}

/// Callback that forwards events into an unbounded channel.
pub fn channel_callback() -> (EventCallback, tokio::sync::mpsc::UnboundedReceiver<(EventType, WorkloadEntity)>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let cb: EventCallback = Box::new(move |ty, entity| {
        let _ = tx.send((ty, entity));
    });
    (cb, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use versa_core::GroupVersion;
    use versa_kubehub::MemoryCluster;

    fn adapter(kind: &str, gv: &GroupVersion, resource: &str) -> (Arc<MemoryCluster>, WorkloadAdapter) {
        let cluster = Arc::new(MemoryCluster::new());
        let a = WorkloadAdapter::with_gvr(cluster.clone(), Gvr::new(gv, resource), kind);
        (cluster, a)
    }

    #[tokio::test]
    async fn encodes_with_pinned_group_version() {
        let (cluster, a) = adapter("Deployment", &GroupVersion::new("apps", "v1beta2"), "deployments");
        a.create("ns", &WorkloadEntity::new("Deployment", "web").with_image("nginx")).await.unwrap();
        let raw = cluster.get(a.gvr(), "ns", "web").await.unwrap();
        assert_eq!(raw["apiVersion"], "apps/v1beta2");
        assert_eq!(raw["kind"], "Deployment");
    }

    #[tokio::test]
    async fn export_yaml_is_raw_object() {
        let (cluster, a) = adapter("Job", &GroupVersion::new("batch", "v1"), "jobs");
        a.create("ns", &WorkloadEntity::new("Job", "once").with_image("busybox")).await.unwrap();
        let yaml = a.export_yaml("ns", "once").await.unwrap();
        let back: Json = text::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(back, cluster.get(a.gvr(), "ns", "once").await.unwrap());
        assert!(yaml.contains("backoffLimit: 4"));
    }

    #[test]
    fn debug_shows_kind_and_gvr() {
        let (_, a) = adapter("DaemonSet", &GroupVersion::new("apps", "v1"), "daemonsets");
        let s = format!("{:?}", a);
        assert!(s.contains("DaemonSet") && s.contains("daemonsets"));
    }
}
