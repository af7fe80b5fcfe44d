//! Versa kubehub – discovery and generic resource client seams, backed by kube-rs.

#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use futures::{future, stream::BoxStream, StreamExt};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, WatchParams},
    core::{ApiResource, DynamicObject, WatchEvent as KubeWatchEvent},
    discovery::Discovery,
    Client, Resource,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use versa_core::{Error, EventType, Gvr, Result};

pub mod memory;

pub use memory::{MemoryCluster, MemoryDiscovery};

/// A served resource inside one group-version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceEntry {
    /// Plural resource name, e.g. `deployments`.
    pub name: String,
    pub kind: String,
}

/// All resources served under one group-version (`apps/v1`, `v1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub group_version: String,
    pub resources: Vec<ApiResourceEntry>,
}

impl ResourceList {
    pub fn new(group_version: impl Into<String>, resources: &[(&str, &str)]) -> Self {
        Self {
            group_version: group_version.into(),
            resources: resources
                .iter()
                .map(|(name, kind)| ApiResourceEntry { name: name.to_string(), kind: kind.to_string() })
                .collect(),
        }
    }
}

/// One change-feed notification carrying the raw object.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub object: Json,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Capability query of the control plane.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Served resources grouped by group-version. Implementations may return every served
    /// version of a group, not only the preferred one; the registry's candidate order picks.
    async fn list_preferred_resources(&self) -> Result<Vec<ResourceList>>;
}

/// Generic (schema-less) CRUD + watch for any group-version-resource.
///
/// `get` and `update` fail with [`Error::NotFound`] when the object is absent.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<Json>;
    async fn create(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json>;
    async fn update(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json>;
    async fn delete(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<()>;
    async fn list(&self, gvr: &Gvr, namespace: &str) -> Result<Vec<Json>>;
    async fn watch(&self, gvr: &Gvr, namespace: &str) -> Result<WatchStream>;
}

static KUBE_CLIENT: Lazy<OnceCell<Client>> = Lazy::new(OnceCell::new);

/// Shared kube client built from the default kubeconfig / in-cluster environment.
pub async fn get_kube_client() -> anyhow::Result<Client> {
    let client = KUBE_CLIENT
        .get_or_try_init(|| async { Client::try_default().await.context("building kube client from default config") })
        .await?;
    Ok(client.clone())
}

/// Object name from `metadata.name`.
pub fn object_name(obj: &Json) -> Result<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Conversion("object missing metadata.name".into()))
}

fn map_kube_err(err: kube::Error, gvr: &Gvr, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound { resource: gvr.to_string(), name: name.to_string() },
        other => Error::Client(anyhow::Error::new(other).context(format!("{} {:?}", gvr, name))),
    }
}

fn to_dynamic(obj: &Json) -> Result<DynamicObject> {
    serde_json::from_value(obj.clone()).map_err(|e| Error::Conversion(format!("building DynamicObject: {}", e)))
}

fn from_dynamic(obj: &DynamicObject) -> Result<Json> {
    serde_json::to_value(obj).map_err(|e| Error::Conversion(format!("serializing DynamicObject: {}", e)))
}

/// Discovery through the kube API server.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }
}

#[async_trait]
impl DiscoveryService for KubeDiscovery {
    async fn list_preferred_resources(&self) -> Result<Vec<ResourceList>> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for version in group.versions() {
                let resources = group
                    .versioned_resources(version)
                    .into_iter()
                    .map(|(ar, _caps)| ApiResourceEntry { name: ar.plural, kind: ar.kind })
                    .collect();
                let group_version = if group.name().is_empty() {
                    version.to_string()
                } else {
                    format!("{}/{}", group.name(), version)
                };
                out.push(ResourceList { group_version, resources });
            }
        }
        debug!(group_versions = out.len(), "discovery complete");
        Ok(out)
    }
}

/// [`ResourceClient`] over kube's dynamic API.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }

    fn api_resource(gvr: &Gvr) -> ApiResource {
        ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: String::new(),
            plural: gvr.resource.clone(),
        }
    }

    fn api(&self, gvr: &Gvr, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &Self::api_resource(gvr))
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<Json> {
        let obj = self.api(gvr, namespace).get(name).await.map_err(|e| map_kube_err(e, gvr, name))?;
        from_dynamic(&obj)
    }

    async fn create(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json> {
        let name = object_name(obj)?;
        let created = self
            .api(gvr, namespace)
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_kube_err(e, gvr, name))?;
        from_dynamic(&created)
    }

    async fn update(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json> {
        let name = object_name(obj)?;
        let replaced = self
            .api(gvr, namespace)
            .replace(name, &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_kube_err(e, gvr, name))?;
        from_dynamic(&replaced)
    }

    async fn delete(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<()> {
        self.api(gvr, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_err(e, gvr, name))?;
        Ok(())
    }

    async fn list(&self, gvr: &Gvr, namespace: &str) -> Result<Vec<Json>> {
        // Raw list so each item is handed back untyped; decoding happens per item upstream.
        let url = DynamicObject::url_path(&Self::api_resource(gvr), Some(namespace));
        let req = kube::core::Request::new(url)
            .list(&ListParams::default())
            .map_err(|e| Error::Client(anyhow::Error::new(e)))?;
        let list: Json = self.client.request(req).await.map_err(|e| map_kube_err(e, gvr, ""))?;
        let items = list.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        debug!(gvr = %gvr, ns = %namespace, count = items.len(), "list complete");
        Ok(items)
    }

    async fn watch(&self, gvr: &Gvr, namespace: &str) -> Result<WatchStream> {
        let stream = self
            .api(gvr, namespace)
            .watch(&WatchParams::default(), "0")
            .await
            .map_err(|e| map_kube_err(e, gvr, ""))?;
        info!(gvr = %gvr, ns = %namespace, "watch opened");
        let events = stream.filter_map(|ev| {
            let out = match ev {
                Ok(KubeWatchEvent::Added(o)) => Some(from_dynamic(&o).map(|object| WatchEvent { event_type: EventType::Added, object })),
                Ok(KubeWatchEvent::Modified(o)) => Some(from_dynamic(&o).map(|object| WatchEvent { event_type: EventType::Modified, object })),
                Ok(KubeWatchEvent::Deleted(o)) => Some(from_dynamic(&o).map(|object| WatchEvent { event_type: EventType::Deleted, object })),
                Ok(KubeWatchEvent::Bookmark(_)) => None,
                Ok(KubeWatchEvent::Error(status)) => {
                    warn!(code = status.code, reason = %status.reason, "watch error event");
                    Some(Ok(WatchEvent {
                        event_type: EventType::Error,
                        object: serde_json::to_value(&status).unwrap_or(Json::Null),
                    }))
                }
                Err(e) => Some(Err(Error::Client(anyhow::Error::new(e)))),
            };
            future::ready(out)
        });
        Ok(events.boxed())
    }
}
