//! Versa schema: fetch the plane's OpenAPI document once per process and read spec fields from it.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use versa_core::{Error, Result};

pub mod validate;

pub use validate::{validate_fields, validate_spec_from_schema};

fn openapi_path() -> String {
    std::env::var("VERSA_OPENAPI_PATH").unwrap_or_else(|_| "/openapi/v2".to_string())
}

fn schema_timeout() -> Duration {
    let secs = std::env::var("VERSA_SCHEMA_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(30);
    Duration::from_secs(secs)
}

/// Definition key for a built-in kind, e.g. `io.k8s.api.apps.v1.Deployment`.
/// The empty group maps to `core`.
pub fn build_gvk_key(group: &str, version: &str, kind: &str) -> String {
    let group = if group.is_empty() { "core" } else { group };
    format!("io.k8s.api.{}.{}.{}", group, version, kind)
}

/// Where the schema document comes from.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self) -> Result<Json>;
}

/// `GET <apiServer>/openapi/v2` through a kube client, optionally with an explicit bearer token.
pub struct HttpSchemaSource {
    target: Target,
    token: Option<String>,
}

enum Target {
    Url(String),
    Client(kube::Client),
}

impl HttpSchemaSource {
    /// Talk to `api_server` directly, authenticating with `token`.
    pub fn new(api_server: impl Into<String>, token: impl Into<String>) -> Self {
        Self { target: Target::Url(api_server.into()), token: Some(token.into()) }
    }

    /// Reuse an existing client and its credentials.
    pub fn from_client(client: kube::Client) -> Self {
        Self { target: Target::Client(client), token: None }
    }

    /// Use the shared client built from the default kubeconfig.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::from_client(versa_kubehub::get_kube_client().await?))
    }

    fn client(&self) -> anyhow::Result<kube::Client> {
        match &self.target {
            Target::Client(c) => Ok(c.clone()),
            Target::Url(url) => {
                let uri: http::Uri = url
                    .trim_end_matches('/')
                    .parse()
                    .with_context(|| format!("parsing api server url {:?}", url))?;
                kube::Client::try_from(kube::Config::new(uri)).context("building schema client")
            }
        }
    }

    async fn fetch_inner(&self) -> anyhow::Result<Json> {
        let client = self.client()?;
        let mut req = http::Request::get(openapi_path()).header(http::header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            req = req.header(http::header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = req.body(Vec::new()).context("building schema request")?;
        let doc = tokio::time::timeout(schema_timeout(), client.request::<Json>(req))
            .await
            .context("schema request timed out")?
            .context("requesting OpenAPI document")?;
        Ok(doc)
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn fetch(&self) -> Result<Json> {
        self.fetch_inner().await.map_err(|e| Error::SchemaFetch(format!("{:#}", e)))
    }
}

/// Lifecycle of a [`SchemaStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaState {
    Uninitialized,
    Fetched,
}

/// Single-fetch-then-memoize holder for the schema document.
///
/// Concurrent first callers share one retrieval. A failed fetch stores nothing, so a
/// later call retries; a failed [`SchemaStore::refetch`] keeps the previous snapshot.
pub struct SchemaStore {
    doc: ArcSwapOption<Json>,
    gate: tokio::sync::Mutex<()>,
}

static GLOBAL: Lazy<SchemaStore> = Lazy::new(SchemaStore::new);

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore {
    pub fn new() -> Self {
        Self { doc: ArcSwapOption::empty(), gate: tokio::sync::Mutex::new(()) }
    }

    pub fn global() -> &'static SchemaStore {
        &GLOBAL
    }

    pub fn state(&self) -> SchemaState {
        if self.doc.load().is_some() { SchemaState::Fetched } else { SchemaState::Uninitialized }
    }

    pub fn snapshot(&self) -> Option<Arc<Json>> {
        self.doc.load_full()
    }

    /// Return the cached document, fetching it from `source` only if none is cached yet.
    pub async fn fetch(&self, source: &dyn SchemaSource) -> Result<Arc<Json>> {
        if let Some(doc) = self.doc.load_full() {
            return Ok(doc);
        }
        let _gate = self.gate.lock().await;
        if let Some(doc) = self.doc.load_full() {
            return Ok(doc);
        }
        self.fetch_locked(source).await
    }

    /// Fetch again and replace the snapshot on success.
    pub async fn refetch(&self, source: &dyn SchemaSource) -> Result<Arc<Json>> {
        let _gate = self.gate.lock().await;
        self.fetch_locked(source).await
    }

    async fn fetch_locked(&self, source: &dyn SchemaSource) -> Result<Arc<Json>> {
        counter!("schema_fetch_total", 1u64);
        let doc = match source.fetch().await {
            Ok(Json::Object(map)) => Arc::new(Json::Object(map)),
            Ok(_) => {
                counter!("schema_fetch_err_total", 1u64);
                return Err(Error::SchemaFetch("schema document is not a mapping".into()));
            }
            Err(e) => {
                counter!("schema_fetch_err_total", 1u64);
                warn!(error = %e, "schema fetch failed");
                return Err(e);
            }
        };
        let defs = doc.get("definitions").and_then(|d| d.as_object()).map(|d| d.len()).unwrap_or(0);
        info!(definitions = defs, "schema document cached");
        self.doc.store(Some(Arc::clone(&doc)));
        Ok(doc)
    }

    /// Field names declared under `definitions[gvk_key].properties.spec`.
    ///
    /// A spec property given as a local `$ref` is followed one hop into `definitions`.
    pub fn extract_spec_fields(&self, gvk_key: &str) -> Result<BTreeSet<String>> {
        let doc = self
            .doc
            .load_full()
            .ok_or_else(|| Error::SchemaNotFound("no schema document fetched".into()))?;
        extract_spec_fields_from(&doc, gvk_key)
    }
}

pub fn extract_spec_fields_from(doc: &Json, gvk_key: &str) -> Result<BTreeSet<String>> {
    let defs = doc
        .get("definitions")
        .and_then(|d| d.as_object())
        .ok_or_else(|| Error::SchemaNotFound("no definitions in schema document".into()))?;
    let def = defs
        .get(gvk_key)
        .ok_or_else(|| Error::SchemaNotFound(format!("{} not found in schema", gvk_key)))?;
    let mut spec = def
        .get("properties")
        .and_then(|p| p.get("spec"))
        .ok_or_else(|| Error::SchemaNotFound(format!(".spec not found in schema for {}", gvk_key)))?;
    if let Some(target) = spec.get("$ref").and_then(|r| r.as_str()) {
        let name = target.trim_start_matches("#/definitions/");
        debug!(gvk = %gvk_key, target = %name, "following spec $ref");
        spec = defs
            .get(name)
            .ok_or_else(|| Error::SchemaNotFound(format!("{} referenced by {} not found", name, gvk_key)))?;
    }
    let props = spec
        .get("properties")
        .and_then(|p| p.as_object())
        .ok_or_else(|| Error::SchemaNotFound(format!(".spec has no sub-properties in {}", gvk_key)))?;
    Ok(props.keys().cloned().collect())
}

/// Fetch the process-wide schema from `api_server` with `token`; memoized for the process.
pub async fn fetch_schema(api_server: &str, token: &str) -> Result<Arc<Json>> {
    SchemaStore::global().fetch(&HttpSchemaSource::new(api_server, token)).await
}

/// [`SchemaStore::extract_spec_fields`] on the process-wide store.
pub fn extract_spec_fields(gvk_key: &str) -> Result<BTreeSet<String>> {
    SchemaStore::global().extract_spec_fields(gvk_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail_after: usize,
        doc: Json,
    }

    #[async_trait]
    impl SchemaSource for Scripted {
        async fn fetch(&self) -> Result<Json> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(Error::SchemaFetch("unreachable".into()));
            }
            Ok(self.doc.clone())
        }
    }

    fn doc() -> Json {
        json!({
            "definitions": {
                "io.k8s.api.apps.v1.Deployment": {
                    "properties": { "spec": { "$ref": "#/definitions/io.k8s.api.apps.v1.DeploymentSpec" } }
                },
                "io.k8s.api.apps.v1.DeploymentSpec": {
                    "properties": { "replicas": {}, "selector": {}, "template": {} }
                },
                "io.k8s.api.core.v1.Pod": {
                    "properties": { "spec": { "properties": { "containers": {} } } }
                },
                "io.k8s.api.core.v1.ConfigMap": { "properties": { "data": {} } }
            }
        })
    }

    #[test]
    fn gvk_key_maps_empty_group_to_core() {
        assert_eq!(build_gvk_key("", "v1", "Pod"), "io.k8s.api.core.v1.Pod");
        assert_eq!(build_gvk_key("core", "v1", "Pod"), "io.k8s.api.core.v1.Pod");
        assert_eq!(build_gvk_key("apps", "v1", "Deployment"), "io.k8s.api.apps.v1.Deployment");
    }

    #[tokio::test]
    async fn fetch_happens_once() {
        let store = SchemaStore::new();
        let src = Scripted { calls: AtomicUsize::new(0), fail_after: usize::MAX, doc: doc() };
        assert_eq!(store.state(), SchemaState::Uninitialized);
        store.fetch(&src).await.unwrap();
        store.fetch(&src).await.unwrap();
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.state(), SchemaState::Fetched);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_snapshot() {
        let store = SchemaStore::new();
        let src = Scripted { calls: AtomicUsize::new(0), fail_after: 1, doc: doc() };
        store.fetch(&src).await.unwrap();
        assert!(matches!(store.refetch(&src).await, Err(Error::SchemaFetch(_))));
        assert!(store.extract_spec_fields("io.k8s.api.core.v1.Pod").is_ok());
    }

    #[tokio::test]
    async fn failed_first_fetch_stays_uninitialized() {
        let store = SchemaStore::new();
        let src = Scripted { calls: AtomicUsize::new(0), fail_after: 0, doc: doc() };
        assert!(store.fetch(&src).await.is_err());
        assert_eq!(store.state(), SchemaState::Uninitialized);
        assert!(matches!(store.extract_spec_fields("io.k8s.api.core.v1.Pod"), Err(Error::SchemaNotFound(_))));
    }

    #[test]
    fn extract_follows_refs_and_reads_inline_properties() {
        let d = doc();
        let fields = extract_spec_fields_from(&d, "io.k8s.api.apps.v1.Deployment").unwrap();
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["replicas", "selector", "template"]);
        let pod = extract_spec_fields_from(&d, "io.k8s.api.core.v1.Pod").unwrap();
        assert!(pod.contains("containers"));
    }

    #[test]
    fn extract_reports_missing_pieces() {
        let d = doc();
        assert!(matches!(extract_spec_fields_from(&d, "io.k8s.api.apps.v1.Nope"), Err(Error::SchemaNotFound(_))));
        assert!(matches!(extract_spec_fields_from(&d, "io.k8s.api.core.v1.ConfigMap"), Err(Error::SchemaNotFound(_))));
        assert!(matches!(extract_spec_fields_from(&json!({}), "x"), Err(Error::SchemaNotFound(_))));
    }
}
