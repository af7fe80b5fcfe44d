//! In-memory stand-ins for the control plane, used by tests and local demos.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use versa_core::{Error, EventType, Gvr, Result};

use crate::{object_name, DiscoveryService, ResourceClient, ResourceList, WatchEvent, WatchStream};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Discovery answering from a fixed capability list, or failing on demand.
#[derive(Default)]
pub struct MemoryDiscovery {
    state: Mutex<DiscoveryState>,
}

#[derive(Default)]
struct DiscoveryState {
    lists: Vec<ResourceList>,
    failure: Option<String>,
    calls: usize,
}

impl MemoryDiscovery {
    pub fn new(lists: Vec<ResourceList>) -> Self {
        Self { state: Mutex::new(DiscoveryState { lists, failure: None, calls: 0 }) }
    }

    pub fn set_lists(&self, lists: Vec<ResourceList>) {
        let mut st = lock(&self.state);
        st.lists = lists;
        st.failure = None;
    }

    /// Make every following query fail with `message` until `set_lists` is called.
    pub fn fail_with(&self, message: impl Into<String>) {
        lock(&self.state).failure = Some(message.into());
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl DiscoveryService for MemoryDiscovery {
    async fn list_preferred_resources(&self) -> Result<Vec<ResourceList>> {
        let mut st = lock(&self.state);
        st.calls += 1;
        match &st.failure {
            Some(msg) => Err(Error::Discovery(msg.clone())),
            None => Ok(st.lists.clone()),
        }
    }
}

type ObjectKey = (Gvr, String, String);

struct Subscriber {
    gvr: Gvr,
    namespace: String,
    tx: mpsc::UnboundedSender<Result<WatchEvent>>,
}

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<ObjectKey, Json>,
    subscribers: Vec<Subscriber>,
    revision: u64,
}

impl ClusterState {
    fn publish(&mut self, gvr: &Gvr, namespace: &str, event: WatchEvent) {
        self.subscribers.retain(|s| {
            if &s.gvr != gvr || s.namespace != namespace {
                return true;
            }
            s.tx.send(Ok(event.clone())).is_ok()
        });
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// In-memory object store implementing [`ResourceClient`] with server-like bookkeeping
/// (namespace, uid, resourceVersion, creationTimestamp) and live watch fan-out.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj` verbatim without bookkeeping or events.
    pub fn insert_raw(&self, gvr: &Gvr, namespace: &str, name: &str, obj: Json) {
        lock(&self.state).objects.insert((gvr.clone(), namespace.to_string(), name.to_string()), obj);
    }

    /// Push an arbitrary event to current subscribers of `gvr`/`namespace`.
    pub fn inject_event(&self, gvr: &Gvr, namespace: &str, event_type: EventType, object: Json) {
        lock(&self.state).publish(gvr, namespace, WatchEvent { event_type, object });
    }

    /// Close every open change-feed.
    pub fn close_watches(&self) {
        lock(&self.state).subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(gvr: &Gvr, namespace: &str, name: &str) -> ObjectKey {
    (gvr.clone(), namespace.to_string(), name.to_string())
}

fn not_found(gvr: &Gvr, name: &str) -> Error {
    Error::NotFound { resource: gvr.to_string(), name: name.to_string() }
}

#[async_trait]
impl ResourceClient for MemoryCluster {
    async fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<Json> {
        lock(&self.state)
            .objects
            .get(&key(gvr, namespace, name))
            .cloned()
            .ok_or_else(|| not_found(gvr, name))
    }

    async fn create(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json> {
        let name = object_name(obj)?.to_string();
        let mut st = lock(&self.state);
        let k = key(gvr, namespace, &name);
        if st.objects.contains_key(&k) {
            return Err(Error::Client(anyhow!("{} {:?} already exists", gvr, name)));
        }
        let mut stored = obj.clone();
        let rv = st.next_revision();
        if let Some(meta) = stored.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("namespace".into(), json!(namespace));
            meta.insert("uid".into(), json!(Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), json!(rv));
            meta.insert("creationTimestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        }
        st.objects.insert(k, stored.clone());
        st.publish(gvr, namespace, WatchEvent { event_type: EventType::Added, object: stored.clone() });
        debug!(gvr = %gvr, ns = %namespace, name = %name, "memory create");
        Ok(stored)
    }

    async fn update(&self, gvr: &Gvr, namespace: &str, obj: &Json) -> Result<Json> {
        let name = object_name(obj)?.to_string();
        let mut st = lock(&self.state);
        let k = key(gvr, namespace, &name);
        if !st.objects.contains_key(&k) {
            return Err(not_found(gvr, &name));
        }
        let mut stored = obj.clone();
        let rv = st.next_revision();
        if let Some(meta) = stored.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("resourceVersion".into(), json!(rv));
        }
        st.objects.insert(k, stored.clone());
        st.publish(gvr, namespace, WatchEvent { event_type: EventType::Modified, object: stored.clone() });
        Ok(stored)
    }

    async fn delete(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<()> {
        let mut st = lock(&self.state);
        match st.objects.remove(&key(gvr, namespace, name)) {
            Some(obj) => {
                st.publish(gvr, namespace, WatchEvent { event_type: EventType::Deleted, object: obj });
                Ok(())
            }
            None => Err(not_found(gvr, name)),
        }
    }

    async fn list(&self, gvr: &Gvr, namespace: &str) -> Result<Vec<Json>> {
        Ok(lock(&self.state)
            .objects
            .iter()
            .filter(|((g, ns, _), _)| g == gvr && ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn watch(&self, gvr: &Gvr, namespace: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).subscribers.push(Subscriber { gvr: gvr.clone(), namespace: namespace.to_string(), tx });
        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(stream.boxed())
    }
}
