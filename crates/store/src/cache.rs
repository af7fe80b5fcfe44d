//! Process-wide kind → GVR cache.
//!
//! Entries are whole [`Gvr`] values inside an immutable map that is swapped atomically,
//! so a reader never observes a half-written triple. No TTL: entries stay until the next
//! successful refresh or explicit `set`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::counter;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use versa_core::{Gvr, Result};
use versa_kubehub::DiscoveryService;

use crate::{CapabilityIndex, Registry};

/// Outcome of a bulk refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub resolved: usize,
    /// Registered kinds with no served candidate; left as they were in the cache.
    pub unresolved: Vec<String>,
}

pub struct GvrCache {
    items: ArcSwap<FxHashMap<String, Gvr>>,
}

static GLOBAL: Lazy<GvrCache> = Lazy::new(GvrCache::new);

impl Default for GvrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GvrCache {
    pub fn new() -> Self {
        Self { items: ArcSwap::from_pointee(FxHashMap::default()) }
    }

    pub fn global() -> &'static GvrCache {
        &GLOBAL
    }

    pub fn get(&self, kind: &str) -> Option<Gvr> {
        self.items.load().get(kind).cloned()
    }

    pub fn set(&self, kind: impl Into<String>, gvr: Gvr) {
        let kind = kind.into();
        self.items.rcu(|cur| {
            let mut next = FxHashMap::clone(cur);
            next.insert(kind.clone(), gvr.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.items.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Arc<FxHashMap<String, Gvr>> {
        self.items.load_full()
    }

    /// Query capabilities once and resolve every registered kind against that snapshot.
    ///
    /// All winners land in a single swap. A failed query leaves the cache untouched.
    pub async fn refresh(&self, discovery: &dyn DiscoveryService, registry: &Registry) -> Result<RefreshSummary> {
        counter!("gvr_cache_refresh_total", 1u64);
        let lists = match discovery.list_preferred_resources().await {
            Ok(l) => l,
            Err(e) => {
                counter!("gvr_cache_refresh_err_total", 1u64);
                warn!(error = %e, "gvr cache refresh failed; keeping previous entries");
                return Err(e);
            }
        };
        let index = CapabilityIndex::build(&lists);
        let kinds = registry.snapshot();

        let mut resolved: Vec<(String, Gvr)> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        for (kind, candidates) in kinds.iter() {
            match index.select(kind, candidates) {
                Some(gvr) => resolved.push((kind.clone(), gvr)),
                None => unresolved.push(kind.clone()),
            }
        }
        unresolved.sort();

        self.items.rcu(|cur| {
            let mut next = FxHashMap::clone(cur);
            for (kind, gvr) in &resolved {
                next.insert(kind.clone(), gvr.clone());
            }
            next
        });
        info!(resolved = resolved.len(), unresolved = unresolved.len(), "gvr cache refreshed");
        Ok(RefreshSummary { resolved: resolved.len(), unresolved })
    }
}
