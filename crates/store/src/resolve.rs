//! Resolver: intersect the plane's capability list with a kind's candidate list.

use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use versa_core::{Error, GroupVersion, Gvr, Result};
use versa_kubehub::{DiscoveryService, ResourceList};

use crate::Registry;

/// Lookup from (group-version, kind) to plural resource name, built from one capability snapshot.
#[derive(Debug, Default, Clone)]
pub struct CapabilityIndex {
    served: FxHashMap<(GroupVersion, String), String>,
}

impl CapabilityIndex {
    pub fn build(lists: &[ResourceList]) -> Self {
        let mut served = FxHashMap::default();
        for list in lists {
            let gv = match GroupVersion::parse(&list.group_version) {
                Ok(gv) => gv,
                Err(_) => {
                    debug!(group_version = %list.group_version, "skipping unparseable group version");
                    continue;
                }
            };
            for r in &list.resources {
                // Subresources (`deployments/scale`) share the parent's kind; keep the top-level name.
                if r.name.contains('/') {
                    continue;
                }
                served.entry((gv.clone(), r.kind.clone())).or_insert_with(|| r.name.clone());
            }
        }
        Self { served }
    }

    pub fn len(&self) -> usize {
        self.served.len()
    }

    pub fn is_empty(&self) -> bool {
        self.served.is_empty()
    }

    /// First candidate served for `kind`, paired with its plural name.
    pub fn select(&self, kind: &str, candidates: &[GroupVersion]) -> Option<Gvr> {
        candidates.iter().find_map(|gv| {
            self.served
                .get(&(gv.clone(), kind.to_string()))
                .map(|plural| Gvr::new(gv, plural.clone()))
        })
    }
}

/// Resolve `kind` against a fresh capability query. No cache side effects.
pub async fn resolve(discovery: &dyn DiscoveryService, registry: &Registry, kind: &str) -> Result<Gvr> {
    counter!("gvr_resolve_total", 1u64);
    let candidates = match registry.candidates(kind) {
        Some(c) if !c.is_empty() => c,
        _ => {
            counter!("gvr_resolve_miss_total", 1u64);
            return Err(Error::UnsupportedKind { kind: kind.to_string() });
        }
    };
    let lists = discovery.list_preferred_resources().await?;
    let index = CapabilityIndex::build(&lists);
    match index.select(kind, &candidates) {
        Some(gvr) => {
            info!(kind = %kind, gvr = %gvr, "resolved kind");
            Ok(gvr)
        }
        None => {
            counter!("gvr_resolve_miss_total", 1u64);
            Err(Error::UnsupportedKind { kind: kind.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_skips_subresources_and_bad_group_versions() {
        let idx = CapabilityIndex::build(&[
            ResourceList::new("apps/v1", &[("deployments/scale", "Scale"), ("deployments", "Deployment")]),
            ResourceList::new("a/b/c", &[("things", "Thing")]),
        ]);
        assert_eq!(idx.len(), 1);
        let gvr = idx.select("Deployment", &[GroupVersion::new("apps", "v1")]).unwrap();
        assert_eq!(gvr.resource, "deployments");
        assert!(idx.select("Thing", &[GroupVersion::new("a", "b")]).is_none());
    }

    #[test]
    fn select_matches_kind_not_just_group_version() {
        let idx = CapabilityIndex::build(&[ResourceList::new("batch/v1", &[("jobs", "Job"), ("cronjobs", "CronJob")])]);
        let gv = [GroupVersion::new("batch", "v1")];
        assert_eq!(idx.select("CronJob", &gv).unwrap().resource, "cronjobs");
        assert_eq!(idx.select("Job", &gv).unwrap().resource, "jobs");
        assert!(idx.select("Deployment", &gv).is_none());
    }
}
