#![forbid(unsafe_code)]

use std::sync::Arc;

use versa_core::{Error, GroupVersion, Gvr};
use versa_kubehub::{MemoryDiscovery, ResourceList};
use versa_store::{resolve, GvrCache, Registry};

fn widget_registry() -> Registry {
    let reg = Registry::empty();
    reg.register("Widget", vec![GroupVersion::new("example.io", "v1"), GroupVersion::new("example.io", "v2")]);
    reg
}

#[tokio::test]
async fn resolution_prefers_first_served_candidate() {
    let reg = widget_registry();

    let only_v2 = MemoryDiscovery::new(vec![ResourceList::new("example.io/v2", &[("widgets", "Widget")])]);
    let gvr = resolve(&only_v2, &reg, "Widget").await.unwrap();
    assert_eq!(gvr, Gvr::new(&GroupVersion::new("example.io", "v2"), "widgets"));

    let both = MemoryDiscovery::new(vec![
        ResourceList::new("example.io/v2", &[("widgets", "Widget")]),
        ResourceList::new("example.io/v1", &[("widgets", "Widget")]),
    ]);
    let gvr = resolve(&both, &reg, "Widget").await.unwrap();
    assert_eq!(gvr.version, "v1");
}

#[tokio::test]
async fn deployment_falls_back_to_legacy_groups() {
    let reg = Registry::with_defaults();
    let legacy = MemoryDiscovery::new(vec![ResourceList::new("extensions/v1beta1", &[("deployments", "Deployment")])]);
    let gvr = resolve(&legacy, &reg, "Deployment").await.unwrap();
    assert_eq!(gvr.api_version(), "extensions/v1beta1");
}

#[tokio::test]
async fn unserved_or_unregistered_kinds_are_unsupported() {
    let reg = widget_registry();
    let disco = MemoryDiscovery::new(vec![ResourceList::new("apps/v1", &[("deployments", "Deployment")])]);
    assert!(matches!(resolve(&disco, &reg, "Widget").await, Err(Error::UnsupportedKind { .. })));
    assert!(matches!(resolve(&disco, &reg, "Gadget").await, Err(Error::UnsupportedKind { .. })));
}

#[tokio::test]
async fn discovery_failure_surfaces_as_discovery_error() {
    let reg = widget_registry();
    let disco = MemoryDiscovery::new(vec![]);
    disco.fail_with("connection refused");
    assert!(matches!(resolve(&disco, &reg, "Widget").await, Err(Error::Discovery(_))));
}

#[tokio::test]
async fn refresh_fills_cache_and_leaves_unmatched_kinds_out() {
    let reg = Registry::with_defaults();
    let disco = MemoryDiscovery::new(vec![
        ResourceList::new("apps/v1", &[("deployments", "Deployment"), ("statefulsets", "StatefulSet")]),
        ResourceList::new("batch/v1", &[("jobs", "Job")]),
    ]);
    let cache = GvrCache::new();
    let summary = cache.refresh(&disco, &reg).await.unwrap();
    assert_eq!(summary.resolved, 3);
    assert_eq!(summary.unresolved, vec!["CronJob".to_string(), "DaemonSet".to_string()]);
    assert_eq!(cache.get("StatefulSet").unwrap().resource, "statefulsets");
    assert!(cache.get("CronJob").is_none());
    assert_eq!(disco.calls(), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_entries() {
    let reg = Registry::with_defaults();
    let disco = MemoryDiscovery::new(vec![ResourceList::new("apps/v1", &[("deployments", "Deployment")])]);
    let cache = GvrCache::new();
    cache.refresh(&disco, &reg).await.unwrap();
    let before = cache.get("Deployment").unwrap();

    disco.fail_with("apiserver unavailable");
    assert!(matches!(cache.refresh(&disco, &reg).await, Err(Error::Discovery(_))));
    assert_eq!(cache.get("Deployment"), Some(before));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_only_see_whole_entries() {
    let cache = Arc::new(GvrCache::new());
    let a = Gvr::new(&GroupVersion::new("apps", "v1"), "deployments");
    let b = Gvr::new(&GroupVersion::new("extensions", "v1beta1"), "deployments");
    cache.set("Deployment", a.clone());

    let writer = {
        let cache = Arc::clone(&cache);
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move {
            for i in 0..2_000 {
                cache.set("Deployment", if i % 2 == 0 { b.clone() } else { a.clone() });
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let (a, b) = (a.clone(), b.clone());
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                let got = cache.get("Deployment").unwrap();
                assert!(got == a || got == b, "torn entry: {:?}", got);
            }
        }));
    }
    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}
