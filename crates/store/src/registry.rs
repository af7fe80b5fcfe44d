//! Kind registry: logical kind → ordered candidate group-versions (most preferred first).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::{info, warn};
use versa_core::{text, Error, GroupVersion, Result};

/// Env var naming a kind-mapping document merged into the global registry at first use.
pub const KIND_MAP_ENV: &str = "VERSA_KIND_MAP";

pub type KindMap = FxHashMap<String, Vec<GroupVersion>>;

/// Process-wide mutable mapping. Readers get a consistent snapshot; writers swap a new map in.
pub struct Registry {
    kinds: ArcSwap<KindMap>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(|| {
    let reg = Registry::with_defaults();
    if let Err(e) = reg.load_env_overrides() {
        warn!(error = %e, "ignoring kind map from {}", KIND_MAP_ENV);
    }
    reg
});

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self { kinds: ArcSwap::from_pointee(KindMap::default()) }
    }

    /// Registry preloaded with the built-in workload kinds.
    pub fn with_defaults() -> Self {
        let reg = Self::empty();
        reg.register(
            "Deployment",
            vec![
                GroupVersion::new("apps", "v1"),
                GroupVersion::new("apps", "v1beta2"),
                GroupVersion::new("extensions", "v1beta1"),
            ],
        );
        reg.register("StatefulSet", vec![GroupVersion::new("apps", "v1")]);
        reg.register("DaemonSet", vec![GroupVersion::new("apps", "v1")]);
        reg.register("Job", vec![GroupVersion::new("batch", "v1")]);
        reg.register("CronJob", vec![GroupVersion::new("batch", "v1")]);
        reg
    }

    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Replace the candidate list for `kind`. Takes effect for the next resolution.
    pub fn register(&self, kind: impl Into<String>, candidates: Vec<GroupVersion>) {
        let kind = kind.into();
        self.kinds.rcu(|cur| {
            let mut next = KindMap::clone(cur);
            next.insert(kind.clone(), candidates.clone());
            next
        });
    }

    pub fn candidates(&self, kind: &str) -> Option<Vec<GroupVersion>> {
        self.kinds.load().get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut out: Vec<String> = self.kinds.load().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn snapshot(&self) -> Arc<KindMap> {
        self.kinds.load_full()
    }

    /// Load a YAML mapping `Kind: [{group, version}, ...]`.
    ///
    /// Well-formed entries are registered even when others fail; failed entries leave any
    /// previous registration for that kind in place and are reported in the returned error.
    pub fn load_from_document(&self, bytes: &[u8]) -> Result<usize> {
        let raw: BTreeMap<String, serde_yaml::Value> = text::from_yaml(bytes)?;
        let mut loaded = 0usize;
        let mut failed: Vec<String> = Vec::new();
        for (kind, entry) in raw {
            match parse_candidates(entry) {
                Ok(candidates) => {
                    self.register(kind, candidates);
                    loaded += 1;
                }
                Err(reason) => failed.push(format!("{}: {}", kind, reason)),
            }
        }
        if !failed.is_empty() {
            return Err(Error::Parse(format!("invalid kind mapping entries: {}", failed.join("; "))));
        }
        info!(kinds = loaded, "kind mapping loaded");
        Ok(loaded)
    }

    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        self.load_from_document(&bytes)
    }

    /// Merge the document named by `VERSA_KIND_MAP`, if set. Returns the number of kinds loaded.
    pub fn load_env_overrides(&self) -> Result<usize> {
        match std::env::var_os(KIND_MAP_ENV) {
            Some(path) => self.load_from_file(path),
            None => Ok(0),
        }
    }
}

fn parse_candidates(entry: serde_yaml::Value) -> std::result::Result<Vec<GroupVersion>, String> {
    let candidates: Vec<GroupVersion> = serde_yaml::from_value(entry).map_err(|e| e.to_string())?;
    if candidates.iter().any(|gv| gv.version.is_empty()) {
        return Err("empty version".into());
    }
    Ok(candidates)
}
