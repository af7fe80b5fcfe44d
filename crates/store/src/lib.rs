//! Versa store: kind registry, GVR resolver and the process-wide GVR cache.

#![forbid(unsafe_code)]

pub mod cache;
pub mod registry;
pub mod resolve;

pub use cache::{GvrCache, RefreshSummary};
pub use registry::{KindMap, Registry, KIND_MAP_ENV};
pub use resolve::{resolve, CapabilityIndex};
