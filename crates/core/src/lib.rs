//! Versa core types: group-versions, workload entities and the shared error taxonomy.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod text;

/// Generic (schema-less) object mapping as exchanged with the control plane.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An API group paired with one of its versions. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersion {
    #[serde(default)]
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into() }
    }

    /// Parse `group/version` or a bare `version` (core group).
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<_> = s.split('/').collect();
        match parts.as_slice() {
            [version] if !version.is_empty() => Ok(Self::new("", *version)),
            [group, version] if !version.is_empty() => Ok(Self::new(*group, *version)),
            _ => Err(Error::Parse(format!("invalid group version: {:?}", s))),
        }
    }

    /// The `apiVersion` header value: `v1` for the core group, `group/version` otherwise.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// A concrete, queryable resource type on the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(gv: &GroupVersion, resource: impl Into<String>) -> Self {
        Self { group: gv.group.clone(), version: gv.version.clone(), resource: resource.into() }
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(self.group.clone(), self.version.clone())
    }

    pub fn api_version(&self) -> String {
        self.group_version().api_version()
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// Change-feed event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Spec shape family of a kind. Each family owns its encode/decode strategy (see [`codec`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindFamily {
    /// Deployment, StatefulSet, DaemonSet: replicas + selector + pod template.
    ReplicaController,
    /// Job: pod template + retry budget.
    Job,
    /// CronJob: schedule + job template.
    CronJob,
    /// Kinds registered at runtime without a dedicated shape; spec comes from `spec_patch` only.
    Generic,
}

impl KindFamily {
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "Deployment" | "StatefulSet" | "DaemonSet" => KindFamily::ReplicaController,
            "Job" => KindFamily::Job,
            "CronJob" => KindFamily::CronJob,
            _ => KindFamily::Generic,
        }
    }

    pub fn has_replicas(self) -> bool {
        matches!(self, KindFamily::ReplicaController)
    }
}

/// Kind-agnostic description of a workload resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntity {
    pub name: String,
    /// Object labels; replica controllers also use them as selector and template labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Only meaningful for replica-controller kinds.
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub image: String,
    pub kind: String,
    /// API versions observed when decoding.
    #[serde(default)]
    pub api_versions: Vec<String>,
    /// Raw spec as returned by the plane.
    #[serde(default)]
    pub spec: JsonMap,
    #[serde(default)]
    pub status: JsonMap,
    /// annotations, ownerReferences and creationTimestamp as returned by the plane.
    #[serde(default)]
    pub metadata: JsonMap,
    /// Merged into the generated spec before it is sent upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_patch: Option<JsonMap>,
}

impl WorkloadEntity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), name: name.into(), ..Default::default() }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_spec_patch(mut self, patch: JsonMap) -> Self {
        self.spec_patch = Some(patch);
        self
    }

    pub fn family(&self) -> KindFamily {
        KindFamily::for_kind(&self.kind)
    }
}

/// A single spec field rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub value: String,
    pub detail: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Invalid value: {:?}: {}", self.field, self.value, self.detail)
    }
}

/// Aggregate of every violation found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [one] => write!(f, "{}", one),
            many => {
                f.write_str("[")?;
                for (i, e) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Errors surfaced by every versa crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no supported {kind} version found")]
    UnsupportedKind { kind: String },
    #[error("discovery: {0}")]
    Discovery(String),
    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },
    #[error("conversion: {0}")]
    Conversion(String),
    #[error("schema fetch: {0}")]
    SchemaFetch(String),
    #[error("schema not found: {0}")]
    SchemaNotFound(String),
    #[error("validation: {0}")]
    Validation(FieldErrors),
    #[error("parse: {0}")]
    Parse(String),
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub mod prelude {
    pub use super::{
        Error, EventType, FieldError, FieldErrors, GroupVersion, Gvr, JsonMap, KindFamily, Result, WorkloadEntity,
    };
}
