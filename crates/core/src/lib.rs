//! kubedump core types: resource descriptors, watch deltas and the cluster boundary.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod cluster;
mod resource;

pub use cluster::{Cluster, LogSource};
pub use resource::{Payload, Resource, VolumeRefs};

/// Raw bytes of `metadata.uid`.
pub type Uid = [u8; 16];

/// Which notification produced a [`Delta`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

/// The closed set of resource kinds kubedump understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Job,
    ReplicaSet,
    Deployment,
    Service,
    ConfigMap,
    Secret,
    Event,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Pod,
        ResourceKind::Job,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::Event,
    ];

    /// Kinds with a live watch stream while the controller runs. Secrets are only
    /// fetched on demand when a Pod mounts them.
    pub const WATCHED: [ResourceKind; 7] = [
        ResourceKind::Pod,
        ResourceKind::Service,
        ResourceKind::Job,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::Event,
        ResourceKind::ConfigMap,
    ];

    /// Name used for output directories and in `kind` fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Job => "Job",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::Event => "Event",
        }
    }

    /// Keyword form used by the filter language (`pod`, `job`, ...). Events have none.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "pod" => Some(ResourceKind::Pod),
            "job" => Some(ResourceKind::Job),
            "replicaset" => Some(ResourceKind::ReplicaSet),
            "deployment" => Some(ResourceKind::Deployment),
            "service" => Some(ResourceKind::Service),
            "configmap" => Some(ResourceKind::ConfigMap),
            "secret" => Some(ResourceKind::Secret),
            _ => None,
        }
    }

    /// Kinds whose resources are registered in the correlation store.
    pub fn is_correlatable(&self) -> bool {
        !matches!(self, ResourceKind::Event)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// A single watch notification, normalized at the cluster boundary.
#[derive(Debug, Clone)]
pub struct Delta {
    pub kind: EventKind,
    pub resource: Resource,
}

impl Delta {
    pub fn new(kind: EventKind, resource: Resource) -> Self {
        Self { kind, resource }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported payload: {0}")]
    UnsupportedPayload(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid uid {0:?}")]
    InvalidUid(String),
    #[error("unknown kind: {0}")]
    UnknownKind(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

pub mod prelude {
    pub use super::{Cluster, Delta, Error, EventKind, LogSource, Payload, Resource, ResourceKind, Uid};
}
