use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::api::events::v1::Event as KubeEvent;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{Error, ResourceKind, Uid};

/// Typed payload of a cluster object, one variant per supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Pod(Pod),
    Job(Job),
    ReplicaSet(ReplicaSet),
    Deployment(Deployment),
    Service(Service),
    ConfigMap(ConfigMap),
    Secret(Secret),
    Event(KubeEvent),
}

macro_rules! payload_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(o: $ty) -> Self { Payload::$variant(o) }
            }
        )*
    };
}

payload_from!(
    Pod => Pod,
    Job => Job,
    ReplicaSet => ReplicaSet,
    Deployment => Deployment,
    Service => Service,
    ConfigMap => ConfigMap,
    Secret => Secret,
    Event => KubeEvent,
);

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

impl Payload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Payload::Pod(_) => ResourceKind::Pod,
            Payload::Job(_) => ResourceKind::Job,
            Payload::ReplicaSet(_) => ResourceKind::ReplicaSet,
            Payload::Deployment(_) => ResourceKind::Deployment,
            Payload::Service(_) => ResourceKind::Service,
            Payload::ConfigMap(_) => ResourceKind::ConfigMap,
            Payload::Secret(_) => ResourceKind::Secret,
            Payload::Event(_) => ResourceKind::Event,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Payload::Pod(o) => &o.metadata,
            Payload::Job(o) => &o.metadata,
            Payload::ReplicaSet(o) => &o.metadata,
            Payload::Deployment(o) => &o.metadata,
            Payload::Service(o) => &o.metadata,
            Payload::ConfigMap(o) => &o.metadata,
            Payload::Secret(o) => &o.metadata,
            Payload::Event(o) => &o.metadata,
        }
    }

    /// JSON form with `metadata.managedFields` removed.
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        let res = match self {
            Payload::Pod(o) => serde_json::to_value(o),
            Payload::Job(o) => serde_json::to_value(o),
            Payload::ReplicaSet(o) => serde_json::to_value(o),
            Payload::Deployment(o) => serde_json::to_value(o),
            Payload::Service(o) => serde_json::to_value(o),
            Payload::ConfigMap(o) => serde_json::to_value(o),
            Payload::Secret(o) => serde_json::to_value(o),
            Payload::Event(o) => serde_json::to_value(o),
        };
        let mut v = res.map_err(|e| Error::Serialization(e.to_string()))?;
        strip_managed_fields(&mut v);
        Ok(v)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        let v = self.to_value()?;
        serde_yaml::to_string(&v).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Rebuild a payload from its JSON form, dispatching on the top-level `kind` field.
    pub fn from_value(v: serde_json::Value) -> Result<Self, Error> {
        let kind = v
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or(Error::MissingField("kind"))?
            .parse::<ResourceKind>()?;
        let de = |e: serde_json::Error| Error::Serialization(e.to_string());
        Ok(match kind {
            ResourceKind::Pod => Payload::Pod(serde_json::from_value(v).map_err(de)?),
            ResourceKind::Job => Payload::Job(serde_json::from_value(v).map_err(de)?),
            ResourceKind::ReplicaSet => Payload::ReplicaSet(serde_json::from_value(v).map_err(de)?),
            ResourceKind::Deployment => Payload::Deployment(serde_json::from_value(v).map_err(de)?),
            ResourceKind::Service => Payload::Service(serde_json::from_value(v).map_err(de)?),
            ResourceKind::ConfigMap => Payload::ConfigMap(serde_json::from_value(v).map_err(de)?),
            ResourceKind::Secret => Payload::Secret(serde_json::from_value(v).map_err(de)?),
            ResourceKind::Event => Payload::Event(serde_json::from_value(v).map_err(de)?),
        })
    }

    pub fn from_yaml(s: &str) -> Result<Self, Error> {
        let v: serde_json::Value = serde_yaml::from_str(s).map_err(|e| Error::Serialization(e.to_string()))?;
        Self::from_value(v)
    }
}

/// ConfigMap and Secret names a Pod mounts, including projected sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRefs {
    pub config_maps: SmallVec<[String; 4]>,
    pub secrets: SmallVec<[String; 4]>,
}

impl VolumeRefs {
    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty() && self.secrets.is_empty()
    }

    fn push(list: &mut SmallVec<[String; 4]>, name: &str) {
        if !name.is_empty() && !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }
}

/// Snapshot of one cluster object as captured from a watch notification.
///
/// Identity is the uid; the remaining fields are lifted out of the payload once, at
/// construction, so consumers never re-inspect the raw object for them.
#[derive(Debug, Clone)]
pub struct Resource {
    pub uid: Uid,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub payload: Arc<Payload>,
}

impl Resource {
    pub fn from_payload(payload: impl Into<Payload>) -> Result<Self, Error> {
        let payload = payload.into();
        let meta = payload.metadata();
        let uid_str = meta.uid.as_deref().ok_or(Error::MissingField("metadata.uid"))?;
        let uid = *Uuid::parse_str(uid_str).map_err(|_| Error::InvalidUid(uid_str.to_string()))?.as_bytes();
        let name = meta.name.clone().ok_or(Error::MissingField("metadata.name"))?;
        Ok(Self {
            uid,
            kind: payload.kind(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            name,
            labels: meta.labels.clone().unwrap_or_default(),
            payload: Arc::new(payload),
        })
    }

    /// `namespace/Kind/name`, for logs.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }

    /// Container names of a Pod, init containers first. Empty for other kinds.
    pub fn containers(&self) -> SmallVec<[String; 4]> {
        let mut out = SmallVec::new();
        if let Payload::Pod(pod) = self.payload.as_ref() {
            if let Some(spec) = &pod.spec {
                if let Some(init) = &spec.init_containers {
                    out.extend(init.iter().map(|c| c.name.clone()));
                }
                out.extend(spec.containers.iter().map(|c| c.name.clone()));
            }
        }
        out
    }

    /// ConfigMaps and Secrets referenced by a Pod's volumes. Empty for other kinds.
    pub fn volume_refs(&self) -> VolumeRefs {
        let mut refs = VolumeRefs::default();
        let Payload::Pod(pod) = self.payload.as_ref() else { return refs; };
        let Some(volumes) = pod.spec.as_ref().and_then(|s| s.volumes.as_ref()) else { return refs; };
        for vol in volumes {
            if let Some(cm) = &vol.config_map {
                VolumeRefs::push(&mut refs.config_maps, &cm.name);
            }
            if let Some(name) = vol.secret.as_ref().and_then(|s| s.secret_name.as_deref()) {
                VolumeRefs::push(&mut refs.secrets, name);
            }
            let sources = vol.projected.as_ref().and_then(|p| p.sources.as_ref());
            for src in sources.into_iter().flatten() {
                if let Some(cm) = &src.config_map {
                    VolumeRefs::push(&mut refs.config_maps, &cm.name);
                }
                if let Some(s) = &src.secret {
                    VolumeRefs::push(&mut refs.secrets, &s.name);
                }
            }
        }
        refs
    }

    /// Pod-selecting labels of a Service, Job, ReplicaSet or Deployment.
    ///
    /// Prefers the explicit selector and falls back to the pod template labels.
    pub fn selector(&self) -> Option<BTreeMap<String, String>> {
        fn match_labels(sel: &LabelSelector) -> Option<BTreeMap<String, String>> {
            sel.match_labels.clone().filter(|m| !m.is_empty())
        }
        match self.payload.as_ref() {
            Payload::Service(svc) => svc.spec.as_ref()?.selector.clone(),
            Payload::Job(job) => {
                let spec = job.spec.as_ref()?;
                spec.selector
                    .as_ref()
                    .and_then(match_labels)
                    .or_else(|| spec.template.metadata.as_ref()?.labels.clone())
            }
            Payload::ReplicaSet(rs) => {
                let spec = rs.spec.as_ref()?;
                match_labels(&spec.selector)
                    .or_else(|| spec.template.as_ref()?.metadata.as_ref()?.labels.clone())
            }
            Payload::Deployment(d) => {
                let spec = d.spec.as_ref()?;
                match_labels(&spec.selector).or_else(|| spec.template.metadata.as_ref()?.labels.clone())
            }
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&KubeEvent> {
        match self.payload.as_ref() {
            Payload::Event(ev) => Some(ev),
            _ => None,
        }
    }

    /// The object an Event is about: kind, namespace (defaulting to the Event's own) and name.
    pub fn regarding(&self) -> Option<(ResourceKind, String, String)> {
        let r = self.as_event()?.regarding.as_ref()?;
        let kind = r.kind.as_deref()?.parse::<ResourceKind>().ok()?;
        let name = r.name.clone()?;
        let namespace = r.namespace.clone().unwrap_or_else(|| self.namespace.clone());
        Some((kind, namespace, name))
    }

    /// When an Event happened: `eventTime`, then `deprecatedLastTimestamp`, then creation time.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        let ev = self.as_event()?;
        ev.event_time
            .as_ref()
            .map(|t| t.0)
            .or_else(|| ev.deprecated_last_timestamp.as_ref().map(|t| t.0))
            .or_else(|| ev.metadata.creation_timestamp.as_ref().map(|t| t.0))
    }
}
