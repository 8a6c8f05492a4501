//! kubedump kubehub: the [`Cluster`] boundary implemented over kube-rs.
//!
//! One typed list+watch per kind, each feeding a local cache keyed by namespace/name.
//! Raw objects become [`Resource`]s here, once, before anything downstream sees them.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{AsyncReadExt, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::api::events::v1::Event as KubeEvent;
use kube::api::{Api, LogParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use kubedump_core::{Cluster, Delta, EventKind, LogSource, Payload, Resource, ResourceKind};
use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod cache;

use cache::{object_key, KindCache, ObjectKey};

/// Object types kubedump can watch and fetch.
pub trait Watched:
    kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + Into<Payload>
    + 'static
{
}

impl<K> Watched for K where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + Into<Payload>
        + 'static
{
}

pub struct KubeCluster {
    client: Client,
    caches: Arc<FxHashMap<ResourceKind, Arc<KindCache>>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        let caches = ResourceKind::ALL.into_iter().map(|k| (k, Arc::new(KindCache::default()))).collect();
        Self { client, caches: Arc::new(caches) }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::new(client))
    }

    fn cache(&self, kind: ResourceKind) -> Arc<KindCache> {
        match self.caches.get(&kind) {
            Some(c) => c.clone(),
            None => Arc::new(KindCache::default()),
        }
    }

    fn spawn_watch<K: Watched>(&self, kind: ResourceKind, tx: mpsc::UnboundedSender<Delta>) {
        let api: Api<K> = Api::all(self.client.clone());
        let cache = self.cache(kind);
        let generation = cache.reset();
        tokio::spawn(run_watcher(api, kind, cache, generation, tx));
    }

    async fn get_typed<K: Watched>(&self, namespace: &str, name: &str) -> Result<Option<Resource>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let obj = api.get_opt(name).await.with_context(|| format!("getting {}/{}", namespace, name))?;
        obj.map(|o| Resource::from_payload(o).map_err(anyhow::Error::from)).transpose()
    }
}

/// Drive one watcher until the receiving side goes away.
///
/// Applied objects are classified against the cache; objects that disappear across a
/// relist are reported as deletes. The cache is marked synced at the first `InitDone`.
/// A later watch of the same kind takes the cache over and this one exits.
async fn run_watcher<K: Watched>(
    api: Api<K>,
    kind: ResourceKind,
    cache: Arc<KindCache>,
    generation: u64,
    tx: mpsc::UnboundedSender<Delta>,
) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut relist: Option<FxHashSet<ObjectKey>> = None;
    info!(kind = %kind, "watcher started");
    loop {
        let next = tokio::select! {
            _ = tx.closed() => break,
            n = stream.next() => n,
        };
        let Some(ev) = next else { break };
        if cache.generation() != generation {
            debug!(kind = %kind, "superseded by a newer watch");
            break;
        }
        let ev = match ev {
            Ok(ev) => ev,
            Err(e) => {
                counter!("watch_errors_total", 1u64, "kind" => kind.as_str());
                warn!(kind = %kind, error = %e, "watch error");
                continue;
            }
        };
        let delta = match ev {
            Event::Init => {
                debug!(kind = %kind, "relist started");
                relist = Some(FxHashSet::default());
                None
            }
            Event::InitApply(obj) | Event::Apply(obj) => match Resource::from_payload(obj) {
                Ok(r) => {
                    if let Some(seen) = relist.as_mut() {
                        seen.insert(object_key(&r));
                    }
                    let ek = cache.upsert(r.clone());
                    Some(Delta::new(ek, r))
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "dropping unconvertible object");
                    None
                }
            },
            Event::Delete(obj) => match Resource::from_payload(obj) {
                Ok(r) => {
                    cache.remove(&object_key(&r));
                    Some(Delta::new(EventKind::Delete, r))
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "dropping unconvertible object");
                    None
                }
            },
            Event::InitDone => {
                if let Some(seen) = relist.take() {
                    for stale in cache.retain_seen(&seen) {
                        if tx.send(Delta::new(EventKind::Delete, stale)).is_err() {
                            return;
                        }
                    }
                }
                if !cache.is_synced() {
                    info!(kind = %kind, objects = cache.len(), "cache synced");
                }
                cache.mark_synced();
                None
            }
        };
        if let Some(d) = delta {
            if tx.send(d).is_err() {
                break;
            }
        }
    }
    info!(kind = %kind, "watcher stopped");
}

#[async_trait::async_trait]
impl LogSource for KubeCluster {
    async fn fetch_logs(&self, namespace: &str, pod: &str, container: &str, since: Option<DateTime<Utc>>) -> Result<Bytes> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams { container: Some(container.to_string()), follow: false, since_time: since, ..LogParams::default() };
        let reader = api
            .log_stream(pod, &lp)
            .await
            .with_context(|| format!("opening logs for {}/{}/{}", namespace, pod, container))?;
        futures::pin_mut!(reader);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.with_context(|| format!("reading logs for {}/{}/{}", namespace, pod, container))?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    fn watch(&self, kind: ResourceKind) -> BoxStream<'static, Delta> {
        let (tx, rx) = mpsc::unbounded_channel();
        match kind {
            ResourceKind::Pod => self.spawn_watch::<Pod>(kind, tx),
            ResourceKind::Job => self.spawn_watch::<Job>(kind, tx),
            ResourceKind::ReplicaSet => self.spawn_watch::<ReplicaSet>(kind, tx),
            ResourceKind::Deployment => self.spawn_watch::<Deployment>(kind, tx),
            ResourceKind::Service => self.spawn_watch::<Service>(kind, tx),
            ResourceKind::ConfigMap => self.spawn_watch::<ConfigMap>(kind, tx),
            ResourceKind::Secret => self.spawn_watch::<Secret>(kind, tx),
            ResourceKind::Event => self.spawn_watch::<KubeEvent>(kind, tx),
        }
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|d| (d, rx)) }).boxed()
    }

    async fn wait_synced(&self, kinds: &[ResourceKind]) -> Result<()> {
        for kind in kinds {
            self.cache(*kind).wait_synced().await;
        }
        Ok(())
    }

    fn cached(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Resource> {
        self.cache(kind).get(namespace, name)
    }

    fn cached_list(&self, kind: ResourceKind, namespace: &str) -> Vec<Resource> {
        self.cache(kind).list(namespace)
    }

    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Resource>> {
        match kind {
            ResourceKind::Pod => self.get_typed::<Pod>(namespace, name).await,
            ResourceKind::Job => self.get_typed::<Job>(namespace, name).await,
            ResourceKind::ReplicaSet => self.get_typed::<ReplicaSet>(namespace, name).await,
            ResourceKind::Deployment => self.get_typed::<Deployment>(namespace, name).await,
            ResourceKind::Service => self.get_typed::<Service>(namespace, name).await,
            ResourceKind::ConfigMap => self.get_typed::<ConfigMap>(namespace, name).await,
            ResourceKind::Secret => self.get_typed::<Secret>(namespace, name).await,
            ResourceKind::Event => self.get_typed::<KubeEvent>(namespace, name).await,
        }
    }
}
