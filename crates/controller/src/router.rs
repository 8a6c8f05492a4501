use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use kubedump_core::{Cluster, Delta, EventKind, Resource, ResourceKind};
use kubedump_filter::Expression;
use kubedump_logs::{LogKey, LogStreams};
use kubedump_persist::{append_event, create_link, event_line, write_description, ResourcePath};
use kubedump_store::{CorrelationStore, Matcher};
use metrics::counter;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::{Job, WorkQueue};
use crate::ControllerOptions;

/// State that outlives a single run of the controller.
pub(crate) struct Shared {
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) opts: ControllerOptions,
    pub(crate) store: CorrelationStore,
    pub(crate) logs: LogStreams,
    pub(crate) filter: ArcSwap<Expression>,
}

/// Turns watch deltas into queued jobs. Only in-memory work happens inline.
pub(crate) struct Router {
    pub(crate) shared: Arc<Shared>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) token: CancellationToken,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl Router {
    pub(crate) fn new(shared: Arc<Shared>, queue: Arc<WorkQueue>, token: CancellationToken) -> Self {
        Self { shared, queue, token, started_at: RwLock::new(None) }
    }

    pub(crate) fn mark_started(&self, at: DateTime<Utc>) {
        *self.started_at.write() = Some(at);
    }

    fn base(&self) -> PathBuf {
        self.shared.opts.base_dir.clone()
    }

    pub(crate) fn handle(&self, delta: Delta) {
        let Delta { kind: op, resource: r } = delta;
        counter!("events_total", 1u64, "kind" => r.kind.as_str(), "op" => op.as_str());
        if r.kind == ResourceKind::Event {
            self.handle_event(op, r);
            return;
        }

        let store = &self.shared.store;
        let owners = store.get_resources(&r);
        let tracked = store.contains(&r.uid);
        let interested = !owners.is_empty() || tracked || self.shared.filter.load().matches(&r);
        if !interested {
            counter!("events_filtered_total", 1u64, "kind" => r.kind.as_str());
            return;
        }
        debug!(op = op.as_str(), key = %r.key(), owners = owners.len(), "routing");

        if op == EventKind::Delete {
            if let Err(e) = store.remove_resource(&r) {
                debug!(key = %r.key(), error = %e, "delete for untracked resource");
            }
            if r.kind == ResourceKind::Pod {
                for c in r.containers() {
                    self.stop_log_job(&r, &c);
                }
            }
            self.describe_job(&r);
            return;
        }

        for owner in &owners {
            if store.add_edge(&owner.uid, &r.uid) {
                self.link_job(owner, &r);
            }
        }

        if r.kind.is_correlatable() {
            let matcher = Matcher::for_resource(&r);
            store.add_resource(r.clone(), matcher.clone());
            if let Some(m) = matcher {
                self.claim_dependents(&r, &m);
            }
        }

        if r.kind == ResourceKind::Pod && (op == EventKind::Add || !tracked) {
            if !r.volume_refs().is_empty() {
                self.volumes_job(&r);
            }
            for c in r.containers() {
                self.start_log_job(&r, &c);
            }
        }

        self.describe_job(&r);
    }

    /// Link an owner to every matching resource already known, so arrival order does not matter.
    /// Candidates nobody has routed yet are routed now.
    fn claim_dependents(&self, owner: &Resource, matcher: &Matcher) {
        let store = &self.shared.store;
        let mut candidates = store.matched_by(owner, matcher);
        for kind in matcher.target_kinds() {
            candidates.extend(
                self.shared.cluster.cached_list(*kind, &owner.namespace).into_iter().filter(|c| matcher.matches(c)),
            );
        }
        for c in candidates {
            if c.uid == owner.uid {
                continue;
            }
            if store.add_edge(&owner.uid, &c.uid) {
                self.link_job(owner, &c);
            }
            if !store.contains(&c.uid) {
                self.handle(Delta::new(EventKind::Add, c));
            }
        }
    }

    fn handle_event(&self, op: EventKind, ev: Resource) {
        if op != EventKind::Add {
            return;
        }
        let Some(started) = *self.started_at.read() else { return };
        let at = ev.event_time().unwrap_or_else(Utc::now);
        if at < started {
            debug!(event = %ev.key(), "event predates start");
            return;
        }
        let Some((kind, ns, name)) = ev.regarding() else {
            debug!(event = %ev.key(), "event without a supported regarding object");
            return;
        };
        let Some(target) = self.shared.cluster.cached(kind, &ns, &name) else {
            debug!(event = %ev.key(), regarding = %format!("{}/{}/{}", ns, kind, name), "regarding object not cached");
            return;
        };
        if !self.shared.filter.load().matches(&target) {
            counter!("events_filtered_total", 1u64, "kind" => ResourceKind::Event.as_str());
            return;
        }
        let Some(line) = event_line(&ev, at) else { return };
        let path = ResourcePath::of(&self.shared.opts.base_dir, &target);
        let name = format!("event {}", target.key());
        self.queue.add(Job::new(name, move || {
            let path = path.clone();
            let line = line.clone();
            blocking(move || append_event(&path, &line))
        }));
    }

    fn describe_job(&self, r: &Resource) {
        let base = self.base();
        let r = r.clone();
        self.queue.add(Job::new(format!("describe {}", r.key()), move || {
            let base = base.clone();
            let r = r.clone();
            blocking(move || write_description(&base, &r))
        }));
    }

    fn link_job(&self, owner: &Resource, dependent: &Resource) {
        let owner = ResourcePath::of(&self.shared.opts.base_dir, owner);
        let dep = ResourcePath::of(&self.shared.opts.base_dir, dependent);
        let name = format!("link {}/{}/{} -> {}/{}", owner.namespace(), owner.kind(), owner.name(), dep.kind(), dep.name());
        self.queue.add(Job::new(name, move || {
            let owner = owner.clone();
            let dep = dep.clone();
            blocking(move || create_link(&owner, &dep).map(|_| ()))
        }));
    }

    /// Fetch every ConfigMap/Secret a Pod mounts, describe it and link it under the Pod.
    fn volumes_job(&self, pod: &Resource) {
        let shared = Arc::clone(&self.shared);
        let pod = pod.clone();
        self.queue.add(Job::new(format!("volumes {}", pod.key()), move || {
            let shared = Arc::clone(&shared);
            let pod = pod.clone();
            async move { link_volumes(&shared, &pod).await }
        }));
    }

    fn start_log_job(&self, pod: &Resource, container: &str) {
        let shared = Arc::clone(&self.shared);
        let key = LogKey::new(pod.namespace.clone(), pod.name.clone(), container);
        let path = ResourcePath::of(&shared.opts.base_dir, pod).log(container);
        let uid = pod.uid;
        self.queue.add(Job::new(format!("log start {}", key), move || {
            let shared = Arc::clone(&shared);
            let key = key.clone();
            let path = path.clone();
            async move {
                if !shared.store.contains(&uid) {
                    debug!(stream = %key, "pod gone before its log stream started");
                    return Ok(());
                }
                // The pod may have been deleted while the file was opening.
                if shared.logs.start(key.clone(), path).await? && !shared.store.contains(&uid) {
                    shared.logs.stop(&key).await?;
                }
                Ok(())
            }
        }));
    }

    fn stop_log_job(&self, pod: &Resource, container: &str) {
        let shared = Arc::clone(&self.shared);
        let key = LogKey::new(pod.namespace.clone(), pod.name.clone(), container);
        self.queue.add(Job::new(format!("log stop {}", key), move || {
            let shared = Arc::clone(&shared);
            let key = key.clone();
            async move {
                // Keep whatever was logged since the last pass.
                if let Err(e) = shared.logs.sync_one(&key, shared.cluster.as_ref(), shared.opts.log_sync_timeout).await {
                    debug!(stream = %key, error = %e, "final log sync failed");
                }
                shared.logs.stop(&key).await.map(|_| ())
            }
        }));
    }
}

async fn link_volumes(shared: &Shared, pod: &Resource) -> Result<()> {
    let refs = pod.volume_refs();
    let wanted = refs
        .config_maps
        .iter()
        .map(|n| (ResourceKind::ConfigMap, n))
        .chain(refs.secrets.iter().map(|n| (ResourceKind::Secret, n)));
    let owner = ResourcePath::of(&shared.opts.base_dir, pod);
    for (kind, name) in wanted {
        let found = shared
            .cluster
            .get(kind, &pod.namespace, name)
            .await
            .with_context(|| format!("getting {} {}/{} for {}", kind, pod.namespace, name, pod.key()))?;
        let Some(vol) = found else {
            debug!(pod = %pod.key(), kind = %kind, name = %name, "mounted object not found");
            continue;
        };
        shared.store.add_resource(vol.clone(), None);
        shared.store.add_edge(&pod.uid, &vol.uid);
        let base = shared.opts.base_dir.clone();
        let dep = ResourcePath::of(&base, &vol);
        let owner = owner.clone();
        blocking(move || {
            write_description(&base, &vol)?;
            create_link(&owner, &dep).map(|_| ())
        })
        .await?;
    }
    Ok(())
}

/// Run filesystem work off the async workers.
async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "blocking task failed");
            Err(e).context("blocking task")
        }
    }
}
