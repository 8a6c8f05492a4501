//! kubedump correlation store: which observed resources are related, and how.
//!
//! Every interesting resource is kept under its uid together with the [`Matcher`] it owns.
//! Lookups run those matchers against a candidate to discover its owners regardless of
//! arrival order. Discovered relationships are recorded as owner → dependent edges; the
//! symlinks on disk are only a projection of these edges.

#![forbid(unsafe_code)]

use kubedump_core::{Error, Resource, Uid};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

mod matcher;

pub use matcher::{LabelMatcher, Matcher, VolumeMatcher};

#[derive(Debug, Clone)]
pub struct Entry {
    pub matcher: Option<Matcher>,
    pub resource: Resource,
}

#[derive(Default)]
struct Inner {
    entries: FxHashMap<Uid, Entry>,
    /// owner uid -> dependent uids
    edges: FxHashMap<Uid, FxHashSet<Uid>>,
}

/// UID-keyed index guarded by a single read/write lock. Matchers are pure, so no lock is
/// ever held across anything slower than a map walk.
#[derive(Default)]
pub struct CorrelationStore {
    inner: RwLock<Inner>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by uid; the latest snapshot and matcher replace any previous entry.
    pub fn add_resource(&self, resource: Resource, matcher: Option<Matcher>) {
        let mut inner = self.inner.write();
        inner.entries.insert(resource.uid, Entry { matcher, resource });
        metrics::gauge!("correlation_entries", inner.entries.len() as f64);
    }

    /// Stored resources whose matcher accepts `resource`: its owners. Never returns the
    /// resource itself nor anything from another namespace.
    pub fn get_resources(&self, resource: &Resource) -> Vec<Resource> {
        let inner = self.inner.read();
        inner
            .entries
            .values()
            .filter(|e| e.resource.uid != resource.uid && e.resource.namespace == resource.namespace)
            .filter(|e| e.matcher.as_ref().is_some_and(|m| m.matches(resource)))
            .map(|e| e.resource.clone())
            .collect()
    }

    /// Stored resources in `owner`'s namespace accepted by `matcher`: its known dependents.
    pub fn matched_by(&self, owner: &Resource, matcher: &Matcher) -> Vec<Resource> {
        let inner = self.inner.read();
        inner
            .entries
            .values()
            .filter(|e| e.resource.uid != owner.uid && e.resource.namespace == owner.namespace)
            .filter(|e| matcher.matches(&e.resource))
            .map(|e| e.resource.clone())
            .collect()
    }

    /// Drop the entry and every edge touching it.
    pub fn remove_resource(&self, resource: &Resource) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if inner.entries.remove(&resource.uid).is_none() {
            return Err(Error::NotFound(resource.key()));
        }
        inner.edges.remove(&resource.uid);
        inner.edges.retain(|_, deps| {
            deps.remove(&resource.uid);
            !deps.is_empty()
        });
        metrics::gauge!("correlation_entries", inner.entries.len() as f64);
        debug!(key = %resource.key(), "correlation entry removed");
        Ok(())
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.inner.read().entries.contains_key(uid)
    }

    pub fn get(&self, uid: &Uid) -> Option<Entry> {
        self.inner.read().entries.get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `owner -> dependent`; returns true when the edge is new.
    pub fn add_edge(&self, owner: &Uid, dependent: &Uid) -> bool {
        if owner == dependent {
            return false;
        }
        self.inner.write().edges.entry(*owner).or_default().insert(*dependent)
    }

    pub fn has_edge(&self, owner: &Uid, dependent: &Uid) -> bool {
        self.inner.read().edges.get(owner).is_some_and(|d| d.contains(dependent))
    }

    pub fn dependents(&self, owner: &Uid) -> Vec<Uid> {
        self.inner.read().edges.get(owner).map(|d| d.iter().copied().collect()).unwrap_or_default()
    }

    pub fn owners(&self, dependent: &Uid) -> Vec<Uid> {
        let inner = self.inner.read();
        inner.edges.iter().filter(|(_, d)| d.contains(dependent)).map(|(o, _)| *o).collect()
    }

    /// Forget every entry and edge.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.edges.clear();
        metrics::gauge!("correlation_entries", 0.0);
    }
}
