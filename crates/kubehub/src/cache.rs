use std::sync::atomic::{AtomicU64, Ordering};

use kubedump_core::{EventKind, Resource};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;

pub(crate) type ObjectKey = (String, String);

pub(crate) fn object_key(r: &Resource) -> ObjectKey {
    (r.namespace.clone(), r.name.clone())
}

/// Local view of one kind, fed by its watcher.
pub(crate) struct KindCache {
    objects: RwLock<FxHashMap<ObjectKey, Resource>>,
    synced: watch::Sender<bool>,
    /// Bumped by every new watch; an older watcher seeing a newer value stops feeding.
    generation: AtomicU64,
}

impl Default for KindCache {
    fn default() -> Self {
        Self { objects: RwLock::default(), synced: watch::Sender::new(false), generation: AtomicU64::new(0) }
    }
}

impl KindCache {
    /// Empty the cache and clear its synced flag for a new watch, returning the generation
    /// that watch owns. Its relist then reports every object as `Add` again.
    pub(crate) fn reset(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.objects.write().clear();
        self.synced.send_replace(false);
        generation
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store the latest snapshot. `Add` when no object with this uid was cached under the
    /// key (including a same-named replacement), `Update` otherwise.
    pub(crate) fn upsert(&self, r: Resource) -> EventKind {
        let mut objects = self.objects.write();
        let kind = match objects.get(&object_key(&r)) {
            Some(prev) if prev.uid == r.uid => EventKind::Update,
            _ => EventKind::Add,
        };
        objects.insert(object_key(&r), r);
        kind
    }

    pub(crate) fn remove(&self, key: &ObjectKey) -> Option<Resource> {
        self.objects.write().remove(key)
    }

    /// Drop everything not seen during a relist and hand the dropped objects back.
    pub(crate) fn retain_seen(&self, seen: &FxHashSet<ObjectKey>) -> Vec<Resource> {
        let mut objects = self.objects.write();
        let stale: Vec<ObjectKey> = objects.keys().filter(|k| !seen.contains(*k)).cloned().collect();
        stale.into_iter().filter_map(|k| objects.remove(&k)).collect()
    }

    pub(crate) fn get(&self, namespace: &str, name: &str) -> Option<Resource> {
        self.objects.read().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub(crate) fn list(&self, namespace: &str) -> Vec<Resource> {
        self.objects.read().values().filter(|r| r.namespace == namespace).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub(crate) fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub(crate) fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub(crate) async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // Sender lives as long as the cache, so wait_for only ends once synced.
        let _ = rx.wait_for(|s| *s).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, n: u8) -> Resource {
        Resource::from_payload(Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                uid: Some(format!("00000000-0000-0000-0000-{:012}", n)),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn classifies_add_then_update() {
        let c = KindCache::default();
        assert_eq!(c.upsert(pod("a", 1)), EventKind::Add);
        assert_eq!(c.upsert(pod("a", 1)), EventKind::Update);
        assert_eq!(c.upsert(pod("a", 2)), EventKind::Add, "recreated under the same name");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn relist_drops_unseen() {
        let c = KindCache::default();
        c.upsert(pod("a", 1));
        c.upsert(pod("b", 2));
        let seen: FxHashSet<ObjectKey> = [("default".to_string(), "a".to_string())].into_iter().collect();
        let gone = c.retain_seen(&seen);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].name, "b");
        assert!(c.get("default", "a").is_some());
        assert!(c.get("default", "b").is_none());
        assert_eq!(c.list("default").len(), 1);
        assert!(c.list("other").is_empty());
    }

    #[test]
    fn reset_forgets_objects_and_sync() {
        let c = KindCache::default();
        c.upsert(pod("a", 1));
        c.mark_synced();
        let g = c.reset();
        assert_eq!(c.generation(), g);
        assert!(!c.is_synced());
        assert_eq!(c.len(), 0);
        assert_eq!(c.upsert(pod("a", 1)), EventKind::Add, "relist after a rewatch is an add");
        assert!(c.reset() > g);
    }

    #[tokio::test]
    async fn wait_synced_resolves_after_mark() {
        let c = std::sync::Arc::new(KindCache::default());
        assert!(!c.is_synced());
        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait_synced().await }
        });
        c.mark_synced();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(c.is_synced());
    }
}
