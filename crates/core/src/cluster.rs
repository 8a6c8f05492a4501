use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::{Delta, Resource, ResourceKind};

/// Fetches container log bytes.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Single non-following fetch of everything logged since `since` (or the whole log).
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Bytes>;
}

/// Everything kubedump needs from a live cluster.
///
/// Implementations own the list+watch machinery and a local cache per watched kind.
#[async_trait::async_trait]
pub trait Cluster: LogSource {
    /// Start list+watch for `kind`. The initial listing arrives as `Add` deltas, followed by
    /// live notifications in emission order. Dropping the stream stops the watch.
    fn watch(&self, kind: ResourceKind) -> BoxStream<'static, Delta>;

    /// Resolves once every stream in `kinds` has delivered its initial listing.
    async fn wait_synced(&self, kinds: &[ResourceKind]) -> Result<()>;

    /// Cached lookup by namespace + name.
    fn cached(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Resource>;

    /// Every cached resource of `kind` in `namespace`.
    fn cached_list(&self, kind: ResourceKind, namespace: &str) -> Vec<Resource>;

    /// Live get against the API server; `Ok(None)` when the object does not exist.
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Resource>>;
}
