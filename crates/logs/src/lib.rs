//! kubedump log streams.
//!
//! A [`LogStream`] mirrors one container's log into `logs/<container>.log` by repeated,
//! non-following since-time fetches. [`LogStreams`] is the registry the controller drives:
//! one recurring sync pass over every registered stream.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kubedump_core::LogSource;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

mod stream;

pub use stream::{LogKey, LogStream};

type Shared = Arc<tokio::sync::Mutex<LogStream>>;

/// Outcome of one [`LogStreams::sync_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub bytes: usize,
}

enum Slot {
    /// Claimed by a `start` whose file is still being opened.
    Opening(u64),
    Open(Shared),
}

impl Slot {
    fn open(&self) -> Option<&Shared> {
        match self {
            Slot::Open(s) => Some(s),
            Slot::Opening(_) => None,
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: FxHashMap<LogKey, Slot>,
    next_ticket: u64,
}

/// Registry of open log streams.
///
/// The map lock only guards insert/remove/snapshot; every network or file operation
/// happens on a stream's own async mutex after the map lock has been released. A key is
/// claimed before its file is opened, so a `stop` that lands while the open is in flight
/// cancels the start instead of missing it.
#[derive(Default)]
pub struct LogStreams {
    inner: Mutex<Inner>,
}

impl LogStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered keys, including starts still opening their file.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &LogKey) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    pub fn keys(&self) -> Vec<LogKey> {
        let mut keys: Vec<LogKey> = self.inner.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Open and register a stream writing to `path`. Returns false when `key` is already
    /// registered, or when it was stopped before the file finished opening.
    pub async fn start(&self, key: LogKey, path: impl Into<PathBuf>) -> Result<bool> {
        let ticket = {
            let mut inner = self.inner.lock();
            if inner.slots.contains_key(&key) {
                return Ok(false);
            }
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;
            inner.slots.insert(key.clone(), Slot::Opening(ticket));
            ticket
        };
        let mut stream = match LogStream::open(key.clone(), path).await {
            Ok(s) => s,
            Err(e) => {
                self.release(&key, ticket);
                return Err(e);
            }
        };
        {
            let mut inner = self.inner.lock();
            if matches!(inner.slots.get(&key), Some(Slot::Opening(t)) if *t == ticket) {
                inner.slots.insert(key.clone(), Slot::Open(Arc::new(tokio::sync::Mutex::new(stream))));
                metrics::gauge!("log_streams", inner.slots.len() as f64);
                info!(stream = %key, "log stream started");
                return Ok(true);
            }
        }
        debug!(stream = %key, "log stream stopped while opening");
        stream.close().await?;
        Ok(false)
    }

    fn release(&self, key: &LogKey, ticket: u64) {
        let mut inner = self.inner.lock();
        if matches!(inner.slots.get(key), Some(Slot::Opening(t)) if *t == ticket) {
            inner.slots.remove(key);
        }
    }

    /// Deregister and close one stream. Returns false when it was not registered. A start
    /// still opening its file is cancelled and counts as stopped.
    pub async fn stop(&self, key: &LogKey) -> Result<bool> {
        let removed = {
            let mut inner = self.inner.lock();
            let s = inner.slots.remove(key);
            metrics::gauge!("log_streams", inner.slots.len() as f64);
            s
        };
        match removed {
            None => Ok(false),
            Some(Slot::Opening(_)) => {
                info!(stream = %key, "pending log stream cancelled");
                Ok(true)
            }
            Some(Slot::Open(stream)) => {
                stream.lock().await.close().await?;
                info!(stream = %key, "log stream stopped");
                Ok(true)
            }
        }
    }

    /// Sync every registered stream once. Failures are logged and counted, never fatal.
    pub async fn sync_all<S: LogSource + ?Sized>(&self, source: &S, timeout: Duration) -> SyncReport {
        let snapshot: Vec<Shared> = self.inner.lock().slots.values().filter_map(Slot::open).cloned().collect();
        let mut report = SyncReport::default();
        for shared in snapshot {
            let mut stream = shared.lock().await;
            if stream.is_closed() {
                continue;
            }
            match stream.sync(source, timeout).await {
                Ok(n) => {
                    report.synced += 1;
                    report.bytes += n;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(stream = %stream.key(), error = %e, "log sync failed");
                }
            }
        }
        debug!(synced = report.synced, failed = report.failed, bytes = report.bytes, "log sync pass");
        report
    }

    /// Sync a single stream. `Ok(None)` when it is not registered.
    pub async fn sync_one<S: LogSource + ?Sized>(&self, key: &LogKey, source: &S, timeout: Duration) -> Result<Option<usize>> {
        let Some(shared) = self.inner.lock().slots.get(key).and_then(Slot::open).cloned() else { return Ok(None) };
        let mut stream = shared.lock().await;
        if stream.is_closed() {
            return Ok(None);
        }
        stream.sync(source, timeout).await.map(Some)
    }

    /// Close and drop every stream. Pending starts find their slot gone and close themselves.
    pub async fn close_all(&self) {
        let drained: Vec<(LogKey, Shared)> = self
            .inner
            .lock()
            .slots
            .drain()
            .filter_map(|(k, slot)| match slot {
                Slot::Open(s) => Some((k, s)),
                Slot::Opening(_) => None,
            })
            .collect();
        metrics::gauge!("log_streams", 0.0);
        for (key, shared) in drained {
            if let Err(e) = shared.lock().await.close().await {
                warn!(stream = %key, error = %e, "closing log stream");
            }
        }
    }
}
