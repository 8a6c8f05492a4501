//! kubedump event controller.
//!
//! One dispatch task per watched kind turns deltas into jobs; a fixed pool of workers drains
//! the shared queue. Jobs do all the I/O (descriptions, event lines, links, log streams); the
//! dispatch side only touches the correlation store and the filter.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use kubedump_core::{Cluster, Delta, ResourceKind};
use kubedump_filter::Expression;
use kubedump_logs::LogStreams;
use kubedump_store::CorrelationStore;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod options;
mod queue;
mod router;

pub use options::ControllerOptions;
pub use queue::{Backoff, Job, RateLimit, WorkQueue};

use router::{Router, Shared};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller is already running")]
    AlreadyRunning,
    #[error("controller is not running")]
    NotRunning,
    #[error("waiting for caches to sync: {0}")]
    CacheSync(String),
}

enum State {
    Stopped,
    Starting,
    Running(Running),
}

struct Running {
    router: Arc<Router>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Controller {
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl Controller {
    pub fn new(cluster: Arc<dyn Cluster>, opts: ControllerOptions) -> Self {
        let shared = Shared {
            cluster,
            opts,
            store: CorrelationStore::new(),
            logs: LogStreams::new(),
            filter: ArcSwap::from_pointee(Expression::True),
        };
        Self { shared: Arc::new(shared), state: Mutex::new(State::Stopped) }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.shared.opts
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.shared.store
    }

    pub fn log_streams(&self) -> &LogStreams {
        &self.shared.logs
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    /// Replace the filter; takes effect for the next delta routed.
    pub fn set_filter(&self, filter: Expression) {
        info!(filter = %filter, "filter updated");
        self.shared.filter.store(Arc::new(filter));
    }

    /// Register watches, wait for the initial listings, then run `workers` workers and the
    /// recurring log sync until [`stop`](Self::stop).
    pub async fn start(&self, workers: usize, filter: Expression) -> Result<(), ControllerError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Stopped) {
                return Err(ControllerError::AlreadyRunning);
            }
            *state = State::Starting;
        }
        self.set_filter(filter);

        let opts = &self.shared.opts;
        let backoff = Backoff { base: opts.retry_base_delay, max: opts.retry_max_delay, max_retries: opts.max_retries };
        let token = CancellationToken::new();
        let limit = RateLimit { qps: opts.queue_qps, burst: opts.queue_burst };
        let queue = WorkQueue::with_rate_limit(backoff, limit);
        let router = Arc::new(Router::new(Arc::clone(&self.shared), Arc::clone(&queue), token.clone()));

        // Every run rebuilds its view from the initial listings.
        self.shared.store.clear();
        // Watches are opened here so that wait_synced below sees this run's listings.
        let mut tasks: Vec<JoinHandle<()>> = ResourceKind::WATCHED
            .into_iter()
            .map(|kind| {
                let stream = self.shared.cluster.watch(kind);
                tokio::spawn(dispatch(Arc::clone(&router), kind, stream))
            })
            .collect();

        let synced = tokio::time::timeout(opts.cache_sync_timeout, self.shared.cluster.wait_synced(&ResourceKind::WATCHED)).await;
        let failure = match synced {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", opts.cache_sync_timeout)),
        };
        if let Some(reason) = failure {
            token.cancel();
            queue.shutdown();
            for t in &tasks {
                t.abort();
            }
            queue.drain().await;
            *self.state.lock() = State::Stopped;
            error!(reason = %reason, "cache sync failed");
            return Err(ControllerError::CacheSync(reason));
        }

        router.mark_started(Utc::now());
        let workers = workers.max(1);
        for id in 0..workers {
            tasks.push(tokio::spawn(worker(id, Arc::clone(&queue))));
        }
        queue.add(log_sync_job(Arc::clone(&router)));

        *self.state.lock() = State::Running(Running { router, tasks });
        info!(workers, base = %opts.base_dir.display(), "controller started");
        Ok(())
    }

    /// Signal every loop to exit, shut the queue and close all log streams. Jobs already
    /// dequeued finish on their own.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(r) => r,
                other => {
                    *state = other;
                    return Err(ControllerError::NotRunning);
                }
            }
        };
        let Running { router, tasks } = running;
        router.token.cancel();
        router.queue.shutdown();
        let grace = self.shared.opts.log_sync_timeout;
        let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "tasks did not exit within grace period, aborting");
            for a in aborts {
                a.abort();
            }
        }
        let dropped = router.queue.drain().await;
        self.shared.logs.close_all().await;
        info!(dropped_jobs = dropped, "controller stopped");
        Ok(())
    }
}

async fn dispatch(router: Arc<Router>, kind: ResourceKind, mut stream: BoxStream<'static, Delta>) {
    debug!(kind = %kind, "dispatch started");
    loop {
        tokio::select! {
            _ = router.token.cancelled() => break,
            next = stream.next() => match next {
                Some(delta) => router.handle(delta),
                None => {
                    warn!(kind = %kind, "watch stream ended");
                    break;
                }
            },
        }
    }
    debug!(kind = %kind, "dispatch stopped");
}

async fn worker(id: usize, queue: Arc<WorkQueue>) {
    debug!(worker = id, "worker started");
    while let Some(job) = queue.next().await {
        let started = Instant::now();
        let res = job.run().await;
        histogram!("job_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("jobs_total", 1u64);
        if let Err(e) = res {
            counter!("jobs_failed_total", 1u64);
            if queue.retry(job.clone()) {
                counter!("jobs_retried_total", 1u64);
                warn!(worker = id, job = job.name(), attempt = job.attempt(), error = %e, "job failed, retrying");
            } else {
                error!(worker = id, job = job.name(), error = %e, "job failed, giving up");
            }
        }
    }
    debug!(worker = id, "worker stopped");
}

/// Sync every registered log stream, then re-enqueue after the configured interval until
/// the controller stops.
fn log_sync_job(router: Arc<Router>) -> Job {
    Job::new("log sync", move || {
        let router = Arc::clone(&router);
        async move {
            let shared = &router.shared;
            shared.logs.sync_all(shared.cluster.as_ref(), shared.opts.log_sync_timeout).await;
            if !router.token.is_cancelled() {
                router.queue.add_after(log_sync_job(Arc::clone(&router)), shared.opts.log_sync_interval);
            }
            Ok(())
        }
    })
}
