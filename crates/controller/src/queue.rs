use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A deferred unit of work. Re-runnable, so a failed attempt can be retried.
#[derive(Clone)]
pub struct Job {
    name: Arc<str>,
    run: Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>,
    attempt: u32,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self { name: name.into(), run: Arc::new(move || f().boxed()), attempt: 0 }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn run(&self) -> BoxFuture<'static, Result<()>> {
        (self.run)()
    }
}

/// Exponential per-job delay: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Overall cap on retries across every job: a token bucket refilled at `qps`, holding at
/// most `burst` tokens. `qps <= 0` turns it off.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub qps: f64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { qps: 10.0, burst: 100 }
    }
}

struct Bucket {
    limit: RateLimit,
    /// (tokens, last refill); tokens go negative while reservations are outstanding.
    state: SyncMutex<(f64, Instant)>,
}

impl Bucket {
    fn new(limit: RateLimit) -> Self {
        Self { limit, state: SyncMutex::new((f64::from(limit.burst), Instant::now())) }
    }

    /// Take one token and return how long the caller has to wait for it.
    fn reserve(&self) -> Duration {
        if self.limit.qps <= 0.0 {
            return Duration::ZERO;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        let refill = now.duration_since(state.1).as_secs_f64() * self.limit.qps;
        state.0 = (state.0 + refill).min(f64::from(self.limit.burst)) - 1.0;
        state.1 = now;
        if state.0 >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.0 / self.limit.qps)
        }
    }
}

/// Unbounded FIFO shared by every worker, with delayed re-enqueue and a shutdown signal.
/// Retries wait for the longer of their own backoff and the shared [`RateLimit`].
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    shutdown: CancellationToken,
    backoff: Backoff,
    bucket: Bucket,
    depth: AtomicUsize,
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Arc<Self> {
        Self::with_rate_limit(backoff, RateLimit::default())
    }

    pub fn with_rate_limit(backoff: Backoff, limit: RateLimit) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            shutdown: CancellationToken::new(),
            backoff,
            bucket: Bucket::new(limit),
            depth: AtomicUsize::new(0),
        })
    }

    /// Enqueue now. Returns false once the queue has been shut down.
    pub fn add(&self, job: Job) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if self.tx.send(job).is_err() {
            return false;
        }
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("queue_depth", depth as f64);
        true
    }

    /// Enqueue after `delay`, unless the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, job: Job, delay: Duration) {
        let q = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = q.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => { q.add(job); }
            }
        });
    }

    /// Schedule another attempt with backoff. Returns false when retries are exhausted.
    pub fn retry(self: &Arc<Self>, mut job: Job) -> bool {
        if job.attempt >= self.backoff.max_retries {
            return false;
        }
        let delay = self.backoff.delay(job.attempt).max(self.bucket.reserve());
        job.attempt += 1;
        debug!(job = %job.name, attempt = job.attempt, delay_ms = delay.as_millis() as u64, "job requeued");
        self.add_after(job, delay);
        true
    }

    /// Next job, or `None` once shut down.
    pub async fn next(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        let job = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            j = rx.recv() => j,
        };
        if job.is_some() {
            let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
            metrics::gauge!("queue_depth", depth as f64);
        }
        job
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drop whatever is still queued. Only meaningful after [`shutdown`](Self::shutdown).
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        self.depth.store(0, Ordering::Relaxed);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn backoff() -> Backoff {
        Backoff { base: Duration::from_millis(5), max: Duration::from_millis(30), max_retries: 2 }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let b = backoff();
        assert_eq!(b.delay(0), Duration::from_millis(5));
        assert_eq!(b.delay(1), Duration::from_millis(10));
        assert_eq!(b.delay(2), Duration::from_millis(20));
        assert_eq!(b.delay(3), Duration::from_millis(30));
        assert_eq!(b.delay(40), Duration::from_millis(30));
    }

    #[test]
    fn bucket_allows_burst_then_spaces_out() {
        let bucket = Bucket::new(RateLimit { qps: 10.0, burst: 2 });
        assert_eq!(bucket.reserve(), Duration::ZERO);
        assert_eq!(bucket.reserve(), Duration::ZERO);
        let third = bucket.reserve();
        assert!(third > Duration::from_millis(50) && third <= Duration::from_millis(100), "{:?}", third);
        assert!(bucket.reserve() > third, "outstanding reservations queue up");

        let off = Bucket::new(RateLimit { qps: 0.0, burst: 0 });
        assert_eq!(off.reserve(), Duration::ZERO);
    }

    #[tokio::test]
    async fn retry_waits_for_the_shared_limit() {
        let q = WorkQueue::with_rate_limit(backoff(), RateLimit { qps: 20.0, burst: 1 });
        let started = Instant::now();
        for name in ["a", "b"] {
            assert!(q.retry(Job::new(name, || async { Ok(()) })));
        }
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), q.next()).await.unwrap().unwrap();
        }
        // First retry spends the only token; the second waits ~50ms for a refill.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn fifo_then_none_after_shutdown() {
        let q = WorkQueue::new(backoff());
        assert!(q.add(Job::new("a", || async { Ok(()) })));
        assert!(q.add(Job::new("b", || async { Ok(()) })));
        assert_eq!(q.len(), 2);
        assert_eq!(q.next().await.unwrap().name(), "a");
        q.shutdown();
        assert!(q.next().await.is_none());
        assert!(!q.add(Job::new("c", || async { Ok(()) })));
        assert_eq!(q.drain().await, 1);
    }

    #[tokio::test]
    async fn retry_is_bounded() {
        let q = WorkQueue::new(backoff());
        let runs = Arc::new(AtomicU32::new(0));
        let job = {
            let runs = runs.clone();
            Job::new("flaky", move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("nope")
                }
            })
        };
        q.add(job);
        let mut attempts = Vec::new();
        while let Some(j) = tokio::time::timeout(Duration::from_secs(1), q.next()).await.unwrap() {
            attempts.push(j.attempt());
            if j.run().await.is_err() && !q.retry(j) {
                break;
            }
        }
        assert_eq!(attempts, vec![0, 1, 2]);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
