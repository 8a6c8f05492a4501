use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for one [`Controller`](crate::Controller).
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Root of the output tree.
    pub base_dir: PathBuf,
    pub workers: usize,
    /// Delay between log sync passes.
    pub log_sync_interval: Duration,
    /// Bound on each log fetch.
    pub log_sync_timeout: Duration,
    pub cache_sync_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Retries admitted per second across all jobs; 0 disables the cap.
    pub queue_qps: f64,
    pub queue_burst: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("kubedump"),
            workers: 5,
            log_sync_interval: Duration::from_secs(1),
            log_sync_timeout: Duration::from_secs(5),
            cache_sync_timeout: Duration::from_secs(60),
            max_retries: 5,
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_secs(30),
            queue_qps: 10.0,
            queue_burst: 100,
        }
    }
}

impl ControllerOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), ..Self::default() }
    }

    /// Overlay `KUBEDUMP_*` environment variables. Unparseable values are ignored.
    pub fn from_env(base_dir: impl Into<PathBuf>) -> Self {
        let mut o = Self::new(base_dir);
        if let Some(n) = env_parse::<usize>("KUBEDUMP_WORKERS") {
            o.workers = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("KUBEDUMP_LOG_SYNC_INTERVAL_MS") {
            o.log_sync_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("KUBEDUMP_LOG_SYNC_TIMEOUT_MS") {
            o.log_sync_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("KUBEDUMP_CACHE_SYNC_TIMEOUT_SECS") {
            o.cache_sync_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("KUBEDUMP_MAX_RETRIES") {
            o.max_retries = n;
        }
        if let Some(qps) = env_parse::<f64>("KUBEDUMP_QUEUE_QPS") {
            o.queue_qps = qps;
        }
        if let Some(n) = env_parse::<u32>("KUBEDUMP_QUEUE_BURST") {
            o.queue_burst = n;
        }
        o
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = ControllerOptions::new("/tmp/out");
        assert_eq!(o.workers, 5);
        assert_eq!(o.log_sync_timeout, Duration::from_secs(5));
        assert_eq!(o.base_dir, PathBuf::from("/tmp/out"));
        assert_eq!(o.queue_burst, 100);
    }

    #[test]
    fn env_overlay_ignores_garbage() {
        std::env::set_var("KUBEDUMP_MAX_RETRIES", "7");
        std::env::set_var("KUBEDUMP_LOG_SYNC_INTERVAL_MS", "soon");
        let o = ControllerOptions::from_env("out");
        assert_eq!(o.max_retries, 7);
        assert_eq!(o.log_sync_interval, Duration::from_secs(1));
        std::env::remove_var("KUBEDUMP_MAX_RETRIES");
        std::env::remove_var("KUBEDUMP_LOG_SYNC_INTERVAL_MS");
    }
}
