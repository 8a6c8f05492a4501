use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use kubedump_core::LogSource;
use metrics::counter;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Identity of one container's log: namespace, pod and container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl LogKey {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), pod: pod.into(), container: container.into() }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Append-only mirror of one container's log.
///
/// Each [`sync`](Self::sync) asks only for bytes logged since the previous sync. The
/// watermark is taken before the request goes out, so a slow fetch can re-read a small
/// overlap but never skips bytes.
pub struct LogStream {
    key: LogKey,
    path: PathBuf,
    file: Option<File>,
    last_sync: Option<DateTime<Utc>>,
}

impl LogStream {
    pub async fn open(key: LogKey, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.with_context(|| format!("creating {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { key, path, file: Some(file), last_sync: None })
    }

    pub fn key(&self) -> &LogKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Fetch new bytes once and append them. Returns the number of bytes written.
    pub async fn sync<S: LogSource + ?Sized>(&mut self, source: &S, timeout: Duration) -> Result<usize> {
        let file = self.file.as_mut().ok_or_else(|| anyhow!("log stream {} is closed", self.key))?;
        let issued = Utc::now();
        let fetch = source.fetch_logs(&self.key.namespace, &self.key.pod, &self.key.container, self.last_sync);
        let bytes = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| anyhow!("log fetch for {} timed out after {:?}", self.key, timeout))?
            .with_context(|| format!("fetching logs for {}", self.key))?;
        if !bytes.is_empty() {
            file.write_all(&bytes).await.with_context(|| format!("writing {}", self.path.display()))?;
            file.flush().await?;
            counter!("log_bytes_total", bytes.len() as u64, "namespace" => self.key.namespace.clone());
        }
        self.last_sync = Some(issued);
        debug!(stream = %self.key, bytes = bytes.len(), "log stream synced");
        Ok(bytes.len())
    }

    /// Flush and release the output file. A second close is an error.
    pub async fn close(&mut self) -> Result<()> {
        let mut file = self.file.take().ok_or_else(|| anyhow!("log stream {} already closed", self.key))?;
        file.flush().await.with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }
}
