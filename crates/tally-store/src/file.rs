//! File-snapshot repository.
//!
//! Wraps a [`MemRepository`] and persists its full state as one JSON object
//! `{"gauges": {...}, "counters": {...}}`. The file is rewritten whole on
//! every flush (temp file + rename), either after each mutation or from a
//! background task, depending on the [`FlushPolicy`].
//!
//! Write failures are logged and swallowed: the in-memory maps stay
//! authoritative and the next flush tries again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tally_core::{MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::backend::FlushPolicy;
use crate::error::StoreResult;
use crate::memory::MemRepository;
use crate::repository::MetricRepository;

/// Serializes writers so the newest snapshot always lands last.
struct SnapshotWriter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotWriter {
    async fn flush(&self, metrics: &MemRepository) {
        let _guard = self.write_lock.lock().await;
        let snapshot = metrics.copy().await;
        match write_snapshot(&self.path, &snapshot).await {
            Ok(()) => debug!(
                path = ?self.path,
                gauges = snapshot.gauges.len(),
                counters = snapshot.counters.len(),
                "snapshot flushed"
            ),
            Err(e) => warn!(path = ?self.path, error = %e, "snapshot flush failed"),
        }
    }
}

/// Background flush task handle.
struct Flusher {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Memory repository with JSON snapshot durability.
pub struct FileRepository {
    metrics: Arc<MemRepository>,
    writer: Arc<SnapshotWriter>,
    policy: FlushPolicy,
    flusher: Mutex<Option<Flusher>>,
}

impl FileRepository {
    /// Open the repository, optionally restoring the last snapshot first.
    ///
    /// With [`FlushPolicy::Interval`] this spawns the flush task, so it must
    /// be called inside a tokio runtime.
    pub async fn open(path: impl Into<PathBuf>, policy: FlushPolicy, restore: bool) -> Self {
        let path = path.into();
        let metrics = Arc::new(MemRepository::new());

        if restore {
            if let Some(snapshot) = read_snapshot(&path).await {
                info!(
                    ?path,
                    gauges = snapshot.gauges.len(),
                    counters = snapshot.counters.len(),
                    "snapshot restored"
                );
                metrics.restore(snapshot).await;
            }
        }

        let writer = Arc::new(SnapshotWriter {
            path,
            write_lock: Mutex::new(()),
        });

        let flusher = match policy {
            FlushPolicy::Sync => None,
            FlushPolicy::Interval(interval) => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(run_flush_loop(
                    metrics.clone(),
                    writer.clone(),
                    interval,
                    shutdown_rx,
                ));
                Some(Flusher {
                    shutdown_tx,
                    handle,
                })
            }
        };

        Self {
            metrics,
            writer,
            policy,
            flusher: Mutex::new(flusher),
        }
    }

    pub fn path(&self) -> &Path {
        &self.writer.path
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Write the current state to disk now.
    pub async fn flush(&self) {
        self.writer.flush(&self.metrics).await;
    }

    async fn after_write(&self) {
        if self.policy == FlushPolicy::Sync {
            self.flush().await;
        }
    }

    /// Replace the whole state with `snapshot` and write it out.
    pub(crate) async fn replace(&self, snapshot: Snapshot) {
        self.metrics.restore(snapshot).await;
        self.flush().await;
    }

    /// Record a value computed by another backend.
    pub(crate) async fn mirror(&self, name: &str, value: MetricValue) {
        self.metrics.put(name, value).await;
        self.after_write().await;
    }
}

impl Drop for FileRepository {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.get_mut().take() {
            flusher.handle.abort();
        }
    }
}

#[async_trait]
impl MetricRepository for FileRepository {
    async fn set_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        self.metrics.set(name, value).await;
        self.after_write().await;
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<i64> {
        let total = self.metrics.add(name, delta).await;
        self.after_write().await;
        Ok(total)
    }

    async fn get(&self, kind: MetricKind, name: &str) -> StoreResult<Option<MetricValue>> {
        Ok(self.metrics.lookup(kind, name).await)
    }

    async fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(self.metrics.copy().await)
    }

    async fn apply(&self, updates: &[MetricUpdate]) -> StoreResult<()> {
        self.metrics.apply_all(updates).await;
        self.after_write().await;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(flusher) = self.flusher.lock().await.take() {
            let _ = flusher.shutdown_tx.send(true);
            let _ = flusher.handle.await;
        }
        self.flush().await;
        info!(path = ?self.writer.path, "file repository closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

async fn run_flush_loop(
    metrics: Arc<MemRepository>,
    writer: Arc<SnapshotWriter>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "snapshot flusher started");
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => writer.flush(&metrics).await,
            _ = shutdown.changed() => {
                debug!("snapshot flusher stopping");
                break;
            }
        }
    }
}

/// Load the last snapshot. Any failure means "start empty".
async fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no snapshot to restore");
            return None;
        }
        Err(e) => {
            warn!(?path, error = %e, "snapshot unreadable, starting empty");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(?path, error = %e, "snapshot undecodable, starting empty");
            None
        }
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn snapshot_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("metrics-db.json")
    }

    #[tokio::test]
    async fn sync_mode_writes_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;

        repo.set_gauge("Apple", 3.0).await.unwrap();
        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.gauges["Apple"], 3.0);

        repo.add_counter("Nile", 79).await.unwrap();
        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.counters["Nile"], 79);
    }

    #[tokio::test]
    async fn restore_loads_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);

        {
            let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;
            repo.set_gauge("Apple", 2.0).await.unwrap();
            repo.add_counter("Mississippi", 5).await.unwrap();
            repo.close().await.unwrap();
        }

        let repo = FileRepository::open(&path, FlushPolicy::Sync, true).await;
        assert_eq!(
            repo.get(MetricKind::Gauge, "Apple").await.unwrap(),
            Some(MetricValue::Gauge(2.0))
        );
        assert_eq!(
            repo.get(MetricKind::Counter, "Mississippi").await.unwrap(),
            Some(MetricValue::Counter(5))
        );
    }

    #[tokio::test]
    async fn replace_drops_names_missing_from_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        std::fs::write(&path, r#"{"gauges":{"Stale":1.0},"counters":{}}"#).unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;
        let mut source = Snapshot::default();
        source.counters.insert("Nile".to_string(), 79);
        repo.replace(source).await;
        repo.mirror("Apple", MetricValue::Gauge(2.0)).await;
        repo.close().await.unwrap();

        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(!on_disk.gauges.contains_key("Stale"));
        assert_eq!(on_disk.gauges["Apple"], 2.0);
        assert_eq!(on_disk.counters["Nile"], 79);
    }

    #[tokio::test]
    async fn restore_disabled_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        std::fs::write(&path, r#"{"gauges":{"Apple":1.0},"counters":{}}"#).unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;
        assert!(repo.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        std::fs::write(&path, b"{not json").unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, true).await;
        assert!(repo.snapshot().await.unwrap().is_empty());

        // The repository keeps working and overwrites the bad file.
        repo.set_gauge("Apple", 1.0).await.unwrap();
        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.gauges["Apple"], 1.0);
    }

    #[tokio::test]
    async fn snapshot_restore_snapshot_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);

        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;
        for (i, name) in ["Zeta", "Alloc", "Mallocs", "HeapIdle"].iter().enumerate() {
            repo.set_gauge(name, i as f64 * 1.25).await.unwrap();
            repo.add_counter(name, i as i64).await.unwrap();
        }
        repo.close().await.unwrap();
        let first = std::fs::read(&path).unwrap();

        let restored = FileRepository::open(&path, FlushPolicy::Sync, true).await;
        restored.close().await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes every rename fail.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await;
        repo.set_gauge("Apple", 3.0).await.unwrap();
        assert_eq!(
            repo.get(MetricKind::Gauge, "Apple").await.unwrap(),
            Some(MetricValue::Gauge(3.0))
        );
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn interval_mode_flushes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        let repo =
            FileRepository::open(&path, FlushPolicy::Interval(Duration::from_millis(50)), false)
                .await;

        repo.set_gauge("Apple", 3.0).await.unwrap();
        assert!(!path.exists(), "interval mode must not write on mutation");

        let mut flushed = None;
        for _ in 0..100 {
            if let Ok(bytes) = std::fs::read(&path) {
                flushed = serde_json::from_slice::<Snapshot>(&bytes).ok();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(flushed.unwrap().gauges["Apple"], 3.0);

        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_performs_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        let repo =
            FileRepository::open(&path, FlushPolicy::Interval(Duration::from_secs(3600)), false)
                .await;

        repo.add_counter("PollCount", 5).await.unwrap();
        repo.close().await.unwrap();

        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.counters["PollCount"], 5);
    }
}
