//! In-memory repository.
//!
//! Both maps live behind one exclusive lock. Reads take it too, which keeps
//! every snapshot consistent across kinds; write volume is small enough that
//! the lost read concurrency does not matter.

use async_trait::async_trait;
use tokio::sync::Mutex;

use tally_core::{MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::StoreResult;
use crate::repository::MetricRepository;

/// Gauges and counters held in process memory.
#[derive(Debug, Default)]
pub struct MemRepository {
    metrics: Mutex<Snapshot>,
}

impl MemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            metrics: Mutex::new(snapshot),
        }
    }

    /// Replace the whole state with `snapshot`.
    pub async fn restore(&self, snapshot: Snapshot) {
        *self.metrics.lock().await = snapshot;
    }

    /// Overwrite one metric with an authoritative value from another backend.
    pub(crate) async fn put(&self, name: &str, value: MetricValue) {
        let mut metrics = self.metrics.lock().await;
        match value {
            MetricValue::Gauge(v) => {
                metrics.gauges.insert(name.to_string(), v);
            }
            MetricValue::Counter(v) => {
                metrics.counters.insert(name.to_string(), v);
            }
        }
    }

    pub async fn set(&self, name: &str, value: f64) {
        self.metrics.lock().await.gauges.insert(name.to_string(), value);
    }

    pub async fn add(&self, name: &str, delta: i64) -> i64 {
        let mut metrics = self.metrics.lock().await;
        accumulate(&mut metrics, name, delta)
    }

    pub async fn lookup(&self, kind: MetricKind, name: &str) -> Option<MetricValue> {
        let metrics = self.metrics.lock().await;
        match kind {
            MetricKind::Gauge => metrics.gauges.get(name).copied().map(MetricValue::Gauge),
            MetricKind::Counter => metrics.counters.get(name).copied().map(MetricValue::Counter),
        }
    }

    pub async fn copy(&self) -> Snapshot {
        self.metrics.lock().await.clone()
    }

    /// Apply a batch under a single lock acquisition.
    pub async fn apply_all(&self, updates: &[MetricUpdate]) {
        let mut metrics = self.metrics.lock().await;
        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    metrics.gauges.insert(name.clone(), *value);
                }
                MetricUpdate::Counter { name, delta } => {
                    accumulate(&mut metrics, name, *delta);
                }
            }
        }
    }
}

fn accumulate(metrics: &mut Snapshot, name: &str, delta: i64) -> i64 {
    let total = metrics.counters.entry(name.to_string()).or_insert(0);
    *total = total.saturating_add(delta);
    *total
}

#[async_trait]
impl MetricRepository for MemRepository {
    async fn set_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        self.set(name, value).await;
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<i64> {
        Ok(self.add(name, delta).await)
    }

    async fn get(&self, kind: MetricKind, name: &str) -> StoreResult<Option<MetricValue>> {
        Ok(self.lookup(kind, name).await)
    }

    async fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(self.copy().await)
    }

    async fn apply(&self, updates: &[MetricUpdate]) -> StoreResult<()> {
        self.apply_all(updates).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
