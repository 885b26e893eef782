//! The repository contract shared by every backend.

use std::collections::BTreeMap;

use async_trait::async_trait;

use tally_core::{MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::StoreResult;

/// Thread-safe store for gauges and counters.
///
/// Every write is atomic with respect to readers: a concurrent `get` sees
/// either the value before or after an update, never a partial one.
#[async_trait]
pub trait MetricRepository: Send + Sync {
    /// Insert or overwrite a gauge.
    async fn set_gauge(&self, name: &str, value: f64) -> StoreResult<()>;

    /// Add `delta` to a counter, creating it at zero first if absent.
    /// Returns the accumulated total.
    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<i64>;

    /// Look up one metric. `None` when the name was never written for `kind`.
    async fn get(&self, kind: MetricKind, name: &str) -> StoreResult<Option<MetricValue>>;

    /// Consistent copy of both kinds.
    async fn snapshot(&self) -> StoreResult<Snapshot>;

    /// Point-in-time copy of every metric of one kind.
    async fn all_of_kind(&self, kind: MetricKind) -> StoreResult<BTreeMap<String, MetricValue>> {
        let snapshot = self.snapshot().await?;
        Ok(match kind {
            MetricKind::Gauge => snapshot
                .gauges
                .into_iter()
                .map(|(name, v)| (name, MetricValue::Gauge(v)))
                .collect(),
            MetricKind::Counter => snapshot
                .counters
                .into_iter()
                .map(|(name, v)| (name, MetricValue::Counter(v)))
                .collect(),
        })
    }

    /// Apply a batch of validated updates in order.
    async fn apply(&self, updates: &[MetricUpdate]) -> StoreResult<()> {
        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => self.set_gauge(name, *value).await?,
                MetricUpdate::Counter { name, delta } => {
                    self.add_counter(name, *delta).await?;
                }
            }
        }
        Ok(())
    }

    /// Liveness check. Only meaningful for the relational backend.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Final flush and release of backend resources.
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Short backend label for logs.
    fn backend_name(&self) -> &'static str;
}
