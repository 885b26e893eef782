//! Postgres-backed repository.
//!
//! One table per kind, keyed by metric name. Gauge writes are plain upserts;
//! counter writes push the accumulation into the database with
//! `ON CONFLICT … SET value = counters.value + EXCLUDED.value`, so concurrent
//! servers sharing the database never lose an increment.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, info};

use tally_core::{MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::{StoreError, StoreResult};
use crate::file::FileRepository;
use crate::repository::MetricRepository;

const CREATE_GAUGES: &str = "CREATE TABLE IF NOT EXISTS gauges (
    name TEXT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL
)";

const CREATE_COUNTERS: &str = "CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value BIGINT NOT NULL
)";

const UPSERT_GAUGE: &str = "INSERT INTO gauges (name, value) VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value";

const UPSERT_COUNTER: &str = "INSERT INTO counters (name, value) VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = counters.value + EXCLUDED.value
    RETURNING value";

/// Repository whose source of truth is a Postgres database.
pub struct PgRepository {
    pool: PgPool,
    /// Local snapshot file kept alongside the database when configured.
    mirror: Option<FileRepository>,
}

impl PgRepository {
    /// Connect and create the schema. Fails if either step does not finish
    /// within `timeout`.
    pub async fn connect(options: PgConnectOptions, timeout: Duration) -> StoreResult<PgPool> {
        let attempt = async {
            let pool = PgPoolOptions::new()
                .max_connections(8)
                .acquire_timeout(timeout)
                .connect_with(options)
                .await?;
            sqlx::query(CREATE_GAUGES).execute(&pool).await?;
            sqlx::query(CREATE_COUNTERS).execute(&pool).await?;
            Ok::<_, StoreError>(pool)
        };

        let pool = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| StoreError::Unavailable(format!("no connection within {timeout:?}")))??;
        info!("postgres schema ready");
        Ok(pool)
    }

    pub fn new(pool: PgPool, mirror: Option<FileRepository>) -> Self {
        Self { pool, mirror }
    }

    /// Reset the mirror file to the database contents.
    pub async fn sync_mirror(&self) -> StoreResult<()> {
        if let Some(mirror) = &self.mirror {
            let snapshot = self.snapshot().await?;
            debug!(
                gauges = snapshot.gauges.len(),
                counters = snapshot.counters.len(),
                "mirror seeded from database"
            );
            mirror.replace(snapshot).await;
        }
        Ok(())
    }

    async fn mirror(&self, name: &str, value: MetricValue) {
        if let Some(mirror) = &self.mirror {
            mirror.mirror(name, value).await;
        }
    }
}

#[async_trait]
impl MetricRepository for PgRepository {
    async fn set_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        sqlx::query(UPSERT_GAUGE)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        self.mirror(name, MetricValue::Gauge(value)).await;
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(UPSERT_COUNTER)
            .bind(name)
            .bind(delta)
            .fetch_one(&self.pool)
            .await?;
        self.mirror(name, MetricValue::Counter(total)).await;
        Ok(total)
    }

    async fn get(&self, kind: MetricKind, name: &str) -> StoreResult<Option<MetricValue>> {
        let value = match kind {
            MetricKind::Gauge => {
                sqlx::query_scalar::<_, f64>("SELECT value FROM gauges WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(MetricValue::Gauge)
            }
            MetricKind::Counter => {
                sqlx::query_scalar::<_, i64>("SELECT value FROM counters WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(MetricValue::Counter)
            }
        };
        Ok(value)
    }

    async fn snapshot(&self) -> StoreResult<Snapshot> {
        let mut tx = self.pool.begin().await?;
        let gauges = sqlx::query_as::<_, (String, f64)>("SELECT name, value FROM gauges")
            .fetch_all(&mut *tx)
            .await?;
        let counters = sqlx::query_as::<_, (String, i64)>("SELECT name, value FROM counters")
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Snapshot {
            gauges: gauges.into_iter().collect(),
            counters: counters.into_iter().collect(),
        })
    }

    /// The whole batch commits or none of it does.
    async fn apply(&self, updates: &[MetricUpdate]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::with_capacity(updates.len());
        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    sqlx::query(UPSERT_GAUGE)
                        .bind(name)
                        .bind(*value)
                        .execute(&mut *tx)
                        .await?;
                    applied.push((name, MetricValue::Gauge(*value)));
                }
                MetricUpdate::Counter { name, delta } => {
                    let total: i64 = sqlx::query_scalar(UPSERT_COUNTER)
                        .bind(name)
                        .bind(*delta)
                        .fetch_one(&mut *tx)
                        .await?;
                    applied.push((name, MetricValue::Counter(total)));
                }
            }
        }
        tx.commit().await?;
        debug!(records = updates.len(), "batch committed");

        for (name, value) in applied {
            self.mirror(name, value).await;
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(mirror) = &self.mirror {
            mirror.close().await?;
        }
        self.pool.close().await;
        info!("postgres repository closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
