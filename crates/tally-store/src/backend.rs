//! Backend selection.
//!
//! [`StoreConfig`] describes what the operator asked for; [`open`] turns it
//! into a live repository, falling back from Postgres to the local backends
//! when the database cannot be reached.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::file::FileRepository;
use crate::memory::MemRepository;
use crate::postgres::PgRepository;
use crate::repository::MetricRepository;

/// When snapshot files are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Rewrite the file after every mutation.
    Sync,
    /// Rewrite the file from a background task at this interval.
    Interval(Duration),
}

impl FlushPolicy {
    /// A zero interval selects synchronous flushing.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FlushPolicy::Sync
        } else {
            FlushPolicy::Interval(interval)
        }
    }
}

/// Durable storage variant backing the repository.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceBackend {
    None,
    FileSnapshot { path: PathBuf, policy: FlushPolicy },
    RelationalStore { url: String },
}

/// Repository settings, usually filled from the server CLI.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string. Takes precedence over the file backend.
    pub database_url: Option<String>,
    /// Snapshot file. `None` or an empty path disables file durability.
    pub file_path: Option<PathBuf>,
    /// Zero for synchronous flushing.
    pub store_interval: Duration,
    /// Load the snapshot file before serving.
    pub restore: bool,
    /// Upper bound for the startup connection attempt.
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            file_path: None,
            store_interval: Duration::from_secs(300),
            restore: false,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Memory-only configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// The preferred backend.
    pub fn backend(&self) -> PersistenceBackend {
        match self.database_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => PersistenceBackend::RelationalStore {
                url: url.to_string(),
            },
            None => self.local_backend(),
        }
    }

    /// The backend used when no database is configured or reachable.
    pub fn local_backend(&self) -> PersistenceBackend {
        match self
            .file_path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            Some(path) => PersistenceBackend::FileSnapshot {
                path: path.clone(),
                policy: FlushPolicy::from_interval(self.store_interval),
            },
            None => PersistenceBackend::None,
        }
    }
}

/// Open the repository described by `config`.
///
/// A malformed connection string is a configuration error. A well-formed one
/// that cannot be connected to is logged and the local backend is used.
pub async fn open(config: &StoreConfig) -> StoreResult<Arc<dyn MetricRepository>> {
    let repo: Arc<dyn MetricRepository> = match config.backend() {
        PersistenceBackend::RelationalStore { url } => {
            let options = PgConnectOptions::from_str(&url)
                .map_err(|e| StoreError::Config(format!("malformed database url: {e}")))?;
            match PgRepository::connect(options, config.connect_timeout).await {
                Ok(pool) => {
                    let repo = PgRepository::new(pool, open_mirror(config).await);
                    repo.sync_mirror().await?;
                    Arc::new(repo)
                }
                Err(e) => {
                    warn!(error = %e, "relational backend unavailable, falling back");
                    open_local(config).await
                }
            }
        }
        _ => open_local(config).await,
    };
    info!(backend = repo.backend_name(), "metric repository opened");
    Ok(repo)
}

async fn open_local(config: &StoreConfig) -> Arc<dyn MetricRepository> {
    match config.local_backend() {
        PersistenceBackend::FileSnapshot { path, policy } => {
            Arc::new(FileRepository::open(path, policy, config.restore).await)
        }
        _ => Arc::new(MemRepository::new()),
    }
}

/// The mirror never restores: its contents come from the database.
async fn open_mirror(config: &StoreConfig) -> Option<FileRepository> {
    match config.local_backend() {
        PersistenceBackend::FileSnapshot { path, policy } => {
            Some(FileRepository::open(path, policy, false).await)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{MetricKind, MetricValue};

    use super::*;

    #[test]
    fn zero_interval_is_sync() {
        assert_eq!(FlushPolicy::from_interval(Duration::ZERO), FlushPolicy::Sync);
        assert_eq!(
            FlushPolicy::from_interval(Duration::from_secs(300)),
            FlushPolicy::Interval(Duration::from_secs(300))
        );
    }

    #[test]
    fn backend_precedence() {
        let mut config = StoreConfig::in_memory();
        assert_eq!(config.backend(), PersistenceBackend::None);

        config.file_path = Some(PathBuf::new());
        assert_eq!(config.backend(), PersistenceBackend::None);

        config.file_path = Some(PathBuf::from("/tmp/metrics-db.json"));
        config.store_interval = Duration::ZERO;
        assert_eq!(
            config.backend(),
            PersistenceBackend::FileSnapshot {
                path: PathBuf::from("/tmp/metrics-db.json"),
                policy: FlushPolicy::Sync,
            }
        );

        config.database_url = Some("postgres://localhost/metrics".to_string());
        assert!(matches!(
            config.backend(),
            PersistenceBackend::RelationalStore { .. }
        ));
        assert!(matches!(
            config.local_backend(),
            PersistenceBackend::FileSnapshot { .. }
        ));
    }

    #[tokio::test]
    async fn open_memory_backend() {
        let repo = open(&StoreConfig::in_memory()).await.unwrap();
        assert_eq!(repo.backend_name(), "memory");
        repo.set_gauge("Apple", 1.0).await.unwrap();
        assert_eq!(
            repo.get(MetricKind::Gauge, "Apple").await.unwrap(),
            Some(MetricValue::Gauge(1.0))
        );
        repo.ping().await.unwrap();
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_database_url_is_fatal() {
        let config = StoreConfig {
            database_url: Some("::not a dsn::".to_string()),
            ..StoreConfig::in_memory()
        };
        let err = open(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[tokio::test]
    async fn unreachable_database_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            database_url: Some("postgres://tally@127.0.0.1:1/metrics".to_string()),
            file_path: Some(dir.path().join("metrics.json")),
            store_interval: Duration::ZERO,
            restore: false,
            connect_timeout: Duration::from_millis(500),
        };

        let repo = open(&config).await.unwrap();
        assert_eq!(repo.backend_name(), "file");
        repo.close().await.unwrap();
    }
}
