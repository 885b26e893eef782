//! tally-store: the metric repository.
//!
//! One [`MetricRepository`] trait with three implementations, selected once
//! at startup by [`open`]:
//!
//! ```text
//! StoreConfig::backend()
//!   ├── RelationalStore → PgRepository   (upserts, optional file mirror)
//!   ├── FileSnapshot    → FileRepository (memory + JSON snapshot file)
//!   └── None            → MemRepository  (memory only)
//! ```
//!
//! A relational backend that cannot be reached at startup falls back to the
//! file or memory repository. The repository is shared as
//! `Arc<dyn MetricRepository>` and must be closed once on shutdown so the
//! final snapshot is flushed.

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use backend::{FlushPolicy, PersistenceBackend, StoreConfig, open};
pub use error::{StoreError, StoreResult};
pub use file::FileRepository;
pub use memory::MemRepository;
pub use postgres::PgRepository;
pub use repository::MetricRepository;
