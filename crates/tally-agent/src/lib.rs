//! tally-agent: metric collection and reporting.
//!
//! # Architecture
//!
//! ```text
//! Agent::run()                       ← one tick per poll interval
//!   ├── Collector::poll()            ← Sampler reading into slot poll_count % step
//!   └── every report_step polls:
//!       Collector::drain() → Batch
//!       Reporter::report(batch)
//!         ├── JSON → sign (HashSHA256) → gzip
//!         └── RetryPolicy::run(Transport::send)
//! ```
//!
//! Reporting failures are logged and the batch is dropped; polling goes on.
//! The loop stops only when the shutdown channel fires, and only between
//! ticks.

pub mod agent;
pub mod collector;
pub mod config;
pub mod reporter;
pub mod retry;
pub mod sampler;
pub mod transport;

pub use agent::{Agent, AgentState};
pub use collector::{Batch, Collector, Sample, SampleBuffer};
pub use config::{AgentConfig, ConfigError};
pub use reporter::Reporter;
pub use retry::{Retriable, RetryPolicy};
pub use sampler::{Sampler, SystemSampler};
pub use transport::{HttpTransport, ReportError, ReportRequest, Transport};
