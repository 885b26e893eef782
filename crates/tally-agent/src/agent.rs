//! The agent loop: poll on every tick, report every `report_step` polls.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tally_core::SigningCodec;

use crate::collector::Collector;
use crate::config::{AgentConfig, ConfigError};
use crate::reporter::Reporter;
use crate::retry::RetryPolicy;
use crate::sampler::Sampler;
use crate::transport::HttpTransport;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Polling,
    Reporting,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Polling => "polling",
            AgentState::Reporting => "reporting",
            AgentState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub struct Agent {
    collector: Collector,
    reporter: Reporter,
    poll_interval: Duration,
    state: AgentState,
}

impl Agent {
    pub fn new(collector: Collector, reporter: Reporter, poll_interval: Duration) -> Self {
        Self {
            collector,
            reporter,
            poll_interval,
            state: AgentState::Idle,
        }
    }

    /// Validate `config` and wire the HTTP reporter around `sampler`.
    pub fn from_config(
        config: &AgentConfig,
        sampler: Box<dyn Sampler>,
    ) -> Result<Self, ConfigError> {
        let step = config.validate()?;
        let transport = HttpTransport::new(config.address.clone(), config.request_timeout);
        let reporter = Reporter::new(Box::new(transport), RetryPolicy::default())
            .with_compression(config.gzip)
            .with_signer(SigningCodec::from_key(config.key.as_deref()));
        Ok(Self::new(
            Collector::new(sampler, step),
            reporter,
            config.poll_interval,
        ))
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// One poll, plus a report when the step is complete. Report failures
    /// are logged and the batch is dropped.
    pub async fn tick(&mut self) {
        self.state = AgentState::Polling;
        self.collector.poll();

        if self.collector.report_due() {
            self.state = AgentState::Reporting;
            let batch = self.collector.drain();
            if let Err(e) = self.reporter.report(&batch).await {
                warn!(
                    error = %e,
                    samples = batch.samples.len(),
                    poll_delta = batch.poll_delta,
                    "report failed, batch dropped"
                );
            }
        }
        self.state = AgentState::Idle;
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    /// Shutdown is only observed between ticks.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            report_step = self.collector.report_step(),
            "agent started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.state = AgentState::Stopped;
        info!(polls = self.collector.poll_count(), "agent stopped");
    }
}
