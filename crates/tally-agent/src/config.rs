//! Agent configuration and validation.

use std::time::Duration;

use thiserror::Error;

/// Startup configuration errors. Any of these stops the agent.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("poll and report intervals must be positive")]
    ZeroInterval,

    #[error("report interval {report:?} must be a multiple of poll interval {poll:?}")]
    InvalidIntervals { poll: Duration, report: Duration },

    #[error("server address must not be empty")]
    EmptyAddress,
}

/// Settings for one agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the collection service.
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    /// HMAC key; reports are unsigned when `None`.
    pub key: Option<String>,
    pub gzip: bool,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            key: None,
            gzip: true,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl AgentConfig {
    /// Number of polls per report.
    ///
    /// Both intervals must be positive and the report interval a whole
    /// multiple of the poll interval.
    pub fn report_step(&self) -> Result<u64, ConfigError> {
        let poll = self.poll_interval.as_millis();
        let report = self.report_interval.as_millis();
        if poll == 0 || report == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if report < poll || report % poll != 0 {
            return Err(ConfigError::InvalidIntervals {
                poll: self.poll_interval,
                report: self.report_interval,
            });
        }
        Ok((report / poll) as u64)
    }

    /// Check every field; returns the report step on success.
    pub fn validate(&self) -> Result<u64, ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        self.report_step()
    }
}
