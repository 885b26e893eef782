//! Metric domain types.
//!
//! A metric is identified by its name and its kind. Gauges hold the last
//! value written; counters accumulate deltas. `Metric` is the JSON record
//! carried on the wire, `MetricUpdate` is its validated form.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the counter the agent increments on every poll.
pub const POLL_COUNT: &str = "PollCount";

// ── Kinds and values ───────────────────────────────────────────────

/// The two supported metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(RecordError::UnknownKind(other.to_string())),
        }
    }
}

/// A stored metric value, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

// ── Wire record ────────────────────────────────────────────────────

/// Errors raised while validating an inbound metric record.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("invalid metric name")]
    MissingName,

    #[error("invalid metric type: {0}")]
    UnknownKind(String),

    #[error("invalid metric value")]
    MissingValue,

    #[error("invalid metric value: {0}")]
    BadValue(String),
}

/// JSON record exchanged between agent and server.
///
/// `kind` stays a plain string so that an unknown type can be reported
/// as a record error instead of a generic decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge.to_string(),
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter.to_string(),
            value: None,
            delta: Some(delta),
        }
    }

    /// Build the response record for a stored value.
    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Gauge(v) => Self::gauge(id, v),
            MetricValue::Counter(v) => Self::counter(id, v),
        }
    }

    /// Parse the `type` field.
    pub fn metric_kind(&self) -> Result<MetricKind, RecordError> {
        self.kind.parse()
    }

    /// Validate the record into a typed update.
    pub fn into_update(self) -> Result<MetricUpdate, RecordError> {
        if self.id.is_empty() {
            return Err(RecordError::MissingName);
        }
        match self.metric_kind()? {
            MetricKind::Gauge => {
                let value = self.value.ok_or(RecordError::MissingValue)?;
                Ok(MetricUpdate::Gauge {
                    name: self.id,
                    value,
                })
            }
            MetricKind::Counter => {
                let delta = self.delta.ok_or(RecordError::MissingValue)?;
                Ok(MetricUpdate::Counter {
                    name: self.id,
                    delta,
                })
            }
        }
    }
}

/// A validated update ready to be applied to a repository.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Gauge { name: String, value: f64 },
    Counter { name: String, delta: i64 },
}

impl MetricUpdate {
    /// Parse the legacy `/update/{type}/{name}/{value}` path form.
    pub fn from_parts(kind: &str, name: &str, raw: &str) -> Result<Self, RecordError> {
        if name.is_empty() {
            return Err(RecordError::MissingName);
        }
        match kind.parse::<MetricKind>()? {
            MetricKind::Gauge => {
                // JSON has no encoding for NaN or infinities.
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| RecordError::BadValue(raw.to_string()))?;
                Ok(MetricUpdate::Gauge {
                    name: name.to_string(),
                    value,
                })
            }
            MetricKind::Counter => {
                let delta = raw
                    .parse::<i64>()
                    .map_err(|_| RecordError::BadValue(raw.to_string()))?;
                Ok(MetricUpdate::Counter {
                    name: name.to_string(),
                    delta,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricUpdate::Gauge { name, .. } | MetricUpdate::Counter { name, .. } => name,
        }
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Full repository state at a point in time.
///
/// Ordered maps keep the JSON encoding deterministic, so encoding the same
/// state twice yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }
}
