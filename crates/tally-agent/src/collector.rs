//! Collector: polls the sampler into a fixed-size rolling buffer.
//!
//! The buffer has one slot per poll in a report interval. Poll `n` writes
//! slot `n % report_step`, so only the latest `report_step` samples survive;
//! nothing queues up behind a slow or failing report.

use tally_core::{Metric, POLL_COUNT};
use tracing::debug;

use crate::sampler::Sampler;

/// One reading of the gauge set.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub gauges: Vec<(String, f64)>,
}

/// Fixed-capacity ring of samples indexed by poll number.
#[derive(Debug)]
pub struct SampleBuffer {
    slots: Box<[Option<Sample>]>,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store the sample taken at poll number `poll`, replacing whatever
    /// occupied that slot.
    pub fn store(&mut self, poll: u64, sample: Sample) {
        let slot = (poll % self.slots.len() as u64) as usize;
        self.slots[slot] = Some(sample);
    }

    /// Take all retained samples, oldest first. `next_poll` is the number
    /// of the poll that would be stored next.
    pub fn take(&mut self, next_poll: u64) -> Vec<Sample> {
        let len = self.slots.len() as u64;
        (0..len)
            .map(|i| ((next_poll + i) % len) as usize)
            .filter_map(|slot| self.slots[slot].take())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples drained for one report plus the poll counter delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub samples: Vec<Sample>,
    pub poll_delta: i64,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.poll_delta == 0
    }

    /// Wire records: every gauge of every sample, then the counter delta.
    pub fn records(&self) -> Vec<Metric> {
        let mut records: Vec<Metric> = self
            .samples
            .iter()
            .flat_map(|s| s.gauges.iter())
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .collect();
        records.push(Metric::counter(POLL_COUNT, self.poll_delta));
        records
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.records())
    }
}

/// Owns the sampler, the rolling buffer and the pending poll delta.
pub struct Collector {
    sampler: Box<dyn Sampler>,
    buffer: SampleBuffer,
    poll_count: u64,
    pending_polls: i64,
}

impl Collector {
    /// `report_step` is validated by the configuration; zero is treated as one.
    pub fn new(sampler: Box<dyn Sampler>, report_step: u64) -> Self {
        Self {
            sampler,
            buffer: SampleBuffer::new(report_step.max(1) as usize),
            poll_count: 0,
            pending_polls: 0,
        }
    }

    /// Take one sample and count the poll.
    pub fn poll(&mut self) {
        let sample = Sample {
            gauges: self.sampler.sample(),
        };
        self.buffer.store(self.poll_count, sample);
        self.poll_count += 1;
        self.pending_polls += 1;
        debug!(poll = self.poll_count, "metrics polled");
    }

    /// Total polls since start.
    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }

    pub fn report_step(&self) -> u64 {
        self.buffer.capacity() as u64
    }

    /// True when the last poll completed a report interval.
    pub fn report_due(&self) -> bool {
        self.poll_count > 0 && self.poll_count % self.report_step() == 0
    }

    /// Hand over the retained samples and reset the poll delta.
    pub fn drain(&mut self) -> Batch {
        let batch = Batch {
            samples: self.buffer.take(self.poll_count),
            poll_delta: self.pending_polls,
        };
        self.pending_polls = 0;
        batch
    }
}
