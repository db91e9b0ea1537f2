//! Detection counters and latency samples. Aggregates are derived on read.

use crate::risk::ThreatType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Bounded sequence of latency samples in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    cap: usize,
    samples: VecDeque<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, ms: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    /// Recomputed from the raw samples on every call; all zero when empty.
    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let sum: f64 = self.samples.iter().sum();
        let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        LatencySummary {
            count: self.samples.len(),
            avg_ms: sum / self.samples.len() as f64,
            min_ms: min,
            max_ms: max,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Snapshot returned by `ThreatEngine::statistics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_threats: u64,
    pub by_type: BTreeMap<ThreatType, u64>,
    pub errors: u64,
    pub latency: LatencySummary,
}

#[derive(Debug)]
pub(crate) struct StatsRecorder {
    total_threats: u64,
    by_type: BTreeMap<ThreatType, u64>,
    errors: u64,
    latency: LatencyStats,
}

impl StatsRecorder {
    pub(crate) fn new(max_samples: usize) -> Self {
        Self {
            total_threats: 0,
            by_type: BTreeMap::new(),
            errors: 0,
            latency: LatencyStats::new(max_samples),
        }
    }

    pub(crate) fn record(&mut self, threat_type: ThreatType, is_threat: bool, is_error: bool, latency_ms: f64) {
        self.latency.record(latency_ms);
        if is_error {
            self.errors += 1;
        }
        if is_threat {
            self.total_threats += 1;
            *self.by_type.entry(threat_type).or_default() += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> EngineStatistics {
        EngineStatistics {
            total_threats: self.total_threats,
            by_type: self.by_type.clone(),
            errors: self.errors,
            latency: self.latency.summary(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.total_threats = 0;
        self.by_type.clear();
        self.errors = 0;
        self.latency.clear();
    }
}
