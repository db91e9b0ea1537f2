//! Aggregation of scorer output into verdicts, with latency statistics and an
//! optional background dispatch queue.

mod aggregator;
mod dispatch;
mod stats;
mod verdict;

pub use aggregator::{ThreatEngine, MALWARE_MODEL, PHISHING_MODEL};
pub use dispatch::{DispatchQueue, DispatchReport, Dispatcher};
pub use stats::{EngineStatistics, LatencyStats, LatencySummary};
pub use verdict::{Verdict, DETECTION_ERROR_REASON};

pub(crate) use aggregator::panic_message;
