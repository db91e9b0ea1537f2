//! Threat classification and the canonical confidence → severity mapping.

mod severity;

pub use severity::{Severity, ThreatType};
