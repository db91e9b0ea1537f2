//! Severity is a pure function of confidence. Alerts and explanations both use
//! [`Severity::from_confidence`]; there is no second mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const CRITICAL_THRESHOLD: f64 = 0.85;
pub const HIGH_THRESHOLD: f64 = 0.65;
pub const MEDIUM_THRESHOLD: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= CRITICAL_THRESHOLD {
            Severity::Critical
        } else if confidence >= HIGH_THRESHOLD {
            Severity::High
        } else if confidence >= MEDIUM_THRESHOLD {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    Phishing,
    Malware,
    Behavioral,
    Unknown,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Phishing => "phishing",
            ThreatType::Malware => "malware",
            ThreatType::Behavioral => "behavioral",
            ThreatType::Unknown => "unknown",
        }
    }

    /// Headline used for alerts created from this kind of threat
    pub fn default_message(&self) -> &'static str {
        match self {
            ThreatType::Phishing => "Suspicious phishing link detected",
            ThreatType::Malware => "Malicious script detected",
            ThreatType::Behavioral => "Suspicious system activity detected",
            ThreatType::Unknown => "Security threat detected",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
