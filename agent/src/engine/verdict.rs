use crate::detectors::ScoreResult;
use crate::explain::Explanation;
use crate::risk::ThreatType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Reason carried by every verdict whose scorer faulted.
pub const DETECTION_ERROR_REASON: &str = "Error in detection";

/// Engine output for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub threat_type: ThreatType,
    pub is_threat: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub features: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Wall-clock duration of the scoring call
    pub latency_ms: f64,
    /// Present only on positive verdicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    /// Scorer fault text; the verdict is then negative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Verdict {
    pub fn from_score(threat_type: ThreatType, result: ScoreResult, latency: Duration) -> Self {
        Self {
            threat_type,
            is_threat: result.is_threat,
            confidence: result.confidence.clamp(0.0, 1.0),
            reasons: result.reasons,
            features: result.features,
            fingerprint: result.fingerprint,
            latency_ms: as_millis(latency),
            explanation: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(threat_type: ThreatType, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            threat_type,
            is_threat: false,
            confidence: 0.0,
            reasons: vec![DETECTION_ERROR_REASON.to_string()],
            features: BTreeMap::new(),
            fingerprint: None,
            latency_ms: as_millis(latency),
            explanation: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_secs_f64(self.latency_ms.max(0.0) / 1000.0)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
