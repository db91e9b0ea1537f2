//! Alert lifecycle: creation from positive verdicts, dedup, dismissal, user
//! actions, listener fan-out, statistics and export.

mod export;
mod manager;

pub use export::ExportFormat;
pub use manager::{AlertListener, AlertManager, ListenerId};

use crate::explain::Explanation;
use crate::risk::{Severity, ThreatType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    pub action: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Time-ordered (UUIDv7); never reused
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub threat_type: ThreatType,
    pub confidence: f64,
    pub severity: Severity,
    pub message: String,
    /// Opaque verdict payload: reasons, features, latency
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    pub dismissed: bool,
    pub actions: Vec<UserAction>,
    /// Number of verdicts folded into this alert
    pub occurrences: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        !self.dismissed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub dismissed_alerts: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<ThreatType, usize>,
}
