//! JSON log lines: one JSON object per line (ndjson) for ingestion and audit.

use crate::alerts::Alert;
use serde::Serialize;
use std::io::{self, Write};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Flat alert record for downstream log ingestion.
#[derive(Serialize)]
pub struct AlertLine<'a> {
    pub ts: String,
    pub level: &'a str,
    pub message: &'a str,
    pub alert_id: String,
    pub threat_type: &'a str,
    pub severity: &'a str,
    pub confidence: f64,
    pub occurrences: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<&'a str>,
}

impl<'a> AlertLine<'a> {
    pub fn from_alert(alert: &'a Alert) -> Self {
        Self {
            ts: alert.created_at.to_rfc3339(),
            level: "alert",
            message: &alert.message,
            alert_id: alert.id.to_string(),
            threat_type: alert.threat_type.as_str(),
            severity: alert.severity.as_str(),
            confidence: alert.confidence,
            occurrences: alert.occurrences,
            fingerprint: alert.fingerprint.as_deref(),
            advice: alert.explanation.as_ref().map(|e| e.user_friendly.as_str()),
        }
    }
}

/// Process-wide tracing setup plus a direct ndjson writer for records that
/// must not depend on the log level (alerts, the run summary).
pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber on stderr; stdout belongs to alert lines.
    /// `RUST_LOG` wins over `default_level`. JSON lines carry the component span
    /// (`engine`, `alerts`, `dispatch`, ...) that emitted them.
    pub fn init(json: bool, default_level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry
                .with(layer.json().with_current_span(true).with_span_list(false))
                .init();
        } else {
            registry.with(layer.with_target(false)).init();
        }
    }

    /// Write `record` as one JSON object followed by a newline.
    pub fn emit_json(record: &impl Serialize, w: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, record)?;
        w.write_all(b"\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertManager;
    use crate::config::AlertConfig;
    use crate::engine::Verdict;
    use crate::risk::ThreatType;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn alert_line_is_one_json_object() {
        let manager = AlertManager::new(&AlertConfig::default());
        let alert = manager
            .create_alert(&Verdict {
                threat_type: ThreatType::Behavioral,
                is_threat: true,
                confidence: 0.8,
                reasons: vec![],
                features: BTreeMap::new(),
                fingerprint: None,
                latency_ms: 0.1,
                explanation: None,
                error: None,
                timestamp: Utc::now(),
            })
            .unwrap();
        let mut out = Vec::new();
        StructuredLogger::emit_json(&AlertLine::from_alert(&alert), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(v["threat_type"], "behavioral");
        assert_eq!(v["severity"], "high");
        assert!(v.get("fingerprint").is_none());
    }
}
