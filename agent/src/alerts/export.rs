use super::Alert;
use crate::error::AlertError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// Unrecognized names fall back to JSON.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }
}

pub(super) fn render(alerts: &[Alert], format: ExportFormat) -> Result<String, AlertError> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(alerts).map_err(|e| AlertError::Export(e.to_string()))
        }
        ExportFormat::Csv => Ok(csv(alerts)),
    }
}

fn csv(alerts: &[Alert]) -> String {
    let mut lines = vec!["id,type,severity,confidence,timestamp,dismissed".to_string()];
    lines.extend(alerts.iter().map(|a| {
        format!(
            "{},{},{},{:.2},{},{}",
            a.id,
            a.threat_type,
            a.severity,
            a.confidence,
            a.created_at.to_rfc3339(),
            a.dismissed
        )
    }));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::alerts::AlertManager;
    use crate::engine::Verdict;
    use crate::risk::ThreatType;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn populated() -> AlertManager {
        let m = AlertManager::new(&AlertConfig::default());
        for (t, c) in [(ThreatType::Phishing, 0.92), (ThreatType::Malware, 0.78)] {
            m.create_alert(&Verdict {
                threat_type: t,
                is_threat: true,
                confidence: c,
                reasons: vec!["r".into()],
                features: BTreeMap::new(),
                fingerprint: None,
                latency_ms: 0.5,
                explanation: None,
                error: None,
                timestamp: Utc::now(),
            })
            .unwrap();
        }
        m
    }

    #[test]
    fn csv_has_header_and_one_row_per_alert() {
        let out = populated().export_alerts(ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "id,type,severity,confidence,timestamp,dismissed");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(",phishing,critical,0.92,"));
        assert!(lines[2].ends_with(",false"));
    }

    #[test]
    fn json_round_trips_alerts() {
        let m = populated();
        let out = m.export_alerts(ExportFormat::Json).unwrap();
        let parsed: Vec<Alert> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, m.all_alerts());
    }

    #[test]
    fn unknown_format_name_means_json() {
        assert_eq!(ExportFormat::from_name("xml"), ExportFormat::Json);
        assert_eq!(ExportFormat::from_name(" CSV "), ExportFormat::Csv);
    }
}
