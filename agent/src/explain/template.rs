use super::{ActionItems, Explainer, Explanation};
use crate::error::ExplainError;
use crate::risk::{Severity, ThreatType};
use tracing::{debug, Span};

/// Fixed templates per threat type and severity band.
pub struct TemplateExplainer {
    max_len: usize,
    span: Span,
}

impl TemplateExplainer {
    pub fn new(max_len: usize) -> Self {
        Self {
            // room for at least the ellipsis
            max_len: max_len.max(4),
            span: tracing::info_span!("explainer"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn headline(threat_type: ThreatType, severity: Severity) -> &'static str {
        use Severity::*;
        match (threat_type, severity) {
            (ThreatType::Phishing, Critical | High) => {
                "This link appears to be a phishing attempt designed to steal your credentials. Avoid clicking."
            }
            (ThreatType::Phishing, Medium) => "This link may be suspicious. Verify the sender before clicking.",
            (ThreatType::Phishing, Low) => "This link seems unusual but may be safe. Use caution.",
            (ThreatType::Malware, Critical | High) => {
                "Malicious code detected. This could harm your system. Do not execute."
            }
            (ThreatType::Malware, Medium) => "Suspicious code detected. Please review before proceeding.",
            (ThreatType::Malware, Low) => "This code contains potentially suspicious patterns.",
            (ThreatType::Behavioral, Critical | High) => {
                "Suspicious activity detected on your system. Investigate immediately."
            }
            (ThreatType::Behavioral, Medium) => "Unusual system behavior detected. Monitor your system.",
            (ThreatType::Behavioral, Low) => "Minor unusual activity detected.",
            (ThreatType::Unknown, Critical | High) => "Unknown threat detected. Use caution.",
            (ThreatType::Unknown, Medium) => "Potential threat detected.",
            (ThreatType::Unknown, Low) => "Minor concern detected.",
        }
    }

    fn detailed(&self, threat_type: ThreatType, reasons: &[String]) -> String {
        let mut distinct: Vec<&str> = Vec::new();
        for r in reasons {
            if !distinct.contains(&r.as_str()) {
                distinct.push(r);
            }
        }
        let text = match distinct.as_slice() {
            [] => return "No details available.".to_string(),
            [only] => format!("This {threat_type} threat was detected because: {only}."),
            many => {
                let listed: Vec<&str> = many.iter().take(3).copied().collect();
                format!(
                    "This {threat_type} threat was detected because: \n• {}",
                    listed.join("\n• ")
                )
            }
        };
        truncate(text, self.max_len)
    }

    fn recommendations(threat_type: ThreatType, severity: Severity) -> Vec<String> {
        let base: &[&str] = match threat_type {
            ThreatType::Phishing => &[
                "Do not click the link",
                "Do not enter your credentials",
                "Report the sender",
                "Verify the official website separately",
            ],
            ThreatType::Malware => &[
                "Do not execute the code",
                "Run a full system scan",
                "Update your antivirus",
                "Be cautious with similar files",
            ],
            ThreatType::Behavioral => &[
                "Monitor your system activity",
                "Check running processes",
                "Review recent file modifications",
                "Consider system restore if suspicious",
            ],
            ThreatType::Unknown => &["Update security software"],
        };
        let mut recs: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        if severity == Severity::Critical {
            recs.push("Take immediate action".to_string());
        }
        recs
    }

    fn action_items(threat_type: ThreatType) -> ActionItems {
        let (immediate, next, long_term) = match threat_type {
            ThreatType::Phishing => (
                "Block this sender/URL",
                "Review similar messages",
                "Enable two-factor authentication",
            ),
            ThreatType::Malware => (
                "Quarantine/delete the file",
                "Run full system scan",
                "Keep software updated",
            ),
            ThreatType::Behavioral => (
                "Monitor the system",
                "Check system logs",
                "Improve security practices",
            ),
            ThreatType::Unknown => (
                "Take appropriate action",
                "Monitor the situation",
                "Improve security",
            ),
        };
        ActionItems {
            immediate: immediate.to_string(),
            next: next.to_string(),
            long_term: long_term.to_string(),
        }
    }
}

impl Default for TemplateExplainer {
    fn default() -> Self {
        Self::new(150)
    }
}

impl Explainer for TemplateExplainer {
    fn explain(
        &self,
        threat_type: ThreatType,
        confidence: f64,
        reasons: &[String],
    ) -> Result<Explanation, ExplainError> {
        if !confidence.is_finite() {
            return Err(ExplainError::Failed(format!("confidence {confidence} is not finite")));
        }
        let confidence = confidence.clamp(0.0, 1.0);
        let severity = Severity::from_confidence(confidence);
        debug!(parent: &self.span, threat = %threat_type, %severity, "explanation generated");
        Ok(Explanation {
            threat_type,
            severity,
            confidence,
            user_friendly: Self::headline(threat_type, severity).to_string(),
            detailed: self.detailed(threat_type, reasons),
            recommendations: Self::recommendations(threat_type, severity),
            action_items: Self::action_items(threat_type),
        })
    }
}

/// Char-boundary safe cut to `max_len` chars, ellipsis included.
fn truncate(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let mut cut: String = text.chars().take(max_len - 3).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasons(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn severity_follows_canonical_mapping() {
        let e = TemplateExplainer::default();
        for c in [0.1, 0.5, 0.7, 0.9] {
            let x = e.explain(ThreatType::Phishing, c, &[]).unwrap();
            assert_eq!(x.severity, Severity::from_confidence(c));
        }
    }

    #[test]
    fn critical_phishing_gets_strong_wording_and_urgency() {
        let x = TemplateExplainer::default()
            .explain(ThreatType::Phishing, 0.9, &reasons(&["Suspicious domain name"]))
            .unwrap();
        assert_eq!(x.severity, Severity::Critical);
        assert!(x.user_friendly.contains("Avoid clicking"));
        assert_eq!(
            x.detailed,
            "This phishing threat was detected because: Suspicious domain name."
        );
        assert_eq!(x.recommendations.last().unwrap(), "Take immediate action");
        assert_eq!(x.action_items.immediate, "Block this sender/URL");
    }

    #[test]
    fn detailed_lists_at_most_three_distinct_reasons() {
        let x = TemplateExplainer::new(1000)
            .explain(
                ThreatType::Malware,
                0.7,
                &reasons(&["a", "b", "a", "c", "d"]),
            )
            .unwrap();
        assert_eq!(x.detailed, "This malware threat was detected because: \n• a\n• b\n• c");
        assert!(!x.recommendations.contains(&"Take immediate action".to_string()));
    }

    #[test]
    fn detailed_is_truncated() {
        let long = "x".repeat(400);
        let x = TemplateExplainer::new(50)
            .explain(ThreatType::Behavioral, 0.8, &[long])
            .unwrap();
        assert_eq!(x.detailed.chars().count(), 50);
        assert!(x.detailed.ends_with("..."));
    }

    #[test]
    fn unknown_threat_uses_generic_advice() {
        let x = TemplateExplainer::default()
            .explain(ThreatType::Unknown, 0.5, &[])
            .unwrap();
        assert_eq!(x.user_friendly, "Potential threat detected.");
        assert_eq!(x.detailed, "No details available.");
        assert_eq!(x.recommendations, vec!["Update security software"]);
    }

    #[test]
    fn nan_confidence_is_an_error() {
        assert!(TemplateExplainer::default()
            .explain(ThreatType::Malware, f64::NAN, &[])
            .is_err());
    }
}
