//! Turning a positive verdict into text a user can act on.
//!
//! The engine only depends on the [`Explainer`] contract. [`TemplateExplainer`]
//! is the built-in implementation; callers can inject their own.

mod template;

pub use template::TemplateExplainer;

use crate::error::ExplainError;
use crate::risk::{Severity, ThreatType};
use serde::{Deserialize, Serialize};

pub trait Explainer: Send + Sync {
    fn explain(
        &self,
        threat_type: ThreatType,
        confidence: f64,
        reasons: &[String],
    ) -> Result<Explanation, ExplainError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItems {
    pub immediate: String,
    pub next: String,
    pub long_term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub confidence: f64,
    pub user_friendly: String,
    pub detailed: String,
    pub recommendations: Vec<String>,
    pub action_items: ActionItems,
}

impl Explanation {
    /// Fallback used when an explainer fails; never blocks a verdict.
    pub fn generic(threat_type: ThreatType, confidence: f64) -> Self {
        Self {
            threat_type,
            severity: Severity::from_confidence(confidence),
            confidence,
            user_friendly: "A security concern was detected.".to_string(),
            detailed: "Unable to generate detailed explanation.".to_string(),
            recommendations: vec!["Review security settings".to_string()],
            action_items: ActionItems {
                immediate: "Take appropriate action".to_string(),
                next: "Monitor the situation".to_string(),
                long_term: "Improve security".to_string(),
            },
        }
    }
}
