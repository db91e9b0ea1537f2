//! Signal scorers: raw signal → [`ScoreResult`].
//!
//! - [`PhishingScorer`] — URL heuristics plus context keywords
//! - [`MalwareScorer`] — static pattern analysis of code samples
//! - [`BehaviorScorer`] — per-action risk plus patterns over an [`ActionWindow`]

mod behavior;
mod malware;
mod phishing;
mod window;

pub use behavior::BehaviorScorer;
pub use malware::MalwareScorer;
pub use phishing::{PhishingPatterns, PhishingScorer};
pub use window::ActionWindow;

use crate::error::ScoreError;
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A scorer over one kind of [`Signal`]. Handing it any other kind is a
/// caller fault reported as [`ScoreError::WrongSignal`].
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, signal: &Signal) -> Result<ScoreResult, ScoreError>;
}

impl Scorer for PhishingScorer {
    fn name(&self) -> &'static str {
        "phishing"
    }

    fn score(&self, signal: &Signal) -> Result<ScoreResult, ScoreError> {
        match signal {
            Signal::Url { url, context } => self.detect(url, context),
            other => Err(wrong_signal(self, other)),
        }
    }
}

impl Scorer for MalwareScorer {
    fn name(&self) -> &'static str {
        "malware"
    }

    fn score(&self, signal: &Signal) -> Result<ScoreResult, ScoreError> {
        match signal {
            Signal::Code { code, source_type } => self.detect(code, source_type),
            other => Err(wrong_signal(self, other)),
        }
    }
}

impl Scorer for BehaviorScorer {
    fn name(&self) -> &'static str {
        "behavior"
    }

    fn score(&self, signal: &Signal) -> Result<ScoreResult, ScoreError> {
        match signal {
            Signal::Action(action) => Ok(self.analyze(action)),
            other => Err(wrong_signal(self, other)),
        }
    }
}

fn wrong_signal(scorer: &dyn Scorer, signal: &Signal) -> ScoreError {
    ScoreError::WrongSignal {
        scorer: scorer.name(),
        signal: signal.tag(),
    }
}

/// Outcome of one scorer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub is_threat: bool,
    /// Always within [0, 1]
    pub confidence: f64,
    /// Human-readable, in fixed feature order
    pub reasons: Vec<String>,
    /// Per-feature breakdown
    pub features: BTreeMap<String, f64>,
    /// Stable hash of the scored input; for dedup and audit only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ScoreResult {
    /// Fail-closed result for input that cannot be scored.
    pub fn negative(reason: impl Into<String>) -> Self {
        Self {
            is_threat: false,
            confidence: 0.0,
            reasons: vec![reason.into()],
            features: BTreeMap::new(),
            fingerprint: None,
        }
    }
}

/// First 16 hex chars of SHA-256 over the input.
pub fn fingerprint(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Scores are kept at micro precision so threshold comparisons do not hinge on
/// the last bits of a float sum.
pub(crate) fn round_score(x: f64) -> f64 {
    ((x * 1e6).round() / 1e6).clamp(0.0, 1.0)
}

/// Arithmetic mean over the features that carry signal. All-zero input scores 0.
pub(crate) fn mean_of_active<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .filter(|v| **v > 0.0)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        round_score(sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint(b"https://example.com");
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint(b"https://example.com"));
        assert_ne!(a, fingerprint(b"https://example.org"));
    }

    #[test]
    fn scorers_reject_foreign_signals() {
        let behavior = BehaviorScorer::new(&Default::default());
        let err = behavior.score(&Signal::url("https://a.com", "")).unwrap_err();
        assert!(matches!(
            err,
            ScoreError::WrongSignal { scorer: "behavior", signal: "url" }
        ));
        let malware = MalwareScorer::new(&Default::default()).unwrap();
        assert!(malware.score(&Signal::Unknown).is_err());
        assert!(!malware.score(&Signal::code("1 + 1", "script")).unwrap().is_threat);
    }

    #[test]
    fn mean_ignores_silent_features() {
        assert_eq!(mean_of_active(&[0.0, 0.0]), 0.0);
        assert_eq!(mean_of_active(&[0.9, 0.0, 0.5, 0.0]), 0.7);
    }
}
