use super::{fingerprint, round_score, ActionWindow, ScoreResult};
use crate::config::BehaviorConfig;
use crate::signal::{Action, ActionKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn, Span};

const ACTION_RISK: &str = "action_risk";
const PATTERN_RISK: &str = "pattern_risk";

const SUSPICIOUS_RISK: f64 = 0.8;
const BASELINE_RISK: f64 = 0.3;
const PATTERN_CAP: f64 = 0.8;
const PATTERN_MIN_HISTORY: usize = 3;
const RECENT: usize = 10;
const BURST_DELTAS: usize = 5;
const BURST_MS: i64 = 100;

const FILE_ACCESS: &[&str] = &["system_files", "registry_access", "credential_store"];
const NETWORK: &[&str] = &["unexpected_connection", "data_exfiltration", "c2_communication"];
const PROCESS: &[&str] = &["hidden_process", "privilege_escalation", "process_injection"];
const REGISTRY: &[&str] = &["dangerous_registry_edit", "startup_modification"];

fn suspicious_table() -> HashMap<ActionKind, &'static [&'static str]> {
    HashMap::from([
        (ActionKind::FileAccess, FILE_ACCESS),
        (ActionKind::Network, NETWORK),
        (ActionKind::Process, PROCESS),
        (ActionKind::Registry, REGISTRY),
    ])
}

/// Per-action risk combined with pattern risk over the recent history.
///
/// Every call appends to the owned history window, so analysis is serialized
/// through the window mutex. Two threads sharing one scorer see a consistent
/// append-then-score ordering.
pub struct BehaviorScorer {
    threshold: f64,
    suspicious: HashMap<ActionKind, &'static [&'static str]>,
    history: Mutex<ActionWindow>,
    span: Span,
}

impl BehaviorScorer {
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            threshold: config.anomaly_threshold,
            suspicious: suspicious_table(),
            history: Mutex::new(ActionWindow::new(config.window_size)),
            span: tracing::info_span!("behavior"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn analyze(&self, action: &Action) -> ScoreResult {
        let pattern_risk = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(action.clone());
            pattern_risk(&history)
        };
        let action_risk = self.action_risk(action);
        let confidence = round_score(0.6 * action_risk + 0.4 * pattern_risk);
        let is_threat = confidence >= self.threshold;

        if is_threat {
            warn!(
                parent: &self.span,
                kind = action.kind.as_str(),
                score = confidence,
                "behavioral anomaly"
            );
        } else {
            debug!(parent: &self.span, kind = action.kind.as_str(), score = confidence, "action scored");
        }

        let features = BTreeMap::from([
            (ACTION_RISK.to_string(), action_risk),
            (PATTERN_RISK.to_string(), pattern_risk),
        ]);

        ScoreResult {
            is_threat,
            confidence,
            reasons: reasons(action, action_risk, pattern_risk),
            features,
            fingerprint: Some(action_fingerprint(action)),
        }
    }

    pub fn window_len(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop all recorded actions.
    pub fn reset_history(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn action_risk(&self, action: &Action) -> f64 {
        let Some(patterns) = self.suspicious.get(&action.kind) else {
            return BASELINE_RISK;
        };
        let hit = action.details.values().any(|value| {
            let text = match value {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            patterns.iter().any(|p| text.contains(p))
        });
        if hit {
            SUSPICIOUS_RISK
        } else {
            BASELINE_RISK
        }
    }
}

fn pattern_risk(history: &ActionWindow) -> f64 {
    if history.len() < PATTERN_MIN_HISTORY {
        return 0.0;
    }
    let recent: Vec<&Action> = history.recent(RECENT).collect();
    let mut score = 0.0;

    // Privileged kinds dominating the recent window
    let privileged = recent
        .iter()
        .filter(|a| matches!(a.kind, ActionKind::Process | ActionKind::Registry))
        .count();
    if privileged * 2 > recent.len() {
        score += 0.4;
    }

    // Repetition of a single kind
    let mut per_kind: HashMap<ActionKind, usize> = HashMap::new();
    for a in &recent {
        *per_kind.entry(a.kind).or_default() += 1;
    }
    if per_kind.values().any(|n| *n > 7) {
        score += 0.3;
    }

    // Automation burst
    let deltas: Vec<i64> = recent
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds())
        .filter(|d| *d > 0)
        .collect();
    let tail = &deltas[deltas.len().saturating_sub(BURST_DELTAS)..];
    if !tail.is_empty() && tail.iter().all(|d| *d < BURST_MS) {
        score += 0.3;
    }

    round_score(f64::min(score, PATTERN_CAP))
}

fn reasons(action: &Action, action_risk: f64, pattern_risk: f64) -> Vec<String> {
    let mut out = Vec::new();
    if action_risk > 0.6 {
        out.push(format!("Suspicious {} action detected", action.kind.as_str()));
    }
    if pattern_risk > 0.5 {
        out.push("Unusual pattern in system actions".to_string());
    }
    if action.flag("elevated_privileges") {
        out.push("Action requires elevated privileges".to_string());
    }
    if action.flag("hidden") {
        out.push("Hidden/stealth activity detected".to_string());
    }
    if out.is_empty() {
        out.push("Action appears normal".to_string());
    }
    out
}

/// Kind and details only; the timestamp is left out so repeats of the same
/// action share a fingerprint.
fn action_fingerprint(action: &Action) -> String {
    let details = serde_json::to_string(&action.details).unwrap_or_default();
    fingerprint(format!("{}:{details}", action.kind.as_str()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn scorer(window: usize) -> BehaviorScorer {
        BehaviorScorer::new(&BehaviorConfig {
            anomaly_threshold: 0.8,
            window_size: window,
        })
    }

    fn registry_edit() -> Action {
        Action::new(ActionKind::Registry)
            .with_detail("key_path", "HKLM\\System\\dangerous_registry_edit")
            .with_detail("value", "payload")
    }

    #[test]
    fn single_suspicious_action_has_no_pattern_bonus() {
        let s = scorer(100);
        let r = s.analyze(&registry_edit());
        assert_eq!(r.features[ACTION_RISK], 0.8);
        assert_eq!(r.features[PATTERN_RISK], 0.0);
        assert!((r.confidence - 0.48).abs() < 1e-9);
        assert!(!r.is_threat);
        assert_eq!(r.reasons, vec!["Suspicious registry action detected"]);
    }

    #[test]
    fn privileged_actions_raise_pattern_risk() {
        let s = scorer(100);
        let start = Utc::now();
        let mut last = None;
        for i in 0..3 {
            let a = Action::new(ActionKind::Process)
                .with_detail("process_name", "svc.exe")
                .at(start + Duration::seconds(i));
            last = Some(s.analyze(&a));
        }
        let r = last.unwrap();
        assert!(r.features[PATTERN_RISK] >= 0.4);
    }

    #[test]
    fn burst_of_injections_is_anomalous() {
        let s = scorer(100);
        let start = Utc::now();
        let mut last = None;
        for i in 0..10 {
            let a = Action::new(ActionKind::Process)
                .with_detail("action", "process_injection")
                .with_detail("hidden", true)
                .at(start + Duration::milliseconds(i * 20));
            last = Some(s.analyze(&a));
        }
        let r = last.unwrap();
        // 0.4 + 0.3 + 0.3 capped at 0.8
        assert_eq!(r.features[PATTERN_RISK], 0.8);
        assert!((r.confidence - 0.8).abs() < 1e-9);
        assert!(r.is_threat);
        assert_eq!(
            r.reasons,
            vec![
                "Suspicious process action detected",
                "Unusual pattern in system actions",
                "Hidden/stealth activity detected",
            ]
        );
    }

    #[test]
    fn benign_actions_stay_at_baseline() {
        let s = scorer(100);
        let start = Utc::now();
        for (i, kind) in [ActionKind::FileAccess, ActionKind::Network, ActionKind::FileAccess]
            .into_iter()
            .enumerate()
        {
            let a = Action::new(kind)
                .with_detail("destination", "google.com")
                .at(start + Duration::seconds(i as i64 * 5));
            let r = s.analyze(&a);
            assert_eq!(r.features[ACTION_RISK], 0.3);
            assert_eq!(r.features[PATTERN_RISK], 0.0);
            assert_eq!(r.reasons, vec!["Action appears normal"]);
        }
    }

    #[test]
    fn non_string_details_are_matched_as_text() {
        let s = scorer(100);
        let a = Action::new(ActionKind::Network)
            .with_detail("tags", serde_json::json!(["c2_communication"]));
        assert_eq!(s.analyze(&a).features[ACTION_RISK], 0.8);
    }

    #[test]
    fn history_is_bounded_and_resettable() {
        let s = scorer(4);
        for _ in 0..9 {
            s.analyze(&registry_edit());
        }
        assert_eq!(s.window_len(), 4);
        s.reset_history();
        assert_eq!(s.window_len(), 0);
    }

    #[test]
    fn fingerprint_ignores_timestamp() {
        let a = registry_edit();
        let b = registry_edit().at(Utc::now() + Duration::hours(1));
        assert_eq!(action_fingerprint(&a), action_fingerprint(&b));
    }

    #[test]
    fn concurrent_analysis_keeps_window_consistent() {
        let s = std::sync::Arc::new(scorer(50));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = s.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        s.analyze(&registry_edit());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.window_len(), 50);
    }
}
