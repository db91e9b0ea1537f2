use super::stats::{EngineStatistics, StatsRecorder};
use super::verdict::Verdict;
use crate::alerts::AlertManager;
use crate::config::{ModelConfig, ShieldConfig};
use crate::detectors::{BehaviorScorer, MalwareScorer, PhishingScorer, ScoreResult};
use crate::error::{ConfigError, ModelError, ScoreError};
use crate::explain::{Explainer, Explanation, TemplateExplainer};
use crate::model::{ModelFeature, ScoringBackend};
use crate::risk::ThreatType;
use crate::signal::{Action, Signal};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Span};

pub const PHISHING_MODEL: &str = "phishing";
pub const MALWARE_MODEL: &str = "malware";

/// Routes signals to scorers and turns their results into verdicts.
///
/// Never returns a fault to the caller: scorer errors and panics become
/// negative verdicts with [`Verdict::error`] set.
pub struct ThreatEngine {
    phishing: PhishingScorer,
    malware: MalwareScorer,
    behavior: BehaviorScorer,
    explainer: Arc<dyn Explainer>,
    alerts: Option<Arc<AlertManager>>,
    stats: Mutex<StatsRecorder>,
    latency_budget: Duration,
    span: Span,
}

impl ThreatEngine {
    pub fn new(config: &ShieldConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let span = tracing::info_span!("engine");
        let engine = Self {
            phishing: PhishingScorer::new(&config.detection.phishing)?
                .with_span(tracing::info_span!(parent: &span, "phishing")),
            malware: MalwareScorer::new(&config.detection.malware)?
                .with_span(tracing::info_span!(parent: &span, "malware")),
            behavior: BehaviorScorer::new(&config.detection.behavior)
                .with_span(tracing::info_span!(parent: &span, "behavior")),
            explainer: Arc::new(TemplateExplainer::new(config.alerts.max_explanation_len)),
            alerts: None,
            stats: Mutex::new(StatsRecorder::new(config.engine.max_latency_samples)),
            latency_budget: Duration::from_millis(config.engine.latency_budget_ms),
            span,
        };
        info!(
            parent: &engine.span,
            phishing_threshold = engine.phishing.threshold(),
            malware_threshold = engine.malware.threshold(),
            behavior_threshold = engine.behavior.threshold(),
            "threat engine initialized"
        );
        Ok(engine)
    }

    /// Load the configured models into `backend` and let the URL and code
    /// scorers consult it.
    pub fn with_backend(
        mut self,
        backend: Arc<dyn ScoringBackend>,
        config: &ModelConfig,
    ) -> Result<Self, ModelError> {
        if let Some(path) = &config.phishing_model {
            if backend.load_model(PHISHING_MODEL, path)? {
                info!(parent: &self.span, path = %path.display(), "phishing model loaded");
            }
        }
        if let Some(path) = &config.malware_model {
            if backend.load_model(MALWARE_MODEL, path)? {
                info!(parent: &self.span, path = %path.display(), "malware model loaded");
            }
        }
        self.phishing = self
            .phishing
            .with_model(ModelFeature::new(backend.clone(), PHISHING_MODEL, config.strict));
        self.malware = self
            .malware
            .with_model(ModelFeature::new(backend, MALWARE_MODEL, config.strict));
        Ok(self)
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = explainer;
        self
    }

    /// Every positive verdict from now on also creates an alert.
    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn alerts(&self) -> Option<&Arc<AlertManager>> {
        self.alerts.as_ref()
    }

    pub fn detect_phishing(&self, url: &str, context: &str) -> Verdict {
        self.run(ThreatType::Phishing, || self.phishing.detect(url, context))
    }

    pub fn detect_malware(&self, code: &str, source_type: &str) -> Verdict {
        self.run(ThreatType::Malware, || self.malware.detect(code, source_type))
    }

    pub fn analyze_behavior(&self, action: &Action) -> Verdict {
        self.run(ThreatType::Behavioral, || Ok(self.behavior.analyze(action)))
    }

    pub fn unified_detect(&self, signal: &Signal) -> Verdict {
        match signal {
            Signal::Url { url, context } => self.detect_phishing(url, context),
            Signal::Code { code, source_type } => self.detect_malware(code, source_type),
            Signal::Action(action) => self.analyze_behavior(action),
            Signal::Unknown => self.run(ThreatType::Unknown, || {
                Ok(ScoreResult::negative("Unknown signal type"))
            }),
        }
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    /// Clears counters and latency samples. Alerts and the behavior window are untouched.
    pub fn reset_statistics(&self) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).reset();
        info!(parent: &self.span, "statistics reset");
    }

    pub fn behavior_window_len(&self) -> usize {
        self.behavior.window_len()
    }

    fn run<F>(&self, threat_type: ThreatType, score: F) -> Verdict
    where
        F: FnOnce() -> Result<ScoreResult, ScoreError>,
    {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(score));
        let latency = started.elapsed();

        let mut verdict = match outcome {
            Ok(Ok(result)) => Verdict::from_score(threat_type, result, latency),
            Ok(Err(e)) => {
                error!(parent: &self.span, threat = %threat_type, error = %e, "scorer failed");
                Verdict::failed(threat_type, e.to_string(), latency)
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(parent: &self.span, threat = %threat_type, error = %msg, "scorer panicked");
                Verdict::failed(threat_type, format!("scorer panicked: {msg}"), latency)
            }
        };

        if latency > self.latency_budget {
            warn!(
                parent: &self.span,
                threat = %threat_type,
                latency_ms = verdict.latency_ms,
                budget_ms = self.latency_budget.as_millis() as u64,
                "latency budget exceeded"
            );
        }

        self.stats.lock().unwrap_or_else(PoisonError::into_inner).record(
            threat_type,
            verdict.is_threat,
            verdict.is_error(),
            verdict.latency_ms,
        );

        if verdict.is_threat {
            verdict.explanation = Some(self.explain(&verdict));
            if let Some(alerts) = &self.alerts {
                if let Err(e) = alerts.create_alert(&verdict) {
                    warn!(parent: &self.span, error = %e, "alert not created");
                }
            }
            info!(
                parent: &self.span,
                threat = %threat_type,
                confidence = verdict.confidence,
                latency_ms = verdict.latency_ms,
                "threat detected"
            );
        }
        verdict
    }

    fn explain(&self, verdict: &Verdict) -> Explanation {
        let explainer = &self.explainer;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            explainer.explain(verdict.threat_type, verdict.confidence, &verdict.reasons)
        }));
        match outcome {
            Ok(Ok(explanation)) => explanation,
            Ok(Err(e)) => {
                warn!(parent: &self.span, error = %e, "explainer failed; generic explanation used");
                Explanation::generic(verdict.threat_type, verdict.confidence)
            }
            Err(payload) => {
                warn!(
                    parent: &self.span,
                    error = %panic_message(payload.as_ref()),
                    "explainer panicked; generic explanation used"
                );
                Explanation::generic(verdict.threat_type, verdict.confidence)
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExplainError;
    use crate::model::testing::FixedBackend;
    use crate::signal::ActionKind;

    fn engine() -> ThreatEngine {
        ThreatEngine::new(&ShieldConfig::default()).unwrap()
    }

    #[test]
    fn phishing_verdict_is_explained() {
        let e = engine();
        let v = e.detect_phishing("https://paypa1.com/login", "Please verify your account");
        assert!(v.is_threat);
        assert_eq!(v.threat_type, ThreatType::Phishing);
        let x = v.explanation.as_ref().unwrap();
        assert_eq!(x.threat_type, ThreatType::Phishing);
        assert!(v.latency_ms >= 0.0);
    }

    #[test]
    fn negative_verdict_has_no_explanation() {
        let v = engine().detect_phishing("https://www.google.com", "");
        assert!(!v.is_threat);
        assert!(v.explanation.is_none());
    }

    #[test]
    fn unknown_signal_is_negative() {
        let v = engine().unified_detect(&Signal::Unknown);
        assert_eq!(v.threat_type, ThreatType::Unknown);
        assert!(!v.is_threat);
        assert_eq!(v.reasons, vec!["Unknown signal type"]);
    }

    #[test]
    fn statistics_track_calls_and_reset() {
        let e = engine();
        e.detect_phishing("https://paypa1.com/login", "verify your account");
        e.detect_phishing("https://www.google.com", "");
        e.analyze_behavior(&Action::new(ActionKind::Network));
        let s = e.statistics();
        assert_eq!(s.total_threats, 1);
        assert_eq!(s.by_type.get(&ThreatType::Phishing), Some(&1));
        assert_eq!(s.latency.count, 3);
        assert!(s.latency.min_ms <= s.latency.avg_ms && s.latency.avg_ms <= s.latency.max_ms);

        e.reset_statistics();
        let s = e.statistics();
        assert_eq!(s.total_threats, 0);
        assert_eq!(s.latency.count, 0);
        assert_eq!(e.behavior_window_len(), 1);
    }

    #[test]
    fn strict_model_failure_becomes_error_verdict() {
        let config = ModelConfig {
            strict: true,
            ..ModelConfig::default()
        };
        let e = engine()
            .with_backend(Arc::new(FixedBackend(None)), &config)
            .unwrap();
        let v = e.detect_malware("eval(x)", "script");
        assert!(!v.is_threat);
        assert_eq!(v.reasons, vec![crate::engine::DETECTION_ERROR_REASON]);
        assert!(v.error.as_deref().unwrap().contains("exploded"));
        let s = e.statistics();
        assert_eq!(s.errors, 1);
        assert_eq!(s.latency.count, 1);
    }

    struct Broken;

    impl Explainer for Broken {
        fn explain(&self, _: ThreatType, _: f64, _: &[String]) -> Result<Explanation, ExplainError> {
            Err(ExplainError::Failed("offline".into()))
        }
    }

    #[test]
    fn explainer_failure_degrades_to_generic() {
        let e = engine().with_explainer(Arc::new(Broken));
        let v = e.detect_phishing("https://paypa1.com/login", "verify your account");
        assert!(v.is_threat);
        assert_eq!(
            v.explanation.unwrap().user_friendly,
            "A security concern was detected."
        );
    }
}
