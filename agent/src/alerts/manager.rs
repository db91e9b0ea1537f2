use super::export::{self, ExportFormat};
use super::{Alert, AlertStatistics, UserAction};
use crate::config::AlertConfig;
use crate::engine::{panic_message, Verdict};
use crate::error::{AlertError, ListenerError};
use crate::risk::Severity;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, info, Span};
use uuid::Uuid;

/// Notified synchronously, on the creating thread, for every new alert.
/// Slow work belongs on another thread.
pub trait AlertListener: Send + Sync {
    fn on_alert(&self, alert: &Alert) -> Result<(), ListenerError>;
}

impl<F> AlertListener for F
where
    F: Fn(&Alert) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_alert(&self, alert: &Alert) -> Result<(), ListenerError> {
        self(alert)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct AlertManager {
    alerts: Mutex<Vec<Alert>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn AlertListener>)>>,
    next_listener: AtomicU64,
    dedup_window: Duration,
    span: Span,
}

impl AlertManager {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            dedup_window: Duration::seconds(
                i64::try_from(config.dedup_window_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            span: tracing::info_span!("alerts"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Record a positive verdict. A verdict matching a live alert of the same
    /// type and fingerprint inside the dedup window bumps that alert instead;
    /// listeners only hear about new alerts.
    pub fn create_alert(&self, verdict: &Verdict) -> Result<Alert, AlertError> {
        if !verdict.is_threat {
            return Err(AlertError::NotAThreat);
        }
        let now = Utc::now();
        let alert = {
            let mut alerts = self.lock();
            if let Some(existing) = self.find_duplicate(&mut alerts, verdict, now) {
                existing.occurrences += 1;
                info!(
                    parent: &self.span,
                    alert_id = %existing.id,
                    occurrences = existing.occurrences,
                    "duplicate threat folded into alert"
                );
                return Ok(existing.clone());
            }
            let alert = Alert {
                id: Uuid::now_v7(),
                created_at: now,
                threat_type: verdict.threat_type,
                confidence: verdict.confidence,
                severity: Severity::from_confidence(verdict.confidence),
                message: verdict.threat_type.default_message().to_string(),
                details: json!({
                    "reasons": verdict.reasons,
                    "features": verdict.features,
                    "latency_ms": verdict.latency_ms,
                }),
                explanation: verdict.explanation.clone(),
                dismissed: false,
                actions: Vec::new(),
                occurrences: 1,
                fingerprint: verdict.fingerprint.clone(),
            };
            alerts.push(alert.clone());
            alert
        };
        info!(
            parent: &self.span,
            alert_id = %alert.id,
            threat = %alert.threat_type,
            severity = %alert.severity,
            confidence = alert.confidence,
            "alert created"
        );
        self.notify(&alert);
        Ok(alert)
    }

    fn find_duplicate<'a>(
        &self,
        alerts: &'a mut [Alert],
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Alert> {
        let fingerprint = verdict.fingerprint.as_ref()?;
        if self.dedup_window <= Duration::zero() {
            return None;
        }
        let since = now - self.dedup_window;
        alerts.iter_mut().rev().find(|a| {
            a.is_active()
                && a.threat_type == verdict.threat_type
                && a.fingerprint.as_ref() == Some(fingerprint)
                && a.created_at >= since
        })
    }

    /// Dismissing twice fails the second time and leaves the alert as it was.
    pub fn dismiss_alert(&self, id: Uuid, reason: &str) -> Result<(), AlertError> {
        let mut alerts = self.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlertError::NotFound(id))?;
        if alert.dismissed {
            return Err(AlertError::AlreadyDismissed(id));
        }
        alert.dismissed = true;
        if !reason.is_empty() {
            alert.actions.push(UserAction {
                action: format!("dismissed_reason: {reason}"),
                at: Utc::now(),
            });
        }
        info!(parent: &self.span, alert_id = %id, "alert dismissed");
        Ok(())
    }

    pub fn log_user_action(&self, id: Uuid, action: &str) -> Result<(), AlertError> {
        let mut alerts = self.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlertError::NotFound(id))?;
        alert.actions.push(UserAction {
            action: action.to_string(),
            at: Utc::now(),
        });
        info!(parent: &self.span, alert_id = %id, action, "user action logged");
        Ok(())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.lock().iter().filter(|a| a.is_active()).cloned().collect()
    }

    pub fn alert(&self, id: Uuid) -> Option<Alert> {
        self.lock().iter().find(|a| a.id == id).cloned()
    }

    pub fn all_alerts(&self) -> Vec<Alert> {
        self.lock().clone()
    }

    pub fn alert_statistics(&self) -> AlertStatistics {
        let alerts = self.lock();
        let mut stats = AlertStatistics {
            total_alerts: alerts.len(),
            ..AlertStatistics::default()
        };
        for a in alerts.iter() {
            if a.dismissed {
                stats.dismissed_alerts += 1;
            } else {
                stats.active_alerts += 1;
            }
            *stats.by_severity.entry(a.severity).or_default() += 1;
            *stats.by_type.entry(a.threat_type).or_default() += 1;
        }
        stats
    }

    pub fn export_alerts(&self, format: ExportFormat) -> Result<String, AlertError> {
        export::render(&self.lock(), format)
    }

    pub fn register_listener(&self, listener: impl AlertListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Retention sweep: remove alerts older than `days`.
    pub fn clear_alerts(&self, days: u32) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.clear_alerts_before(cutoff)
    }

    pub fn clear_alerts_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut alerts = self.lock();
        let before = alerts.len();
        alerts.retain(|a| a.created_at >= cutoff);
        let removed = before - alerts.len();
        info!(parent: &self.span, removed, "old alerts cleared");
        removed
    }

    fn notify(&self, alert: &Alert) {
        let listeners: Vec<(ListenerId, Arc<dyn AlertListener>)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_alert(alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(parent: &self.span, listener = id.0, alert_id = %alert.id, error = %e, "alert listener failed")
                }
                Err(payload) => error!(
                    parent: &self.span,
                    listener = id.0,
                    alert_id = %alert.id,
                    error = %panic_message(payload.as_ref()),
                    "alert listener panicked"
                ),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::ThreatType;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn verdict(threat_type: ThreatType, confidence: f64, fingerprint: Option<&str>) -> Verdict {
        Verdict {
            threat_type,
            is_threat: true,
            confidence,
            reasons: vec!["test".into()],
            features: BTreeMap::new(),
            fingerprint: fingerprint.map(str::to_string),
            latency_ms: 1.0,
            explanation: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn manager() -> AlertManager {
        AlertManager::new(&AlertConfig::default())
    }

    #[test]
    fn negative_verdict_is_rejected() {
        let mut v = verdict(ThreatType::Phishing, 0.9, None);
        v.is_threat = false;
        assert_eq!(manager().create_alert(&v), Err(AlertError::NotAThreat));
    }

    #[test]
    fn alert_fields_follow_verdict() {
        let m = manager();
        let a = m.create_alert(&verdict(ThreatType::Malware, 0.78, Some("ab"))).unwrap();
        assert_eq!(a.severity, Severity::High);
        assert_eq!(a.message, "Malicious script detected");
        assert_eq!(a.details["reasons"][0], "test");
        assert_eq!(a.occurrences, 1);
        assert_eq!(m.alert(a.id), Some(a));
    }

    #[test]
    fn ids_are_unique() {
        let m = manager();
        let mut ids: Vec<Uuid> = (0..50)
            .map(|_| m.create_alert(&verdict(ThreatType::Unknown, 0.5, None)).unwrap().id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn dismiss_twice_fails_without_change() {
        let m = manager();
        let a = m.create_alert(&verdict(ThreatType::Phishing, 0.9, None)).unwrap();
        m.dismiss_alert(a.id, "confirmed safe").unwrap();
        let after_first = m.alert(a.id).unwrap();
        assert_eq!(m.dismiss_alert(a.id, "again"), Err(AlertError::AlreadyDismissed(a.id)));
        assert_eq!(m.alert(a.id).unwrap(), after_first);
        assert!(m.active_alerts().is_empty());
        assert_eq!(after_first.actions[0].action, "dismissed_reason: confirmed safe");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let id = Uuid::now_v7();
        assert_eq!(manager().log_user_action(id, "open"), Err(AlertError::NotFound(id)));
        assert_eq!(manager().dismiss_alert(id, ""), Err(AlertError::NotFound(id)));
    }

    #[test]
    fn statistics_sum_to_total() {
        let m = manager();
        let cases = [
            (ThreatType::Phishing, 0.92),
            (ThreatType::Malware, 0.78),
            (ThreatType::Behavioral, 0.5),
            (ThreatType::Phishing, 0.3),
            (ThreatType::Unknown, 0.66),
        ];
        let ids: Vec<Uuid> = cases
            .iter()
            .map(|(t, c)| m.create_alert(&verdict(*t, *c, None)).unwrap().id)
            .collect();
        m.dismiss_alert(ids[1], "").unwrap();
        let s = m.alert_statistics();
        assert_eq!(s.total_alerts, 5);
        assert_eq!(s.active_alerts + s.dismissed_alerts, 5);
        assert_eq!(s.dismissed_alerts, 1);
        assert_eq!(s.by_severity.values().sum::<usize>(), 5);
        assert_eq!(s.by_type.values().sum::<usize>(), 5);
        assert_eq!(s.by_type[&ThreatType::Phishing], 2);
    }

    #[test]
    fn duplicates_fold_into_one_alert() {
        let m = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        m.register_listener(move |_: &Alert| -> Result<(), ListenerError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let v = verdict(ThreatType::Phishing, 0.9, Some("f00d"));
        let first = m.create_alert(&v).unwrap();
        let second = m.create_alert(&v).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.occurrences, 2);
        assert_eq!(m.all_alerts().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        m.dismiss_alert(first.id, "").unwrap();
        let third = m.create_alert(&v).unwrap();
        assert_ne!(third.id, first.id);
    }

    #[test]
    fn failing_listeners_are_isolated() {
        let m = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        m.register_listener(|_: &Alert| -> Result<(), ListenerError> { panic!("listener bug") });
        m.register_listener(|_: &Alert| -> Result<(), ListenerError> {
            Err(ListenerError("disk full".into()))
        });
        let seen = calls.clone();
        let id = m.register_listener(move |_: &Alert| -> Result<(), ListenerError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(m.create_alert(&verdict(ThreatType::Malware, 0.9, None)).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(m.unregister_listener(id));
        assert!(!m.unregister_listener(id));
        m.create_alert(&verdict(ThreatType::Malware, 0.9, None)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retention_sweep_removes_only_old_alerts() {
        let m = manager();
        m.create_alert(&verdict(ThreatType::Phishing, 0.9, None)).unwrap();
        assert_eq!(m.clear_alerts(30), 0);
        assert_eq!(m.clear_alerts_before(Utc::now() + Duration::seconds(1)), 1);
        assert!(m.all_alerts().is_empty());
    }
}
