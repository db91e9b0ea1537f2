//! Pipeline configuration. Every section has defaults so a missing file runs the agent as shipped.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Scorer thresholds and pattern sources
    pub detection: DetectionConfig,
    /// Aggregator and dispatch queue
    pub engine: EngineConfig,
    /// Alert lifecycle
    pub alerts: AlertConfig,
    /// Optional model backend
    pub model: ModelConfig,
    /// Sealed audit trail
    pub audit: AuditConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub phishing: PhishingConfig,
    pub malware: MalwareConfig,
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhishingConfig {
    /// Score at or above this is phishing (0.0–1.0)
    pub confidence_threshold: f64,
    /// JSON pattern database; built-in patterns when unset or missing
    pub patterns_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MalwareConfig {
    pub confidence_threshold: f64,
    /// Samples above this size are not analyzed
    pub max_sample_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub anomaly_threshold: f64,
    /// Capacity of the action history window
    pub window_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Route unified detection through the background queue
    pub async_dispatch: bool,
    /// How long shutdown waits for the in-flight signal
    pub shutdown_grace_ms: u64,
    /// Per-signal latency above this is logged
    pub latency_budget_ms: u64,
    /// Latency samples kept for statistics
    pub max_latency_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Identical threats within this window fold into one alert
    pub dedup_window_secs: u64,
    /// Retention sweep cutoff used by the binary
    pub retention_days: u32,
    pub max_explanation_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub phishing_model: Option<PathBuf>,
    pub malware_model: Option<PathBuf>,
    /// Treat inference failures as scorer faults instead of falling back to heuristics
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// Environment variable holding the sealing secret
    pub secret_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for PhishingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            patterns_path: None,
        }
    }
}

impl Default for MalwareConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            max_sample_bytes: 1024 * 1024,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 0.8,
            window_size: 100,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            async_dispatch: true,
            shutdown_grace_ms: 2000,
            latency_budget_ms: 500,
            max_latency_samples: 1000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 60,
            retention_days: 30,
            max_explanation_len: 150,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("alerts.audit"),
            secret_env: "SHIELDLINE_AUDIT_SECRET".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl ShieldConfig {
    /// Load from a JSON file. A missing file yields defaults; an unreadable or
    /// malformed one is a startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("detection.phishing.confidence_threshold", self.detection.phishing.confidence_threshold),
            ("detection.malware.confidence_threshold", self.detection.malware.confidence_threshold),
            ("detection.behavior.anomaly_threshold", self.detection.behavior.anomaly_threshold),
        ];
        for (field, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.detection.behavior.window_size == 0 {
            return Err(ConfigError::Invalid {
                field: "detection.behavior.window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.engine.max_latency_samples == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.max_latency_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"detection":{"behavior":{"window_size":8}}}"#).unwrap();
        let c = ShieldConfig::load(&path).unwrap();
        assert_eq!(c.detection.behavior.window_size, 8);
        assert_eq!(c.detection.behavior.anomaly_threshold, 0.8);
        assert_eq!(c.detection.phishing.confidence_threshold, 0.7);
        assert!(c.engine.async_dispatch);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut c = ShieldConfig::default();
        c.detection.malware.confidence_threshold = 1.5;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { field: "detection.malware.confidence_threshold", .. })
        ));
    }

    #[test]
    fn zero_window_rejected() {
        let mut c = ShieldConfig::default();
        c.detection.behavior.window_size = 0;
        assert!(c.validate().is_err());
    }
}
