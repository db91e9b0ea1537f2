//! Shieldline agent: on-device threat assessment pipeline.
//!
//! Modular structure:
//! - [`detectors`] — Phishing, malware and behavior scorers
//! - [`engine`] — Verdict aggregation, latency statistics, dispatch queue
//! - [`explain`] — User-facing explanations of positive verdicts
//! - [`alerts`] — Alert lifecycle and listeners
//! - [`audit`] — Sealed (encrypted) alert trail
//! - [`model`] — Optional model backend (ONNX behind the `onnx` feature)
//! - [`risk`] — Threat types and the severity mapping
//! - [`logging`] — Structured JSON logging

pub mod alerts;
pub mod audit;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod explain;
pub mod logging;
pub mod model;
pub mod risk;
pub mod signal;

pub use alerts::{Alert, AlertListener, AlertManager};
pub use config::ShieldConfig;
pub use detectors::{BehaviorScorer, MalwareScorer, PhishingScorer, ScoreResult, Scorer};
pub use engine::{DispatchQueue, Dispatcher, ThreatEngine, Verdict};
pub use explain::{Explainer, Explanation, TemplateExplainer};
pub use logging::StructuredLogger;
pub use risk::{Severity, ThreatType};
pub use signal::{Action, ActionKind, Signal};
