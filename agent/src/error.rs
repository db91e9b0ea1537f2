//! Error kinds for every fallible operation in the pipeline.
//!
//! Faults are returned as data: scorers, the alert manager and the dispatch
//! queue hand back one of these instead of panicking across a boundary.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Internal scorer fault. Input validation problems are not errors: they
/// produce a negative score instead.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("{scorer} cannot score a {signal} signal")]
    WrongSignal {
        scorer: &'static str,
        signal: &'static str,
    },
    #[error("model backend failed: {0}")]
    Model(#[from] ModelError),
    #[error("feature extraction failed: {0}")]
    Extraction(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not loaded: {0}")]
    NotLoaded(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("explainer failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("verdict is not a threat")]
    NotAThreat,
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("alert {0} already dismissed")]
    AlreadyDismissed(Uuid),
    #[error("export failed: {0}")]
    Export(String),
}

#[derive(Debug, Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("audit cipher failure")]
    Cipher,
    #[error("sealed line too short")]
    Truncated,
}
