//! Input signals: one unit of work for the detection pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tagged signal. Immutable once built; scorers only borrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Url {
        url: String,
        #[serde(default)]
        context: String,
    },
    Code {
        code: String,
        #[serde(default = "default_source_type")]
        source_type: String,
    },
    Action(Action),
    /// Any tag the pipeline does not know how to score
    #[serde(other)]
    Unknown,
}

fn default_source_type() -> String {
    "script".to_string()
}

impl Signal {
    pub fn url(url: impl Into<String>, context: impl Into<String>) -> Self {
        Signal::Url {
            url: url.into(),
            context: context.into(),
        }
    }

    pub fn code(code: impl Into<String>, source_type: impl Into<String>) -> Self {
        Signal::Code {
            code: code.into(),
            source_type: source_type.into(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Signal::Url { .. } => "url",
            Signal::Code { .. } => "code",
            Signal::Action(_) => "action",
            Signal::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FileAccess,
    Network,
    Process,
    Registry,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FileAccess => "file_access",
            ActionKind::Network => "network",
            ActionKind::Process => "process",
            ActionKind::Registry => "registry",
        }
    }
}

/// A single observed system action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Detail flag in the loose sense: `true`, a non-zero number or a non-empty string.
    pub fn flag(&self, key: &str) -> bool {
        match self.details.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Null) | None => false,
        }
    }
}
