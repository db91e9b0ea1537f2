//! Optional model backend. Scorers work on heuristics alone; a loaded model
//! only contributes one more feature.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxBackend;

use crate::error::{ModelError, ScoreError};
use std::path::Path;
use std::sync::Arc;
use tracing::{warn, Span};

/// Pluggable inference provider. Implementations must be cheap to call from the
/// scoring path: no blocking I/O inside `infer`.
pub trait ScoringBackend: Send + Sync {
    /// Load a model under `name`. `Ok(false)` when the file is absent.
    fn load_model(&self, name: &str, path: &Path) -> Result<bool, ModelError>;

    /// Score one feature vector; output is clamped to [0, 1] by the caller.
    fn infer(&self, name: &str, inputs: &[f32]) -> Result<f32, ModelError>;

    fn is_loaded(&self, name: &str) -> bool;
}

/// A backend bound to one model name, as consulted by a scorer.
#[derive(Clone)]
pub struct ModelFeature {
    backend: Arc<dyn ScoringBackend>,
    model: String,
    strict: bool,
}

impl ModelFeature {
    pub fn new(backend: Arc<dyn ScoringBackend>, model: impl Into<String>, strict: bool) -> Self {
        Self {
            backend,
            model: model.into(),
            strict,
        }
    }

    /// `Ok(None)` when no model is loaded or inference failed in lenient mode.
    pub fn score(&self, inputs: &[f32], span: &Span) -> Result<Option<f64>, ScoreError> {
        if !self.backend.is_loaded(&self.model) {
            return Ok(None);
        }
        match self.backend.infer(&self.model, inputs) {
            Ok(v) if v.is_finite() => Ok(Some(f64::from(v).clamp(0.0, 1.0))),
            Ok(v) => {
                warn!(parent: span, model = %self.model, value = v, "non-finite model output ignored");
                Ok(None)
            }
            Err(e) if self.strict => Err(ScoreError::Model(e)),
            Err(e) => {
                warn!(parent: span, model = %self.model, error = %e, "model inference failed; heuristics only");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ModelFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFeature")
            .field("model", &self.model)
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Backend returning a fixed score, or failing every call.
    pub struct FixedBackend(pub Option<f32>);

    impl ScoringBackend for FixedBackend {
        fn load_model(&self, _name: &str, _path: &Path) -> Result<bool, ModelError> {
            Ok(true)
        }

        fn infer(&self, name: &str, _inputs: &[f32]) -> Result<f32, ModelError> {
            self.0.ok_or_else(|| ModelError::Inference(format!("{name} exploded")))
        }

        fn is_loaded(&self, _name: &str) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedBackend;
    use super::*;

    #[test]
    fn lenient_failure_falls_back() {
        let f = ModelFeature::new(Arc::new(FixedBackend(None)), "m", false);
        assert_eq!(f.score(&[0.0], &Span::none()).unwrap(), None);
    }

    #[test]
    fn strict_failure_is_a_fault() {
        let f = ModelFeature::new(Arc::new(FixedBackend(None)), "m", true);
        assert!(matches!(f.score(&[0.0], &Span::none()), Err(ScoreError::Model(_))));
    }

    #[test]
    fn output_is_clamped() {
        let f = ModelFeature::new(Arc::new(FixedBackend(Some(3.0))), "m", false);
        assert_eq!(f.score(&[0.0], &Span::none()).unwrap(), Some(1.0));
    }
}
