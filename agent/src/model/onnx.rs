//! ONNX Runtime backend. Input: [1, n] f32 feature vector, output: first value of the first output.
//! A missing model file leaves that model unloaded; scorers then run on heuristics.

use super::ScoringBackend;
use crate::error::ModelError;
use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Default)]
pub struct OnnxBackend {
    sessions: Mutex<HashMap<String, Session>>,
}

impl OnnxBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScoringBackend for OnnxBackend {
    fn load_model(&self, name: &str, path: &Path) -> Result<bool, ModelError> {
        if !path.exists() {
            warn!(model = name, path = %path.display(), "ONNX model not found; inference disabled");
            return Ok(false);
        }
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::Inference(format!("load {}: {e}", path.display())))?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), session);
        info!(model = name, path = %path.display(), "ONNX model loaded");
        Ok(true)
    }

    fn infer(&self, name: &str, inputs: &[f32]) -> Result<f32, ModelError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| ModelError::NotLoaded(name.to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelError::Inference("model declares no outputs".to_string()))?;

        let arr = Array2::from_shape_vec((1, inputs.len()), inputs.to_vec())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let tensor = Value::from_array(arr).map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let output = outputs
            .get(&output_name)
            .ok_or_else(|| ModelError::Inference(format!("missing output {output_name}")))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        data.first()
            .copied()
            .ok_or_else(|| ModelError::Inference("empty output tensor".to_string()))
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
