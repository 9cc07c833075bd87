//! Opaque accelerator call (§4.7, C7). The trait is the entire contract the
//! spec grants this collaborator; the `ort`-backed implementation is one
//! concrete backend behind it, matching the "minimal inference interface"
//! note in §1.

use ndarray::Array3;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open model at {path}: {source}")]
    Open { path: String, source: ort::Error },
}

#[derive(Debug, Error, Clone)]
pub enum InferError {
    #[error("encoder session not loaded")]
    NotLoaded,
    #[error("inference failed: {0}")]
    Backend(String),
    #[error("unexpected output rank: {0}")]
    BadOutputShape(String),
}

/// `[1, V, T_total]` logits as returned by the encoder, plus `T_task` so the
/// decoder knows where the acoustic slice begins (§4.8 step 1 preface).
pub struct EncoderOutput {
    pub logits: Array3<f32>,
    pub t_task: usize,
}

pub trait EncoderClient: Send {
    fn load(&mut self, model_path: &Path) -> Result<(), LoadError>;
    fn infer(&mut self, input: &Array3<f32>, t_task: usize) -> Result<EncoderOutput, InferError>;
}

pub struct OrtEncoderClient {
    session: Option<Session>,
}

impl Default for OrtEncoderClient {
    fn default() -> Self {
        Self { session: None }
    }
}

impl EncoderClient for OrtEncoderClient {
    fn load(&mut self, model_path: &Path) -> Result<(), LoadError> {
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|source| LoadError::Open { path: model_path.display().to_string(), source })?;
        self.session = Some(session);
        Ok(())
    }

    fn infer(&mut self, input: &Array3<f32>, t_task: usize) -> Result<EncoderOutput, InferError> {
        let session = self.session.as_mut().ok_or(InferError::NotLoaded)?;
        let tensor = Tensor::from_array(input.clone()).map_err(|e| InferError::Backend(e.to_string()))?;
        let outputs = session.run(ort::inputs!["input" => tensor]).map_err(|e| InferError::Backend(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferError::Backend(e.to_string()))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(InferError::BadOutputShape(format!("{dims:?}")));
        }
        let logits = Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec())
            .map_err(|e| InferError::BadOutputShape(e.to_string()))?;
        Ok(EncoderOutput { logits, t_task })
    }
}

/// Deterministic stand-in used by `selftest` and by unit tests for the
/// stages downstream of the encoder (§6 `selftest` subcommand).
pub struct MockEncoderClient {
    pub vocab_size: usize,
    pub fixed_ids: Vec<usize>,
}

impl EncoderClient for MockEncoderClient {
    fn load(&mut self, _model_path: &Path) -> Result<(), LoadError> {
        Ok(())
    }

    fn infer(&mut self, input: &Array3<f32>, t_task: usize) -> Result<EncoderOutput, InferError> {
        let t_audio = input.shape()[1].saturating_sub(t_task);
        let t = self.fixed_ids.len().max(t_audio).max(1);
        let mut logits = Array3::<f32>::from_elem((1, self.vocab_size, t), -10.0);
        for (i, &id) in self.fixed_ids.iter().enumerate().take(t) {
            logits[[0, id.min(self.vocab_size - 1), i]] = 10.0;
        }
        Ok(EncoderOutput { logits, t_task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_encoder_produces_requested_shape() {
        let mut encoder = MockEncoderClient { vocab_size: 32, fixed_ids: vec![5, 5, 6] };
        let input = Array3::<f32>::zeros((1, 10, 8));
        let out = encoder.infer(&input, 2).unwrap();
        assert_eq!(out.t_task, 2);
        assert_eq!(out.logits.shape()[0], 1);
        assert_eq!(out.logits.shape()[1], 32);
    }
}
