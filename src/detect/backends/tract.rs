#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::classifier::Classifier;
use crate::detect::result::{ClassificationResult, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::NormalizedFrame;

/// Tract-based classifier for ONNX video models.
///
/// Input: `[1, window, 3, size, size]` f32 in [0, 1]. Output: three logits in
/// class order; softmax turns them into probabilities.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    window: usize,
    size: usize,
    confidence_threshold: f32,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, window: usize, size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, window, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            window,
            size,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frames: &[NormalizedFrame]) -> Result<Tensor> {
        if frames.len() != self.window {
            return Err(anyhow!(
                "window has {} frames, model expects {}",
                frames.len(),
                self.window
            ));
        }
        if let Some(bad) = frames.iter().find(|f| f.size() as usize != self.size) {
            return Err(anyhow!(
                "frame size {} does not match model input {}",
                bad.size(),
                self.size
            ));
        }

        let plane = self.size * self.size;
        let size = self.size;
        let input = tract_ndarray::Array5::from_shape_fn(
            (1, self.window, 3, size, size),
            |(_, t, c, y, x)| frames[t].data()[c * plane + y * size + x],
        );
        Ok(input.into_tensor())
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, window: &[NormalizedFrame]) -> Result<ClassificationResult> {
        let input = self.build_input(window)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let logits: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        ClassificationResult::from_probabilities(&softmax(&logits), self.confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }
}
