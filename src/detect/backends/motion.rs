use anyhow::{anyhow, Result};

use crate::detect::classifier::Classifier;
use crate::detect::result::{ClassificationResult, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::NormalizedFrame;

/// Mean per-sample change that maps to full confidence at the default gain.
const DEFAULT_GAIN: f32 = 8.0;

/// CPU classifier driven by frame differencing.
///
/// Scores a window by the mean absolute difference between consecutive
/// frames and reports it as the probability of the `Violence` class. Never
/// predicts `Weaponized`. Keeps no state between windows, so one instance can
/// serve every camera.
pub struct MotionClassifier {
    gain: f32,
    threshold: f32,
}

impl MotionClassifier {
    pub fn new() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Scale applied to the mean difference before clamping to [0, 1].
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Override the alert threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for MotionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_abs_diff(a: &NormalizedFrame, b: &NormalizedFrame) -> Result<f32> {
    if a.data().len() != b.data().len() {
        return Err(anyhow!(
            "window frames differ in size ({} vs {} samples)",
            a.data().len(),
            b.data().len()
        ));
    }
    if a.data().is_empty() {
        return Ok(0.0);
    }
    let total: f32 = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs())
        .sum();
    Ok(total / a.data().len() as f32)
}

impl Classifier for MotionClassifier {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn classify(&mut self, window: &[NormalizedFrame]) -> Result<ClassificationResult> {
        if window.is_empty() {
            return Err(anyhow!("motion classifier received an empty window"));
        }
        let diffs = window
            .windows(2)
            .map(|pair| mean_abs_diff(&pair[0], &pair[1]))
            .collect::<Result<Vec<f32>>>()?;

        let activity = if diffs.is_empty() {
            0.0
        } else {
            diffs.iter().sum::<f32>() / diffs.len() as f32
        };
        let p = (activity * self.gain).clamp(0.0, 1.0);
        ClassificationResult::from_probabilities(&[1.0 - p, p, 0.0], self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ClassLabel;
    use crate::frame::{normalize, Frame};

    fn frame(value: u8) -> NormalizedFrame {
        normalize(&Frame::solid(4, 4, [value, value, value]), 4).unwrap()
    }

    #[test]
    fn static_scene_is_background() -> Result<()> {
        let mut classifier = MotionClassifier::new();
        let window = vec![frame(100); 4];

        let verdict = classifier.classify(&window)?;
        assert_eq!(verdict.label, ClassLabel::NoViolence);
        assert!(!verdict.is_alert);
        Ok(())
    }

    #[test]
    fn flicker_raises_alert() -> Result<()> {
        let mut classifier = MotionClassifier::new();
        let window = vec![frame(0), frame(255), frame(0), frame(255)];

        let verdict = classifier.classify(&window)?;
        assert_eq!(verdict.label, ClassLabel::Violence);
        assert!(verdict.is_alert);
        assert!(!verdict.is_critical);
        Ok(())
    }

    #[test]
    fn windows_are_scored_independently() -> Result<()> {
        let mut classifier = MotionClassifier::new();
        classifier.classify(&[frame(0), frame(0)])?;

        let verdict = classifier.classify(&[frame(255), frame(255)])?;
        assert!(!verdict.is_alert);
        assert!(classifier.classify(&[]).is_err());
        Ok(())
    }
}
