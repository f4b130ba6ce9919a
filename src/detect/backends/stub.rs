use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::classifier::Classifier;
use crate::detect::result::{ClassLabel, ClassificationResult, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::NormalizedFrame;

/// One scripted answer.
#[derive(Clone, Debug)]
pub enum StubVerdict {
    Result(ClassificationResult),
    Fail,
}

/// Stub classifier for tests and demos.
///
/// Answers from a script first, then falls back to a constant verdict.
pub struct StubClassifier {
    script: VecDeque<StubVerdict>,
    fallback: ClassificationResult,
    calls: usize,
    window_lengths: Vec<usize>,
}

impl StubClassifier {
    /// Always answer with `label` at `confidence`.
    pub fn constant(label: ClassLabel, confidence: f32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: verdict(label, confidence),
            calls: 0,
            window_lengths: Vec::new(),
        }
    }

    /// Answer from `script` in order, then with a non-alert verdict.
    pub fn scripted(script: impl IntoIterator<Item = StubVerdict>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: verdict(ClassLabel::NoViolence, 0.9),
            calls: 0,
            window_lengths: Vec::new(),
        }
    }

    /// Scripted verdict helper.
    pub fn answer(label: ClassLabel, confidence: f32) -> StubVerdict {
        StubVerdict::Result(verdict(label, confidence))
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Length of every window seen so far.
    pub fn window_lengths(&self) -> &[usize] {
        &self.window_lengths
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::constant(ClassLabel::NoViolence, 0.9)
    }
}

fn verdict(label: ClassLabel, confidence: f32) -> ClassificationResult {
    let mut probabilities = [0.0f32; 3];
    let rest = (1.0 - confidence).max(0.0) / 2.0;
    for (id, p) in probabilities.iter_mut().enumerate() {
        *p = if id == label.class_id() { confidence } else { rest };
    }
    ClassificationResult::from_probabilities(&probabilities, DEFAULT_CONFIDENCE_THRESHOLD)
        .unwrap_or_else(|_| ClassificationResult::non_alert())
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, window: &[NormalizedFrame]) -> Result<ClassificationResult> {
        self.calls += 1;
        self.window_lengths.push(window.len());
        match self.script.pop_front() {
            Some(StubVerdict::Result(result)) => Ok(result),
            Some(StubVerdict::Fail) => Err(anyhow!("scripted classifier failure")),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_then_fallback() {
        let mut stub = StubClassifier::scripted([
            StubClassifier::answer(ClassLabel::Violence, 0.9),
            StubVerdict::Fail,
        ]);

        let first = stub.classify(&[]).unwrap();
        assert!(first.is_alert);
        assert!(stub.classify(&[]).is_err());
        let third = stub.classify(&[]).unwrap();
        assert!(!third.is_alert);
        assert_eq!(stub.calls(), 3);
    }

    #[test]
    fn low_confidence_answer_does_not_alert() {
        let mut stub = StubClassifier::constant(ClassLabel::Violence, 0.5);
        let result = stub.classify(&[]).unwrap();
        assert!(!result.is_alert);
    }
}
