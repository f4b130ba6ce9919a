use std::fmt;

use anyhow::{anyhow, Result};

/// Minimum confidence for an anomaly label to raise an alert.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Classifier output classes, in model output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassLabel {
    NoViolence,
    Violence,
    Weaponized,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 3] = [
        ClassLabel::NoViolence,
        ClassLabel::Violence,
        ClassLabel::Weaponized,
    ];

    pub fn from_class_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    pub fn class_id(self) -> usize {
        match self {
            ClassLabel::NoViolence => 0,
            ClassLabel::Violence => 1,
            ClassLabel::Weaponized => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassLabel::NoViolence => "No Violence",
            ClassLabel::Violence => "Violence",
            ClassLabel::Weaponized => "Weaponized",
        }
    }

    /// Any class other than the background class.
    pub fn is_anomaly(self) -> bool {
        self != ClassLabel::NoViolence
    }

    /// File-name friendly form ("No_Violence").
    pub fn slug(self) -> String {
        self.as_str().replace(' ', "_")
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one classification window.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub label: ClassLabel,
    /// Probability of `label`, in [0, 1].
    pub confidence: f32,
    /// Anomaly label with confidence above the threshold.
    pub is_alert: bool,
    /// Weaponized class predicted, whatever the confidence.
    pub is_critical: bool,
    /// Per-class probabilities, in class order.
    pub probabilities: Vec<(ClassLabel, f32)>,
}

impl ClassificationResult {
    /// Build a verdict from per-class probabilities (argmax + threshold).
    pub fn from_probabilities(probabilities: &[f32], threshold: f32) -> Result<Self> {
        if probabilities.len() != ClassLabel::ALL.len() {
            return Err(anyhow!(
                "expected {} class probabilities, got {}",
                ClassLabel::ALL.len(),
                probabilities.len()
            ));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(anyhow!("class probabilities must be finite"));
        }

        let (class_id, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (id, p)| {
                if p > best.1 {
                    (id, p)
                } else {
                    best
                }
            });
        let label = ClassLabel::from_class_id(class_id)
            .ok_or_else(|| anyhow!("class id {} out of range", class_id))?;
        let confidence = confidence.clamp(0.0, 1.0);
        let is_alert = label.is_anomaly() && confidence > threshold;

        Ok(Self {
            label,
            confidence,
            is_alert,
            is_critical: label == ClassLabel::Weaponized,
            probabilities: ClassLabel::ALL
                .iter()
                .copied()
                .zip(probabilities.iter().copied())
                .collect(),
        })
    }

    /// Synthetic verdict used when classification fails.
    pub fn non_alert() -> Self {
        Self {
            label: ClassLabel::NoViolence,
            confidence: 0.0,
            is_alert: false,
            is_critical: false,
            probabilities: Vec::new(),
        }
    }
}
