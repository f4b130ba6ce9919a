//! Per-camera alert/cooldown state machine.
//!
//! `Idle -> Triggered -> Cooldown -> Idle`. Every full window is evaluated in
//! every phase; only the trigger side effects are gated by the cooldown.

use std::time::{Duration, Instant};

use crate::detect::ClassificationResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    /// Alert accepted, side effects in progress.
    Triggered,
    Cooldown,
}

/// What the worker should do with a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDecision {
    /// Not an alert.
    Ignore,
    /// Record a detection and start a clip.
    Trigger,
    /// Alert inside the cooldown; drop it.
    Suppress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownWindow {
    pub active_until: Instant,
}

#[derive(Debug)]
pub struct AlertController {
    cooldown: Duration,
    window: Option<CooldownWindow>,
    phase: AlertPhase,
}

impl AlertController {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            window: None,
            phase: AlertPhase::Idle,
        }
    }

    pub fn evaluate(&mut self, result: &ClassificationResult, now: Instant) -> AlertDecision {
        self.tick(now);
        if !result.is_alert {
            return AlertDecision::Ignore;
        }
        if self.cooldown_active(now) {
            return AlertDecision::Suppress;
        }
        self.phase = AlertPhase::Triggered;
        AlertDecision::Trigger
    }

    /// The trigger went through; start the cooldown.
    pub fn confirm_trigger(&mut self, now: Instant) {
        if self.cooldown.is_zero() {
            self.window = None;
            self.phase = AlertPhase::Idle;
            return;
        }
        self.window = Some(CooldownWindow {
            active_until: now + self.cooldown,
        });
        self.phase = AlertPhase::Cooldown;
    }

    /// The trigger could not be recorded; no cooldown.
    pub fn abort_trigger(&mut self) {
        if self.phase == AlertPhase::Triggered {
            self.phase = AlertPhase::Idle;
        }
    }

    /// Clear an expired cooldown.
    pub fn tick(&mut self, now: Instant) {
        if let Some(window) = self.window {
            if now >= window.active_until {
                self.window = None;
                self.phase = AlertPhase::Idle;
            }
        }
    }

    pub fn cooldown_active(&self, now: Instant) -> bool {
        self.window.is_some_and(|w| now < w.active_until)
    }

    pub fn cooldown_window(&self) -> Option<CooldownWindow> {
        self.window
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ClassLabel;

    fn alert() -> ClassificationResult {
        ClassificationResult::from_probabilities(&[0.05, 0.9, 0.05], 0.6).unwrap()
    }

    fn calm() -> ClassificationResult {
        ClassificationResult::from_probabilities(&[0.9, 0.05, 0.05], 0.6).unwrap()
    }

    #[test]
    fn one_trigger_per_cooldown_period() {
        let start = Instant::now();
        let mut controller = AlertController::new(Duration::from_secs(60));
        let mut triggers = 0;
        let mut suppressed = 0;

        // A window every 0.5 s for 10 minutes, all alerts.
        for i in 0..1200u64 {
            let now = start + Duration::from_millis(i * 500);
            match controller.evaluate(&alert(), now) {
                AlertDecision::Trigger => {
                    controller.confirm_trigger(now);
                    triggers += 1;
                }
                AlertDecision::Suppress => suppressed += 1,
                AlertDecision::Ignore => panic!("alert verdict ignored"),
            }
        }
        assert_eq!(triggers, 10);
        assert_eq!(suppressed, 1190);
    }

    #[test]
    fn phases_follow_trigger_and_expiry() {
        let start = Instant::now();
        let mut controller = AlertController::new(Duration::from_secs(10));
        assert_eq!(controller.phase(), AlertPhase::Idle);

        assert_eq!(controller.evaluate(&alert(), start), AlertDecision::Trigger);
        assert_eq!(controller.phase(), AlertPhase::Triggered);
        controller.confirm_trigger(start);
        assert_eq!(controller.phase(), AlertPhase::Cooldown);

        // Non-alert windows keep being evaluated during cooldown.
        let mid = start + Duration::from_secs(5);
        assert_eq!(controller.evaluate(&calm(), mid), AlertDecision::Ignore);
        assert!(controller.cooldown_active(mid));

        let later = start + Duration::from_secs(10);
        controller.tick(later);
        assert_eq!(controller.phase(), AlertPhase::Idle);
        assert!(!controller.cooldown_active(later));
    }

    #[test]
    fn aborted_trigger_leaves_no_cooldown() {
        let now = Instant::now();
        let mut controller = AlertController::new(Duration::from_secs(60));
        assert_eq!(controller.evaluate(&alert(), now), AlertDecision::Trigger);
        controller.abort_trigger();
        assert_eq!(controller.phase(), AlertPhase::Idle);
        assert_eq!(controller.evaluate(&alert(), now), AlertDecision::Trigger);
    }

    #[test]
    fn critical_label_uses_same_gate() {
        let now = Instant::now();
        let mut controller = AlertController::new(Duration::from_secs(60));
        let weaponized = ClassificationResult::from_probabilities(&[0.0, 0.1, 0.9], 0.6).unwrap();
        assert_eq!(weaponized.label, ClassLabel::Weaponized);
        assert_eq!(controller.evaluate(&weaponized, now), AlertDecision::Trigger);
        controller.confirm_trigger(now);
        assert_eq!(controller.evaluate(&weaponized, now), AlertDecision::Suppress);
    }
}
