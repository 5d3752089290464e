//! Epoch-end training controls
//!
//! Both callbacks watch the validation loss (lower is better).

use serde::{Deserialize, Serialize};

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

impl PlateauMode {
    fn initial_best(self) -> f64 {
        match self {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        }
    }
}

/// Multiply the learning rate by `factor` once the metric stops improving
/// by more than `min_delta` for `patience` epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_delta: f64,
    cooldown: usize,
    min_lr: f64,
    mode: PlateauMode,
    best: f64,
    wait: usize,
    cooldown_counter: usize,
    current_lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            factor: 0.1,
            patience: 5,
            min_delta: 1e-3,
            cooldown: 0,
            min_lr: 0.0,
            mode: PlateauMode::Min,
            best: PlateauMode::Min.initial_best(),
            wait: 0,
            cooldown_counter: 0,
            current_lr: initial_lr,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn with_mode(mut self, mode: PlateauMode) -> Self {
        self.mode = mode;
        self.best = mode.initial_best();
        self
    }

    fn improved(&self, metric: f64) -> bool {
        match self.mode {
            PlateauMode::Min => metric < self.best - self.min_delta,
            PlateauMode::Max => metric > self.best + self.min_delta,
        }
    }

    /// Record an epoch's metric and return the learning rate for the next epoch.
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if self.improved(metric) {
            self.best = metric;
            self.wait = 0;
        } else if self.cooldown_counter == 0 {
            self.wait += 1;
            if self.wait >= self.patience && self.current_lr > self.min_lr {
                self.current_lr = (self.current_lr * self.factor).max(self.min_lr);
                self.cooldown_counter = self.cooldown;
                self.wait = 0;
            }
        }
        self.current_lr
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }
}

/// What the training loop should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopDecision {
    /// The metric improved; snapshot the weights
    Improved,
    Continue,
    /// Patience exhausted; restore the best snapshot and stop
    Stop,
}

/// Stop when the metric has not improved by `min_delta` for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    mode: PlateauMode,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new()
    }
}

impl EarlyStopping {
    pub fn new() -> Self {
        Self {
            patience: 10,
            min_delta: 1e-4,
            mode: PlateauMode::Min,
            best: PlateauMode::Min.initial_best(),
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_mode(mut self, mode: PlateauMode) -> Self {
        self.mode = mode;
        self.best = mode.initial_best();
        self
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    fn improved(&self, metric: f64) -> bool {
        match self.mode {
            PlateauMode::Min => metric + self.min_delta < self.best,
            PlateauMode::Max => metric - self.min_delta > self.best,
        }
    }

    /// Record the metric of `epoch` (0-based).
    pub fn step(&mut self, epoch: usize, metric: f64) -> EarlyStopDecision {
        self.wait += 1;
        if self.improved(metric) {
            self.best = metric;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return EarlyStopDecision::Improved;
        }
        if self.wait >= self.patience && epoch > 0 {
            self.stopped_epoch = Some(epoch);
            return EarlyStopDecision::Stop;
        }
        EarlyStopDecision::Continue
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_on_plateau_after_patience() {
        let mut plateau = ReduceLrOnPlateau::new(0.1).with_patience(3).with_factor(0.5);

        assert_eq!(plateau.step(1.0), 0.1);
        assert_eq!(plateau.step(0.9), 0.1);
        assert_eq!(plateau.step(0.8), 0.1);

        assert_eq!(plateau.step(0.85), 0.1);
        assert_eq!(plateau.step(0.86), 0.1);
        assert_eq!(plateau.step(0.87), 0.05);
    }

    #[test]
    fn test_plateau_ignores_gains_below_min_delta() {
        let mut plateau = ReduceLrOnPlateau::new(0.01);
        plateau.step(1.0);
        for _ in 0..4 {
            // 0.0005 better each time: under min_delta = 0.001
            let next = plateau.lr();
            assert_eq!(plateau.step(1.0 - 0.0005), next);
        }
        let reduced = plateau.step(0.9996);
        assert!((reduced - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_respects_min_lr() {
        let mut plateau = ReduceLrOnPlateau::new(0.01).with_patience(1).with_min_lr(0.005);
        plateau.step(1.0);
        assert_eq!(plateau.step(1.0), 0.005);
        assert_eq!(plateau.step(1.0), 0.005);
    }

    #[test]
    fn test_early_stopping_tracks_best_and_stops() {
        let mut stopper = EarlyStopping::new().with_patience(2);
        assert_eq!(stopper.step(0, 1.0), EarlyStopDecision::Improved);
        assert_eq!(stopper.step(1, 0.5), EarlyStopDecision::Improved);
        assert_eq!(stopper.step(2, 0.6), EarlyStopDecision::Continue);
        assert_eq!(stopper.step(3, 0.7), EarlyStopDecision::Stop);
        assert_eq!(stopper.best_epoch(), Some(1));
        assert_eq!(stopper.best(), 0.5);
        assert_eq!(stopper.stopped_epoch(), Some(3));
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut stopper = EarlyStopping::new().with_patience(1).with_min_delta(0.1);
        assert_eq!(stopper.step(0, 1.0), EarlyStopDecision::Improved);
        // 0.95 is better, but not by min_delta
        assert_eq!(stopper.step(1, 0.95), EarlyStopDecision::Stop);
        assert_eq!(stopper.best(), 1.0);
        assert_eq!(stopper.best_epoch(), Some(0));
    }

    #[test]
    fn test_early_stopping_gain_beyond_min_delta_improves() {
        let mut stopper = EarlyStopping::new().with_patience(1).with_min_delta(0.1);
        stopper.step(0, 1.0);
        assert_eq!(stopper.step(1, 0.85), EarlyStopDecision::Improved);
        assert_eq!(stopper.best(), 0.85);
    }

    #[test]
    fn test_flat_loss_stops_after_patience() {
        let mut stopper = EarlyStopping::new();
        let mut stopped = None;
        for epoch in 0..30 {
            if stopper.step(epoch, 1.0) == EarlyStopDecision::Stop {
                stopped = Some(epoch);
                break;
            }
        }
        assert_eq!(stopped, Some(stopper.patience()));
        assert_eq!(stopper.best_epoch(), Some(0));
    }

    #[test]
    fn test_slightly_worse_loss_keeps_best() {
        let mut stopper = EarlyStopping::new();
        assert_eq!(stopper.step(0, 1.0), EarlyStopDecision::Improved);
        assert_eq!(stopper.step(1, 1.00005), EarlyStopDecision::Continue);
        assert_eq!(stopper.best(), 1.0);
    }

    #[test]
    fn test_max_mode_needs_gain_beyond_min_delta() {
        let mut stopper = EarlyStopping::new()
            .with_mode(PlateauMode::Max)
            .with_patience(2)
            .with_min_delta(0.05);
        assert_eq!(stopper.step(0, 0.5), EarlyStopDecision::Improved);
        assert_eq!(stopper.step(1, 0.52), EarlyStopDecision::Continue);
        assert_eq!(stopper.step(2, 0.6), EarlyStopDecision::Improved);
    }

    #[test]
    fn test_plateau_cooldown_then_min_lr_floor() {
        let mut plateau = ReduceLrOnPlateau::new(0.1)
            .with_patience(1)
            .with_factor(0.1)
            .with_cooldown(2)
            .with_min_lr(0.005);
        plateau.step(1.0);
        assert!((plateau.step(1.0) - 0.01).abs() < 1e-12);
        // cooldown epoch: no counting
        assert!((plateau.step(1.0) - 0.01).abs() < 1e-12);
        // cooldown ends this epoch, so the wait counts again; clamped to min_lr
        assert_eq!(plateau.step(1.0), 0.005);
        for _ in 0..5 {
            assert_eq!(plateau.step(1.0), 0.005);
        }
    }
}
