use std::f64::consts::PI;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Learning-rate policy stepped once per mini-batch.
pub trait LrScheduler {
    /// Current learning rate.
    fn lr(&self) -> f64;
    /// Advances one iteration and returns the new learning rate.
    fn step(&mut self) -> f64;
}

/// lr = base_lr * gamma^(iteration / step_size)
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    iteration: usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            iteration: 0,
        }
    }
}

impl LrScheduler for StepLr {
    fn lr(&self) -> f64 {
        self.base_lr * self.gamma.powi((self.iteration / self.step_size) as i32)
    }

    fn step(&mut self) -> f64 {
        self.iteration += 1;
        self.lr()
    }
}

/// Cosine cycle between `min_lr` and `max_lr`: starts at the minimum, peaks
/// half way through `stepsize` iterations and is back at the minimum after it.
#[derive(Debug, Clone)]
pub struct CyclicLr {
    max_lr: f64,
    min_lr: f64,
    stepsize: usize,
    iteration: usize,
}

impl CyclicLr {
    pub fn new(max_lr: f64, min_lr: f64, stepsize: usize) -> Self {
        Self {
            max_lr,
            min_lr,
            stepsize: stepsize.max(1),
            iteration: 0,
        }
    }
}

impl LrScheduler for CyclicLr {
    fn lr(&self) -> f64 {
        let phase = PI * (1.0 + 2.0 / self.stepsize as f64 * self.iteration as f64);
        (self.max_lr - self.min_lr) * (0.5 * (phase.cos() + 1.0)) + self.min_lr
    }

    fn step(&mut self) -> f64 {
        self.iteration += 1;
        self.lr()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Halve the rate three times per pass over the corpus.
    Step,
    /// Cosine cycle between lr and 0.2 * lr every four passes.
    Cyclic,
}

impl SchedulerKind {
    /// Builds a fresh scheduler sized for a corpus of `lines` sentences.
    pub fn build(self, lr: f64, lines: usize, batch_size: usize) -> Box<dyn LrScheduler> {
        let batch_size = batch_size.max(1);
        match self {
            SchedulerKind::Step => Box::new(StepLr::new(lr, lines / (3 * batch_size), 0.5)),
            SchedulerKind::Cyclic => Box::new(CyclicLr::new(lr, lr * 0.2, (lines / batch_size) * 4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn step_lr_halves_every_step_size_iterations() {
        let mut sched = StepLr::new(0.5, 2, 0.5);
        let lrs: Vec<f64> = (0..5).map(|_| sched.step()).collect();
        assert_eq!(lrs, vec![0.5, 0.25, 0.25, 0.125, 0.125]);
    }

    #[test]
    fn step_size_zero_is_clamped() {
        let mut sched = SchedulerKind::Step.build(1.0, 10, 100);
        assert!(close(sched.lr(), 1.0));
        assert!(close(sched.step(), 0.5));
    }

    #[test]
    fn cyclic_lr_runs_min_max_min() {
        let mut sched = CyclicLr::new(1.0, 0.2, 4);
        assert!(close(sched.lr(), 0.2));
        sched.step();
        assert!(close(sched.step(), 1.0));
        sched.step();
        assert!(close(sched.step(), 0.2));
    }

    #[test]
    fn kind_parses_from_lowercase_name() {
        assert_eq!(SchedulerKind::from_str("cyclic", true), Ok(SchedulerKind::Cyclic));
    }
}
