//! Learning-rate schedules.
//!
//! A schedule maps an epoch index to a learning rate; the training loop feeds
//! the result to [`TrainingDriver::set_learning_rate`]
//! (crate::training::TrainingDriver::set_learning_rate) before each epoch.
//! Schedules are stateless, so the same object can drive several runs.

/// Maps epoch indices (0-based) to learning rates.
pub trait LrSchedule {
    fn lr_for_epoch(&self, epoch: usize) -> f32;
}

/// Multiplies the rate by `gamma` every `step_size` epochs.
///
/// `lr = initial * gamma^(epoch / step_size)`
pub struct StepDecay {
    initial: f32,
    step_size: usize,
    gamma: f32,
}

impl StepDecay {
    pub fn new(initial: f32, step_size: usize, gamma: f32) -> Self {
        assert!(step_size > 0, "step size must be positive");
        Self {
            initial,
            step_size,
            gamma,
        }
    }
}

impl LrSchedule for StepDecay {
    fn lr_for_epoch(&self, epoch: usize) -> f32 {
        self.initial * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

/// Multiplies the rate by `gamma` every epoch.
///
/// `lr = initial * gamma^epoch`
pub struct ExponentialDecay {
    initial: f32,
    gamma: f32,
}

impl ExponentialDecay {
    pub fn new(initial: f32, gamma: f32) -> Self {
        Self { initial, gamma }
    }
}

impl LrSchedule for ExponentialDecay {
    fn lr_for_epoch(&self, epoch: usize) -> f32 {
        self.initial * self.gamma.powi(epoch as i32)
    }
}

/// Cosine annealing from the initial rate down to `minimum` over `period`
/// epochs, then restarting.
pub struct CosineAnnealing {
    initial: f32,
    minimum: f32,
    period: usize,
}

impl CosineAnnealing {
    pub fn new(initial: f32, minimum: f32, period: usize) -> Self {
        assert!(period > 0, "period must be positive");
        Self {
            initial,
            minimum,
            period,
        }
    }
}

impl LrSchedule for CosineAnnealing {
    fn lr_for_epoch(&self, epoch: usize) -> f32 {
        let phase = (epoch % self.period) as f32 / self.period as f32;
        self.minimum
            + 0.5 * (self.initial - self.minimum) * (1.0 + (std::f32::consts::PI * phase).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn step_decay_halves_on_schedule() {
        let s = StepDecay::new(0.1, 3, 0.5);
        assert_relative_eq!(s.lr_for_epoch(0), 0.1);
        assert_relative_eq!(s.lr_for_epoch(2), 0.1);
        assert_relative_eq!(s.lr_for_epoch(3), 0.05);
        assert_relative_eq!(s.lr_for_epoch(6), 0.025);
    }

    #[test]
    fn exponential_decay_compounds_per_epoch() {
        let s = ExponentialDecay::new(0.1, 0.95);
        assert_relative_eq!(s.lr_for_epoch(0), 0.1);
        assert_relative_eq!(s.lr_for_epoch(1), 0.095);
        assert_relative_eq!(s.lr_for_epoch(2), 0.1 * 0.95 * 0.95, epsilon = 1e-7);
    }

    #[test]
    fn cosine_annealing_spans_initial_to_minimum() {
        let s = CosineAnnealing::new(0.1, 0.001, 10);
        assert_relative_eq!(s.lr_for_epoch(0), 0.1);
        // Half way through the period the rate sits at the midpoint.
        assert_relative_eq!(s.lr_for_epoch(5), (0.1 + 0.001) / 2.0, epsilon = 1e-6);
        // Restart at the period boundary.
        assert_relative_eq!(s.lr_for_epoch(10), 0.1);
    }
}
