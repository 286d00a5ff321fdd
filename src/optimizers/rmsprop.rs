//! RMSProp adaptive learning rates.

use crate::optimizers::Optimizer;

const DEFAULT_RHO: f32 = 0.9;
const DEFAULT_EPSILON: f32 = 1e-8;

/// Adagrad with a leaky accumulator, so the squared-gradient history decays
/// instead of growing without bound:
///
/// ```text
/// acc   = rho * acc + (1 - rho) * gradient^2
/// delta = -learning_rate * gradient / sqrt(acc + epsilon)
/// ```
pub struct RmsProp {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
}

impl RmsProp {
    /// Decay factor defaults to 0.9.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_rho(learning_rate, DEFAULT_RHO)
    }

    pub fn with_rho(learning_rate: f32, rho: f32) -> Self {
        assert!(learning_rate > 0.0, "learning rate must be positive");
        assert!((0.0..1.0).contains(&rho), "rho must lie in [0, 1)");
        Self {
            learning_rate,
            rho,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Optimizer for RmsProp {
    fn param_state_vars(&self) -> usize {
        1
    }

    fn compute_updates(
        &self,
        gradients: &mut [f32],
        param_state: &mut [f32],
        _layer_state: &mut [f32],
    ) {
        assert_eq!(
            param_state.len(),
            gradients.len(),
            "rmsprop: bad state length"
        );
        for (g, acc) in gradients.iter_mut().zip(param_state.iter_mut()) {
            *acc = self.rho * *acc + (1.0 - self.rho) * *g * *g;
            *g = -self.learning_rate * *g / (*acc + self.epsilon).sqrt();
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
