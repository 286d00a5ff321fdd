//! Gradient descent with classical momentum.

use crate::optimizers::Optimizer;

const DEFAULT_MOMENTUM: f32 = 0.9;

/// Momentum update: a velocity per parameter smooths successive gradients.
///
/// ```text
/// v = momentum * v - learning_rate * gradient
/// delta = v
/// ```
pub struct Momentum {
    learning_rate: f32,
    momentum: f32,
}

impl Momentum {
    /// Momentum coefficient defaults to 0.9.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_momentum(learning_rate, DEFAULT_MOMENTUM)
    }

    pub fn with_momentum(learning_rate: f32, momentum: f32) -> Self {
        assert!(learning_rate > 0.0, "learning rate must be positive");
        assert!(
            (0.0..1.0).contains(&momentum),
            "momentum must lie in [0, 1)"
        );
        Self {
            learning_rate,
            momentum,
        }
    }
}

impl Optimizer for Momentum {
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
            "momentum: bad state length"
        );
        for (g, v) in gradients.iter_mut().zip(param_state.iter_mut()) {
            *v = self.momentum * *v - self.learning_rate * *g;
            *g = *v;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
