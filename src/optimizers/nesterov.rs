//! Nesterov accelerated gradient.

use crate::optimizers::Optimizer;

const DEFAULT_MOMENTUM: f32 = 0.9;

/// Momentum with the lookahead correction applied to the produced delta:
///
/// ```text
/// v_prev = v
/// v      = momentum * v - learning_rate * gradient
/// delta  = (1 + momentum) * v - momentum * v_prev
/// ```
///
/// Equivalent to evaluating the gradient at the position the velocity is
/// about to carry the weights to.
pub struct Nesterov {
    learning_rate: f32,
    momentum: f32,
}

impl Nesterov {
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

impl Optimizer for Nesterov {
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
            "nesterov: bad state length"
        );
        for (g, v) in gradients.iter_mut().zip(param_state.iter_mut()) {
            let v_prev = *v;
            *v = self.momentum * *v - self.learning_rate * *g;
            *g = (1.0 + self.momentum) * *v - self.momentum * v_prev;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_step_overshoots_plain_momentum() {
        let opt = Nesterov::with_momentum(0.1, 0.9);
        let mut state = vec![0.0; 1];
        let mut g = vec![1.0];
        opt.compute_updates(&mut g, &mut state, &mut []);
        // v = -0.1, delta = 1.9 * -0.1 - 0
        assert_relative_eq!(g[0], -0.19, epsilon = 1e-6);
        assert_relative_eq!(state[0], -0.1, epsilon = 1e-6);
    }

    #[test]
    fn second_step_uses_previous_velocity() {
        let opt = Nesterov::with_momentum(0.1, 0.9);
        let mut state = vec![-0.1];
        let mut g = vec![1.0];
        opt.compute_updates(&mut g, &mut state, &mut []);
        // v = 0.9 * -0.1 - 0.1 = -0.19
        // delta = 1.9 * -0.19 - 0.9 * -0.1 = -0.271
        assert_relative_eq!(state[0], -0.19, epsilon = 1e-6);
        assert_relative_eq!(g[0], -0.271, epsilon = 1e-6);
    }

    #[test]
    fn zero_momentum_reduces_to_sgd() {
        let opt = Nesterov::with_momentum(0.05, 0.0);
        let mut state = vec![0.0; 1];
        let mut g = vec![2.0];
        opt.compute_updates(&mut g, &mut state, &mut []);
        assert_relative_eq!(g[0], -0.1, epsilon = 1e-6);
    }
}
