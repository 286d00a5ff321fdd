//! Adam adaptive moment estimation.

use crate::optimizers::Optimizer;

const DEFAULT_BETA1: f32 = 0.9;
const DEFAULT_BETA2: f32 = 0.999;
const DEFAULT_EPSILON: f32 = 1e-8;

// Per-layer scalar slots: has the layer seen an update yet, and the running
// decay powers used for bias correction.
const STATE_STARTED: usize = 0;
const STATE_BETA1_POW: usize = 1;
const STATE_BETA2_POW: usize = 2;

/// Bias-corrected first/second moment estimation:
///
/// ```text
/// m     = beta1 * m + (1 - beta1) * gradient
/// s     = beta2 * s + (1 - beta2) * gradient^2
/// delta = -learning_rate * (m / (1 - beta1^t)) / (sqrt(s / (1 - beta2^t)) + epsilon)
/// ```
///
/// The decay powers `beta1^t` / `beta2^t` are carried as per-layer scalars and
/// multiplied up one factor per update, so no step counter is stored.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
}

impl Adam {
    /// Standard coefficients: `beta1` 0.9, `beta2` 0.999, `epsilon` 1e-8.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_betas(learning_rate, DEFAULT_BETA1, DEFAULT_BETA2)
    }

    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32) -> Self {
        assert!(learning_rate > 0.0, "learning rate must be positive");
        assert!(
            (0.0..1.0).contains(&beta1) && (0.0..1.0).contains(&beta2),
            "betas must lie in [0, 1)"
        );
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Optimizer for Adam {
    // First and second moment per parameter.
    fn param_state_vars(&self) -> usize {
        2
    }

    fn layer_state_len(&self) -> usize {
        3
    }

    fn compute_updates(
        &self,
        gradients: &mut [f32],
        param_state: &mut [f32],
        layer_state: &mut [f32],
    ) {
        let n = gradients.len();
        assert_eq!(param_state.len(), 2 * n, "adam: bad state length");
        assert_eq!(layer_state.len(), 3, "adam: bad layer state length");

        if layer_state[STATE_STARTED] == 0.0 {
            layer_state[STATE_STARTED] = 1.0;
            layer_state[STATE_BETA1_POW] = self.beta1;
            layer_state[STATE_BETA2_POW] = self.beta2;
        } else {
            layer_state[STATE_BETA1_POW] *= self.beta1;
            layer_state[STATE_BETA2_POW] *= self.beta2;
        }
        let correction1 = 1.0 - layer_state[STATE_BETA1_POW];
        let correction2 = 1.0 - layer_state[STATE_BETA2_POW];

        let (m, s) = param_state.split_at_mut(n);
        for i in 0..n {
            let g = gradients[i];
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
            s[i] = self.beta2 * s[i] + (1.0 - self.beta2) * g * g;
            let m_hat = m[i] / correction1;
            let s_hat = s[i] / correction2;
            gradients[i] = -self.learning_rate * m_hat / (s_hat.sqrt() + self.epsilon);
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
    fn first_call_initializes_decay_powers() {
        let adam = Adam::new(0.001);
        let mut grads = vec![1.0];
        let mut param_state = vec![0.0; 2];
        let mut layer_state = vec![0.0; 3];

        adam.compute_updates(&mut grads, &mut param_state, &mut layer_state);

        assert_eq!(layer_state[STATE_STARTED], 1.0);
        assert_relative_eq!(layer_state[STATE_BETA1_POW], 0.9, epsilon = 1e-7);
        assert_relative_eq!(layer_state[STATE_BETA2_POW], 0.999, epsilon = 1e-7);
        // Fully bias-corrected first step is close to a unit step of -lr.
        assert_relative_eq!(grads[0], -0.001, epsilon = 1e-5);
    }

    #[test]
    fn decay_powers_compound_across_calls() {
        let adam = Adam::new(0.001);
        let mut param_state = vec![0.0; 2];
        let mut layer_state = vec![0.0; 3];

        for _ in 0..3 {
            let mut grads = vec![0.5];
            adam.compute_updates(&mut grads, &mut param_state, &mut layer_state);
        }

        assert_relative_eq!(layer_state[STATE_BETA1_POW], 0.9f32.powi(3), epsilon = 1e-6);
        assert_relative_eq!(layer_state[STATE_BETA2_POW], 0.999f32.powi(3), epsilon = 1e-6);
    }

    #[test]
    fn opposing_gradients_damp_the_step() {
        let adam = Adam::new(0.01);
        let mut param_state = vec![0.0; 2];
        let mut layer_state = vec![0.0; 3];

        let mut g1 = vec![1.0];
        adam.compute_updates(&mut g1, &mut param_state, &mut layer_state);
        let mut g2 = vec![-1.0];
        adam.compute_updates(&mut g2, &mut param_state, &mut layer_state);

        // The first moment partially cancels, so the second step is smaller.
        assert!(g2[0].abs() < g1[0].abs());
    }

    #[test]
    fn state_layout_is_moments_then_variances() {
        let adam = Adam::new(0.001);
        let mut grads = vec![2.0, 4.0];
        let mut param_state = vec![0.0; 4];
        let mut layer_state = vec![0.0; 3];

        adam.compute_updates(&mut grads, &mut param_state, &mut layer_state);

        assert_relative_eq!(param_state[0], 0.1 * 2.0, epsilon = 1e-6);
        assert_relative_eq!(param_state[1], 0.1 * 4.0, epsilon = 1e-6);
        assert_relative_eq!(param_state[2], 0.001 * 4.0, epsilon = 1e-6);
        assert_relative_eq!(param_state[3], 0.001 * 16.0, epsilon = 1e-6);
    }
}
