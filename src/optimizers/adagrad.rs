//! Adagrad adaptive learning rates.

use crate::optimizers::Optimizer;

const DEFAULT_EPSILON: f32 = 1e-8;

/// Per-parameter step scaling by the accumulated squared-gradient history:
///
/// ```text
/// acc  += gradient^2
/// delta = -learning_rate * gradient / sqrt(acc + epsilon)
/// ```
///
/// The accumulator only grows, so effective step sizes decay monotonically;
/// frequently updated parameters slow down first.
pub struct Adagrad {
    learning_rate: f32,
    epsilon: f32,
}

impl Adagrad {
    pub fn new(learning_rate: f32) -> Self {
        assert!(learning_rate > 0.0, "learning rate must be positive");
        Self {
            learning_rate,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Optimizer for Adagrad {
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
            "adagrad: bad state length"
        );
        for (g, acc) in gradients.iter_mut().zip(param_state.iter_mut()) {
            *acc += *g * *g;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_step_is_a_near_unit_step() {
        let opt = Adagrad::new(0.1);
        let mut state = vec![0.0; 1];
        let mut g = vec![4.0];
        opt.compute_updates(&mut g, &mut state, &mut []);
        // acc = 16, delta = -0.1 * 4 / 4
        assert_relative_eq!(g[0], -0.1, epsilon = 1e-5);
        assert_relative_eq!(state[0], 16.0, epsilon = 1e-6);
    }

    #[test]
    fn repeated_gradients_shrink_the_step() {
        let opt = Adagrad::new(0.1);
        let mut state = vec![0.0; 1];
        let mut first = vec![1.0];
        opt.compute_updates(&mut first, &mut state, &mut []);
        let mut second = vec![1.0];
        opt.compute_updates(&mut second, &mut state, &mut []);
        assert!(second[0].abs() < first[0].abs());
        // acc = 2, delta = -0.1 / sqrt(2)
        assert_relative_eq!(second[0], -0.1 / 2.0f32.sqrt(), epsilon = 1e-5);
    }
}
