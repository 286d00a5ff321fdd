//! Plain stochastic gradient descent.

use crate::optimizers::Optimizer;

/// Stateless gradient descent: `delta = -learning_rate * gradient`.
///
/// # Example
///
/// ```
/// use annt::optimizers::{Optimizer, Sgd};
///
/// let sgd = Sgd::new(0.1);
/// let mut gradients = vec![1.0, -2.0, 0.5];
/// sgd.compute_updates(&mut gradients, &mut [], &mut []);
/// assert_eq!(gradients, vec![-0.1, 0.2, -0.05]);
/// ```
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        assert!(learning_rate > 0.0, "learning rate must be positive");
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn compute_updates(
        &self,
        gradients: &mut [f32],
        _param_state: &mut [f32],
        _layer_state: &mut [f32],
    ) {
        for g in gradients.iter_mut() {
            *g *= -self.learning_rate;
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

    #[test]
    fn scales_and_negates_gradients() {
        let sgd = Sgd::new(0.01);
        let mut g = vec![1.0, 2.0, -3.0];
        sgd.compute_updates(&mut g, &mut [], &mut []);
        assert_eq!(g, vec![-0.01, -0.02, 0.03]);
    }

    #[test]
    fn needs_no_state() {
        let sgd = Sgd::new(0.01);
        assert_eq!(sgd.param_state_vars(), 0);
        assert_eq!(sgd.layer_state_len(), 0);
    }

    #[test]
    fn learning_rate_is_adjustable() {
        let mut sgd = Sgd::new(0.1);
        sgd.set_learning_rate(0.001);
        assert_eq!(sgd.learning_rate(), 0.001);
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn rejects_zero_learning_rate() {
        Sgd::new(0.0);
    }
}
