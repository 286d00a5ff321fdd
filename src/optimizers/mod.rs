//! Weight-update rules.
//!
//! An optimizer converts a layer's accumulated gradients into signed parameter
//! deltas, in place: after [`Optimizer::compute_updates`] the gradient buffer
//! holds values to be *added* to the weights (the learning-rate sign is already
//! folded in). State lives outside the optimizer — the training driver keeps
//! one per-parameter state vector and one small per-layer scalar vector for
//! every layer, sized via [`Optimizer::param_state_vars`] and
//! [`Optimizer::layer_state_len`] and zero-initialized. One optimizer instance
//! therefore serves every layer of a network.

mod adagrad;
mod adam;
mod momentum;
mod nesterov;
mod rmsprop;
mod sgd;

pub use adagrad::Adagrad;
pub use adam::Adam;
pub use momentum::Momentum;
pub use nesterov::Nesterov;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;

/// A weight-update rule.
///
/// Implementations must be deterministic functions of the gradients and the
/// provided state so that training runs are reproducible.
pub trait Optimizer {
    /// Per-parameter state variables this rule needs (velocities, moment
    /// estimates). The driver allocates `param_state_vars() * parameters`
    /// floats per layer, laid out variable-major: variable `v` of parameter
    /// `i` lives at `v * parameters + i`.
    fn param_state_vars(&self) -> usize {
        0
    }

    /// Per-layer scalar state values (e.g. Adam's running decay powers).
    fn layer_state_len(&self) -> usize {
        0
    }

    /// Turn accumulated gradients into parameter deltas, in place.
    ///
    /// `param_state` and `layer_state` belong to the layer being updated and
    /// persist across the whole training run; both arrive zero-filled on the
    /// first call.
    fn compute_updates(
        &self,
        gradients: &mut [f32],
        param_state: &mut [f32],
        layer_state: &mut [f32],
    );

    fn learning_rate(&self) -> f32;

    /// Change the step size, e.g. from a learning-rate schedule between
    /// epochs.
    fn set_learning_rate(&mut self, learning_rate: f32);
}
