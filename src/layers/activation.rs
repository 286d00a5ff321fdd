//! Activation layers.
//!
//! Stateless and shapeless: the size is deduced from the preceding layer when
//! the activation is appended to a network. Backward rules are expressed as
//! functions of the forward *output*, so no intermediate values need saving.
//!
//! Softmax and log-softmax are row-wise (per sample) with max-subtracted
//! stabilization; the other kinds are purely elementwise.

use crate::context::LayerContext;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::math::parallel::for_each_chunk;

/// Which activation function a layer applies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivationKind {
    Sigmoid,
    Tanh,
    Relu,
    /// `alpha` is the slope for negative inputs.
    LeakyRelu { alpha: f32 },
    /// `alpha` scales the saturating negative branch.
    Elu { alpha: f32 },
    SoftMax,
    /// Log-domain softmax; its backward rule assumes a negative-log-likelihood
    /// cost feeds the delta.
    LogSoftMax,
}

/// Elementwise (or row-wise) activation layer.
///
/// # Example
///
/// ```
/// use annt::layers::{ActivationLayer, Layer};
///
/// let mut act = ActivationLayer::tanh();
/// assert_eq!(act.input_size(), 0); // shapeless until connected
/// act.set_input_size(16);
/// assert_eq!(act.output_size(), 16);
/// ```
#[derive(Debug)]
pub struct ActivationLayer {
    kind: ActivationKind,
    size: usize,
}

impl ActivationLayer {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind, size: 0 }
    }

    pub fn sigmoid() -> Self {
        Self::new(ActivationKind::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::new(ActivationKind::Tanh)
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }

    pub fn leaky_relu(alpha: f32) -> Self {
        Self::new(ActivationKind::LeakyRelu { alpha })
    }

    pub fn elu(alpha: f32) -> Self {
        Self::new(ActivationKind::Elu { alpha })
    }

    pub fn softmax() -> Self {
        Self::new(ActivationKind::SoftMax)
    }

    pub fn log_softmax() -> Self {
        Self::new(ActivationKind::LogSoftMax)
    }

    pub fn activation_kind(&self) -> ActivationKind {
        self.kind
    }
}

// The f64 round trip keeps the exponential stable for large-magnitude inputs.
// Shared with the gated recurrent layers.
pub(crate) fn sigmoid(x: f32) -> f32 {
    (1.0 / (1.0 + (-(x as f64)).exp())) as f32
}

fn softmax_row(input: &[f32], output: &mut [f32]) {
    let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for (out, &x) in output.iter_mut().zip(input) {
        let e = (x - max).exp();
        *out = e;
        sum += e;
    }
    for out in output.iter_mut() {
        *out /= sum;
    }
}

fn log_softmax_row(input: &[f32], output: &mut [f32]) {
    let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = input.iter().map(|&x| (x - max).exp()).sum();
    let log_sum = sum.ln() + max;
    for (out, &x) in output.iter_mut().zip(input) {
        *out = x - log_sum;
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }

    fn input_size(&self) -> usize {
        self.size
    }

    fn output_size(&self) -> usize {
        self.size
    }

    fn set_input_size(&mut self, size: usize) {
        self.size = size;
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        assert!(self.size > 0, "activation layer is not connected");
        let n = ctx.samples;
        assert_eq!(input.len(), n * self.size, "activation forward: bad input length");
        assert_eq!(output.len(), n * self.size, "activation forward: bad output length");

        match self.kind {
            // One whole-buffer pass through the vectorized max.
            ActivationKind::Relu => ctx.math.max(input, 0.0, output),
            ActivationKind::Sigmoid => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    let row = &input[i * self.size..(i + 1) * self.size];
                    for (o, &x) in out.iter_mut().zip(row) {
                        *o = sigmoid(x);
                    }
                });
            }
            ActivationKind::Tanh => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    let row = &input[i * self.size..(i + 1) * self.size];
                    for (o, &x) in out.iter_mut().zip(row) {
                        *o = x.tanh();
                    }
                });
            }
            ActivationKind::LeakyRelu { alpha } => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    let row = &input[i * self.size..(i + 1) * self.size];
                    for (o, &x) in out.iter_mut().zip(row) {
                        *o = if x > 0.0 { x } else { alpha * x };
                    }
                });
            }
            ActivationKind::Elu { alpha } => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    let row = &input[i * self.size..(i + 1) * self.size];
                    for (o, &x) in out.iter_mut().zip(row) {
                        *o = if x > 0.0 { x } else { alpha * (x.exp() - 1.0) };
                    }
                });
            }
            ActivationKind::SoftMax => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    softmax_row(&input[i * self.size..(i + 1) * self.size], out);
                });
            }
            ActivationKind::LogSoftMax => {
                for_each_chunk(output, self.size, n > 1, |i, out| {
                    log_softmax_row(&input[i * self.size..(i + 1) * self.size], out);
                });
            }
        }
    }

    fn backward(
        &self,
        _input: &[f32],
        output: &[f32],
        delta: &[f32],
        prev_delta: &mut [f32],
        _gradients: &mut [f32],
        ctx: &mut LayerContext<'_>,
    ) {
        let n = ctx.samples;
        assert_eq!(delta.len(), n * self.size, "activation backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * self.size,
            "activation backward: bad prev_delta length"
        );

        match self.kind {
            ActivationKind::Sigmoid => {
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    for (j, p) in prev.iter_mut().enumerate() {
                        let y = output[base + j];
                        *p = delta[base + j] * y * (1.0 - y);
                    }
                });
            }
            ActivationKind::Tanh => {
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    for (j, p) in prev.iter_mut().enumerate() {
                        let y = output[base + j];
                        *p = delta[base + j] * (1.0 - y * y);
                    }
                });
            }
            ActivationKind::Relu => {
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    for (j, p) in prev.iter_mut().enumerate() {
                        *p = if output[base + j] > 0.0 {
                            delta[base + j]
                        } else {
                            0.0
                        };
                    }
                });
            }
            ActivationKind::LeakyRelu { alpha } => {
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    for (j, p) in prev.iter_mut().enumerate() {
                        *p = if output[base + j] > 0.0 {
                            delta[base + j]
                        } else {
                            alpha * delta[base + j]
                        };
                    }
                });
            }
            ActivationKind::Elu { alpha } => {
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    for (j, p) in prev.iter_mut().enumerate() {
                        let y = output[base + j];
                        // For the negative branch dy/dx = alpha·eˣ = y + alpha.
                        *p = if y > 0.0 {
                            delta[base + j]
                        } else {
                            delta[base + j] * (y + alpha)
                        };
                    }
                });
            }
            ActivationKind::SoftMax => {
                // Full Jacobian-vector product:
                // prev_i = y_i (delta_i − Σ_j delta_j y_j)
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    let y = &output[base..base + self.size];
                    let d = &delta[base..base + self.size];
                    let weighted: f32 = d.iter().zip(y).map(|(dj, yj)| dj * yj).sum();
                    for (j, p) in prev.iter_mut().enumerate() {
                        *p = y[j] * (d[j] - weighted);
                    }
                });
            }
            ActivationKind::LogSoftMax => {
                // prev_i = delta_i − e^{y_i} · Σ_j delta_j
                for_each_chunk(prev_delta, self.size, n > 1, |i, prev| {
                    let base = i * self.size;
                    let y = &output[base..base + self.size];
                    let d = &delta[base..base + self.size];
                    let total: f32 = d.iter().sum();
                    for (j, p) in prev.iter_mut().enumerate() {
                        *p = d[j] - y[j].exp() * total;
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScratchArena;
    use crate::math::VectorOps;
    use approx::assert_relative_eq;

    fn run<F>(layer: &ActivationLayer, samples: usize, body: F)
    where
        F: FnOnce(&ActivationLayer, &mut LayerContext<'_>),
    {
        let mut arena = ScratchArena::build(Vec::new(), samples, 1);
        let mut ctx = LayerContext {
            samples,
            training: true,
            sequence_length: 1,
            math: VectorOps::auto(),
            scratch: &mut arena,
        };
        body(layer, &mut ctx);
    }

    fn forward_one(kind: ActivationLayer, input: &[f32]) -> Vec<f32> {
        let mut layer = kind;
        layer.set_input_size(input.len());
        let mut output = vec![0.0; input.len()];
        run(&layer, 1, |l, ctx| l.forward(input, &mut output, ctx));
        output
    }

    #[test]
    fn sigmoid_forward_hits_known_points() {
        let out = forward_one(ActivationLayer::sigmoid(), &[0.0, 2.0, -2.0]);
        assert_relative_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.880797, epsilon = 1e-5);
        assert_relative_eq!(out[2], 0.119203, epsilon = 1e-5);
    }

    #[test]
    fn relu_and_leaky_relu_split_at_zero() {
        let out = forward_one(ActivationLayer::relu(), &[-1.5, 0.0, 2.5]);
        assert_eq!(out, vec![0.0, 0.0, 2.5]);

        let out = forward_one(ActivationLayer::leaky_relu(0.1), &[-2.0, 3.0]);
        assert_relative_eq!(out[0], -0.2, epsilon = 1e-6);
        assert_relative_eq!(out[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn elu_saturates_negative_inputs() {
        let out = forward_one(ActivationLayer::elu(1.0), &[-1.0, 1.0]);
        assert_relative_eq!(out[0], (-1.0f32).exp() - 1.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn softmax_rows_sum_to_one_even_for_large_inputs() {
        let out = forward_one(ActivationLayer::softmax(), &[1000.0, 1001.0, 1002.0]);
        let sum: f32 = out.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
        assert!(out[2] > out[1] && out[1] > out[0]);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn log_softmax_is_log_of_softmax() {
        let input = [0.3, -1.2, 2.0, 0.0];
        let soft = forward_one(ActivationLayer::softmax(), &input);
        let log_soft = forward_one(ActivationLayer::log_softmax(), &input);
        for (l, s) in log_soft.iter().zip(&soft) {
            assert_relative_eq!(*l, s.ln(), epsilon = 1e-5);
        }
    }

    #[test]
    fn tanh_backward_uses_output_only() {
        let mut layer = ActivationLayer::tanh();
        layer.set_input_size(2);
        let input = [0.5, -0.3];
        let mut output = vec![0.0; 2];
        run(&layer, 1, |l, ctx| l.forward(&input, &mut output, ctx));

        let delta = [1.0, 1.0];
        let mut prev = vec![0.0; 2];
        run(&layer, 1, |l, ctx| {
            l.backward(&input, &output, &delta, &mut prev, &mut [], ctx)
        });

        for (p, y) in prev.iter().zip(&output) {
            assert_relative_eq!(*p, 1.0 - y * y, epsilon = 1e-6);
        }
    }

    #[test]
    fn softmax_backward_is_zero_for_uniform_delta() {
        // The softmax Jacobian annihilates deltas proportional to all-ones
        // composed against a probability vector: Σ y_j = 1.
        let mut layer = ActivationLayer::softmax();
        layer.set_input_size(3);
        let input = [0.1, 0.7, -0.4];
        let mut output = vec![0.0; 3];
        run(&layer, 1, |l, ctx| l.forward(&input, &mut output, ctx));

        let delta = [1.0, 1.0, 1.0];
        let mut prev = vec![0.0; 3];
        run(&layer, 1, |l, ctx| {
            l.backward(&input, &output, &delta, &mut prev, &mut [], ctx)
        });
        for p in &prev {
            assert_relative_eq!(*p, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn batched_forward_treats_rows_independently() {
        let mut layer = ActivationLayer::softmax();
        layer.set_input_size(2);
        let input = [0.0, 0.0, 5.0, -5.0];
        let mut output = vec![0.0; 4];
        run(&layer, 2, |l, ctx| l.forward(&input, &mut output, ctx));

        assert_relative_eq!(output[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(output[1], 0.5, epsilon = 1e-6);
        assert!(output[2] > 0.99 && output[3] < 0.01);
    }

    #[test]
    #[should_panic(expected = "not connected")]
    fn unconnected_activation_rejects_forward() {
        let layer = ActivationLayer::relu();
        let mut output = vec![0.0; 2];
        run(&layer, 1, |l, ctx| l.forward(&[1.0, 2.0], &mut output, ctx));
    }
}
