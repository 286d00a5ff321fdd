//! Inference driver: single-sample forward passes.
//!
//! Owns the per-layer output storage and an execution context sized for batch
//! size 1, so repeated evaluations allocate nothing. Recurrent layers keep
//! their hidden state across calls; [`InferenceDriver::reset_state`] starts a
//! fresh sequence.

use crate::context::{ExecutionContext, LayerContext};
use crate::math::VectorOps;
use crate::network::Network;

/// Drives forward passes through a network, one sample at a time.
///
/// # Example
///
/// ```
/// use annt::inference::InferenceDriver;
/// use annt::layers::{ActivationKind, ActivationLayer, DenseLayer};
/// use annt::network::Network;
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut net = Network::new();
/// net.add(Box::new(DenseLayer::new(2, 3, &mut rng))).unwrap();
/// net.add(Box::new(ActivationLayer::new(ActivationKind::Sigmoid))).unwrap();
///
/// let mut driver = InferenceDriver::new();
/// let output = driver.run(&net, &[0.5, -0.5]);
/// assert_eq!(output.len(), 3);
/// ```
pub struct InferenceDriver {
    ctx: ExecutionContext,
    math: VectorOps,
    outputs: Vec<Vec<f32>>,
}

impl Default for InferenceDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceDriver {
    pub fn new() -> Self {
        Self {
            ctx: ExecutionContext::new(false),
            math: VectorOps::auto(),
            outputs: Vec::new(),
        }
    }

    /// Force the portable vector backend, mainly for tests.
    pub fn with_math(math: VectorOps) -> Self {
        Self {
            ctx: ExecutionContext::new(false),
            math,
            outputs: Vec::new(),
        }
    }

    /// Forget all recurrent hidden state, so the next sample starts a new
    /// sequence.
    pub fn reset_state(&mut self) {
        self.ctx.reset_state();
    }

    /// Run one sample through the network and return the final layer's
    /// output, valid until the next call.
    ///
    /// # Panics
    ///
    /// Panics if the network is empty or `input` does not match its input
    /// size.
    pub fn run(&mut self, network: &Network, input: &[f32]) -> &[f32] {
        assert!(!network.is_empty(), "cannot run an empty network");
        assert_eq!(
            input.len(),
            network.input_size(),
            "inference: bad input length"
        );

        self.ctx.prepare(network.layers(), 1);
        if self.outputs.len() != network.len() {
            self.outputs = network
                .layers()
                .iter()
                .map(|l| vec![0.0; l.output_size()])
                .collect();
        }

        for (index, layer) in network.layers().iter().enumerate() {
            // Split so the previous layer's output can be read while this
            // layer's is written.
            let (before, rest) = self.outputs.split_at_mut(index);
            let layer_input = if index == 0 {
                input
            } else {
                before[index - 1].as_slice()
            };
            let mut layer_ctx = LayerContext {
                samples: 1,
                training: false,
                sequence_length: self.ctx.sequence_length(),
                math: self.math,
                scratch: self.ctx.arena_mut(index),
            };
            layer.forward(layer_input, &mut rest[0], &mut layer_ctx);
        }
        self.outputs.last().map(|v| v.as_slice()).unwrap_or(&[])
    }
}
