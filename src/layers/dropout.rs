//! Dropout regularization layer.
//!
//! During training each value is dropped with probability `drop_rate` and the
//! survivors are scaled by `1 / (1 - drop_rate)`, so the expected activation
//! is unchanged and inference becomes a plain pass-through. The applied mask
//! is kept in scratch for the backward pass, which routes gradients only
//! through the kept units.
//!
//! The layer is shapeless: it adopts the size of whatever layer precedes it
//! when the network is assembled.

use std::cell::RefCell;

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::layers::r#trait::{Layer, LayerKind};
use crate::math::parallel::for_each_chunk;
use crate::utils::SimpleRng;

// Mask values are 0 for dropped units and the keep-scale for survivors, so
// both passes reduce to one multiply per value.
const BUF_MASK: usize = 0;

/// Inverted dropout.
///
/// # Example
///
/// ```
/// use annt::layers::{DropoutLayer, Layer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut drop = DropoutLayer::new(0.3, &mut rng);
/// assert_eq!(drop.input_size(), 0); // unconnected until the network sizes it
/// drop.set_input_size(128);
/// assert_eq!(drop.output_size(), 128);
/// ```
#[derive(Debug)]
pub struct DropoutLayer {
    size: usize,
    drop_rate: f32,
    // The generator advances on every forward call, hence the RefCell. It also
    // keeps this layer out of the rayon pool; masks are generated serially.
    rng: RefCell<SimpleRng>,
}

impl DropoutLayer {
    /// Create an unconnected dropout layer. The generator state is cloned so
    /// separately constructed layers draw independent masks.
    pub fn new(drop_rate: f32, rng: &mut SimpleRng) -> Self {
        assert!(
            (0.0..1.0).contains(&drop_rate),
            "drop_rate must be in range [0.0, 1.0)"
        );
        Self {
            size: 0,
            drop_rate,
            rng: RefCell::new(rng.clone()),
        }
    }

    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }
}

impl Layer for DropoutLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dropout
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

    fn scratch_spec(&self, training: bool) -> Vec<ScratchSpec> {
        if training {
            vec![ScratchSpec::float(BufferScope::PerSample, self.size)]
        } else {
            Vec::new()
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        assert!(self.size > 0, "dropout layer is not connected");
        let total = ctx.samples * self.size;
        assert_eq!(input.len(), total, "dropout forward: bad input length");
        assert_eq!(output.len(), total, "dropout forward: bad output length");

        if ctx.training {
            let scale = 1.0 / (1.0 - self.drop_rate);
            let mask = ctx.scratch.float_all_mut(BUF_MASK);
            let mut rng = self.rng.borrow_mut();
            for i in 0..total {
                let m = if rng.next_f32() >= self.drop_rate {
                    scale
                } else {
                    0.0
                };
                mask[i] = m;
                output[i] = input[i] * m;
            }
        } else {
            output.copy_from_slice(input);
        }
    }

    fn backward(
        &self,
        _input: &[f32],
        _output: &[f32],
        delta: &[f32],
        prev_delta: &mut [f32],
        _gradients: &mut [f32],
        ctx: &mut LayerContext<'_>,
    ) {
        let total = ctx.samples * self.size;
        assert_eq!(delta.len(), total, "dropout backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            total,
            "dropout backward: bad prev_delta length"
        );

        if ctx.training {
            let size = self.size;
            let mask_all = ctx.scratch.float_all(BUF_MASK);
            for_each_chunk(prev_delta, size, ctx.samples > 1, |s, prev| {
                let base = s * size;
                for (j, p) in prev.iter_mut().enumerate() {
                    *p = delta[base + j] * mask_all[base + j];
                }
            });
        } else {
            prev_delta.copy_from_slice(delta);
        }
    }
}
