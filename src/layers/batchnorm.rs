//! Batch normalization layer.
//!
//! Normalizes each channel over the spatial extent of every sample in the
//! batch. Training mode uses the batch's own statistics and folds them into
//! running (EMA) estimates; inference mode normalizes with the running
//! estimates only. The layer has no learnable scale/shift, but its running
//! statistics persist in saved models since inference depends on them.
//!
//! A sample is laid out channel-major: `channels * spatial_size` values with
//! the `spatial_size` values of channel 0 first.

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::error::Result;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{read_f32s, write_f32s};
use crate::math::parallel::{for_each_chunk, for_each_chunk_pair};

const DEFAULT_MOMENTUM: f32 = 0.999;
const EPSILON: f32 = 1e-5;

// Scratch buffer ids. BUF_STDDEV holds the raw batch variance until the
// running statistics are updated, then the standard deviation.
const BUF_STDDEV: usize = 0;
const BUF_MEAN: usize = 1;
const BUF_DELTA_MEAN: usize = 2;
const BUF_DELTA_DOT_MEAN: usize = 3;

/// Per-channel batch normalization.
///
/// # Example
///
/// ```
/// use annt::layers::{BatchNormLayer, Layer};
///
/// // 8 feature maps of 5x5 values each.
/// let bn = BatchNormLayer::new(8, 25);
/// assert_eq!(bn.input_size(), 200);
/// assert_eq!(bn.output_size(), 200);
/// assert_eq!(bn.parameter_count(), 0);
/// ```
#[derive(Debug)]
pub struct BatchNormLayer {
    channels: usize,
    spatial_size: usize,
    momentum: f32,
    running_mean: RefCell<Vec<f32>>,
    running_var: RefCell<Vec<f32>>,
    // The first batch copies its statistics directly instead of blending.
    initialized: Cell<bool>,
}

impl BatchNormLayer {
    /// Create a layer for `channels` feature maps of `spatial_size` values
    /// each.
    pub fn new(channels: usize, spatial_size: usize) -> Self {
        assert!(
            channels > 0 && spatial_size > 0,
            "batch norm dimensions must be positive"
        );
        Self {
            channels,
            spatial_size,
            momentum: DEFAULT_MOMENTUM,
            running_mean: RefCell::new(vec![0.0; channels]),
            running_var: RefCell::new(vec![1.0; channels]),
            initialized: Cell::new(false),
        }
    }

    /// One channel per value, for normalizing flat feature vectors.
    pub fn per_feature(features: usize) -> Self {
        Self::new(features, 1)
    }

    /// Override the running-statistics momentum (default 0.999).
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&momentum),
            "momentum must be in range [0.0, 1.0)"
        );
        self.momentum = momentum;
        self
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Copy of the running per-channel means.
    pub fn running_mean(&self) -> Vec<f32> {
        self.running_mean.borrow().clone()
    }

    /// Copy of the running per-channel variances.
    pub fn running_variance(&self) -> Vec<f32> {
        self.running_var.borrow().clone()
    }
}

impl Layer for BatchNormLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::BatchNorm
    }

    fn input_size(&self) -> usize {
        self.channels * self.spatial_size
    }

    fn output_size(&self) -> usize {
        self.channels * self.spatial_size
    }

    fn scratch_spec(&self, training: bool) -> Vec<ScratchSpec> {
        let mut specs = vec![
            ScratchSpec::float(BufferScope::PerBatch, self.channels),
            ScratchSpec::float(BufferScope::PerBatch, self.channels),
        ];
        if training {
            specs.push(ScratchSpec::float(BufferScope::PerBatch, self.channels));
            specs.push(ScratchSpec::float(BufferScope::PerBatch, self.channels));
        }
        specs
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let sample_size = self.input_size();
        let spatial = self.spatial_size;
        let channels = self.channels;
        assert_eq!(
            input.len(),
            n * sample_size,
            "batch norm forward: bad input length"
        );
        assert_eq!(
            output.len(),
            n * sample_size,
            "batch norm forward: bad output length"
        );

        if ctx.training {
            // Per-channel mean and (biased) variance over samples x spatial.
            let count = (n * spatial) as f32;
            {
                let [var_all, mean_all] = ctx.scratch.float_bufs_mut([BUF_STDDEV, BUF_MEAN]);
                for_each_chunk_pair(mean_all, 1, var_all, 1, channels > 1, |c, mean, var| {
                    let mut sum = 0.0f32;
                    for s in 0..n {
                        let base = s * sample_size + c * spatial;
                        for &x in &input[base..base + spatial] {
                            sum += x;
                        }
                    }
                    let m = sum / count;
                    let mut sq = 0.0f32;
                    for s in 0..n {
                        let base = s * sample_size + c * spatial;
                        for &x in &input[base..base + spatial] {
                            let d = x - m;
                            sq += d * d;
                        }
                    }
                    mean[0] = m;
                    var[0] = sq / count;
                });
            }

            // Fold into the running estimates, then turn variance into stddev.
            {
                let mean_all = ctx.scratch.float(BUF_MEAN, 0);
                let var_all = ctx.scratch.float(BUF_STDDEV, 0);
                let mut running_mean = self.running_mean.borrow_mut();
                let mut running_var = self.running_var.borrow_mut();
                if self.initialized.get() {
                    let m = self.momentum;
                    for c in 0..channels {
                        running_mean[c] = m * running_mean[c] + (1.0 - m) * mean_all[c];
                        running_var[c] = m * running_var[c] + (1.0 - m) * var_all[c];
                    }
                } else {
                    running_mean.copy_from_slice(mean_all);
                    running_var.copy_from_slice(var_all);
                    self.initialized.set(true);
                }
            }
            for v in ctx.scratch.float_mut(BUF_STDDEV, 0).iter_mut() {
                *v = (*v + EPSILON).sqrt();
            }

            let mean_all = ctx.scratch.float(BUF_MEAN, 0);
            let stddev_all = ctx.scratch.float(BUF_STDDEV, 0);
            normalize(input, output, n, sample_size, spatial, mean_all, stddev_all);
        } else {
            // Inference: stddev derived from the running variance each call.
            {
                let running_var = self.running_var.borrow();
                let stddev_all = ctx.scratch.float_mut(BUF_STDDEV, 0);
                for (sd, &v) in stddev_all.iter_mut().zip(running_var.iter()) {
                    *sd = (v + EPSILON).sqrt();
                }
            }
            let running_mean = self.running_mean.borrow();
            let mean_all: &[f32] = &running_mean;
            let stddev_all = ctx.scratch.float(BUF_STDDEV, 0);
            normalize(input, output, n, sample_size, spatial, mean_all, stddev_all);
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
        assert!(ctx.training, "batch norm backward requires a training context");
        let n = ctx.samples;
        let sample_size = self.input_size();
        let spatial = self.spatial_size;
        let channels = self.channels;
        assert_eq!(
            delta.len(),
            n * sample_size,
            "batch norm backward: bad delta length"
        );
        assert_eq!(
            prev_delta.len(),
            n * sample_size,
            "batch norm backward: bad prev_delta length"
        );

        let count = (n * spatial) as f32;
        {
            let [d_mean_all, dy_mean_all] = ctx
                .scratch
                .float_bufs_mut([BUF_DELTA_MEAN, BUF_DELTA_DOT_MEAN]);
            for_each_chunk_pair(d_mean_all, 1, dy_mean_all, 1, channels > 1, |c, dm, dym| {
                let mut sum = 0.0f32;
                let mut dot = 0.0f32;
                for s in 0..n {
                    let base = s * sample_size + c * spatial;
                    for p in 0..spatial {
                        let d = delta[base + p];
                        sum += d;
                        dot += d * output[base + p];
                    }
                }
                dm[0] = sum / count;
                dym[0] = dot / count;
            });
        }

        // prev = (delta - mean(delta) - mean(delta*output) * output) / stddev,
        // with stddev as saved by the paired forward call.
        let d_mean_all = ctx.scratch.float(BUF_DELTA_MEAN, 0);
        let dy_mean_all = ctx.scratch.float(BUF_DELTA_DOT_MEAN, 0);
        let stddev_all = ctx.scratch.float(BUF_STDDEV, 0);
        for_each_chunk(prev_delta, sample_size, n > 1, |s, prev| {
            for c in 0..channels {
                let base = s * sample_size + c * spatial;
                let local = c * spatial;
                for p in 0..spatial {
                    prev[local + p] = (delta[base + p]
                        - d_mean_all[c]
                        - dy_mean_all[c] * output[base + p])
                        / stddev_all[c];
                }
            }
        });
    }

    fn saved_param_count(&self) -> usize {
        2 * self.channels
    }

    fn save_params(&self, writer: &mut dyn Write) -> Result<()> {
        write_f32s(writer, &self.running_mean.borrow())?;
        write_f32s(writer, &self.running_var.borrow())
    }

    fn load_params(&mut self, reader: &mut dyn Read) -> Result<()> {
        read_f32s(reader, &mut self.running_mean.borrow_mut())?;
        read_f32s(reader, &mut self.running_var.borrow_mut())?;
        self.initialized.set(true);
        Ok(())
    }
}

fn normalize(
    input: &[f32],
    output: &mut [f32],
    samples: usize,
    sample_size: usize,
    spatial: usize,
    mean: &[f32],
    stddev: &[f32],
) {
    let channels = mean.len();
    for_each_chunk(output, sample_size, samples > 1, |s, out| {
        for c in 0..channels {
            let base = s * sample_size + c * spatial;
            let local = c * spatial;
            for p in 0..spatial {
                out[local + p] = (input[base + p] - mean[c]) / stddev[c];
            }
        }
    });
}
