//! Max and average pooling layers.
//!
//! Both variants share one core that resolves the window geometry at
//! construction into two index maps: `in2out` tells each input value which
//! output cell it feeds (or [`NOT_CONNECTED`]), `out2ins` lists each output
//! cell's in-bounds contributors. `Same` border handling never materializes
//! padding; border windows simply carry shorter contributor lists, which is
//! also why average pooling divides by the actual contributor count.
//!
//! Samples are laid out plane-major like the convolution layer's.

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::layers::conv2d::BorderMode;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::math::parallel::{for_each_chunk, for_each_chunk_pair};

/// Marker for inputs outside every pooling window.
pub const NOT_CONNECTED: usize = usize::MAX;

// Max pooling's winner records, one input index per output cell.
const BUF_WINNERS: usize = 0;

#[derive(Debug)]
struct PoolingCore {
    input_width: usize,
    input_height: usize,
    input_depth: usize,
    pool_width: usize,
    pool_height: usize,
    stride: usize,
    border_mode: BorderMode,
    out_width: usize,
    out_height: usize,
    in2out: Vec<usize>,
    out2ins: Vec<Vec<usize>>,
}

impl PoolingCore {
    fn new(input_width: usize, input_height: usize, input_depth: usize, pool_size: usize) -> Self {
        assert!(
            input_width > 0 && input_height > 0 && input_depth > 0,
            "pooling input dimensions must be positive"
        );
        assert!(pool_size > 0, "pool size must be positive");
        assert!(
            pool_size <= input_width && pool_size <= input_height,
            "pooling window must fit inside the input"
        );
        let mut core = Self {
            input_width,
            input_height,
            input_depth,
            pool_width: pool_size,
            pool_height: pool_size,
            stride: pool_size,
            border_mode: BorderMode::Valid,
            out_width: 0,
            out_height: 0,
            in2out: Vec::new(),
            out2ins: Vec::new(),
        };
        core.rebuild();
        core
    }

    // Recompute output dimensions and both index maps from the current
    // geometry. Called from the constructor and every builder.
    fn rebuild(&mut self) {
        let (left, right, top, bottom) = match self.border_mode {
            BorderMode::Valid => (0, 0, 0, 0),
            BorderMode::Same => {
                let px = self.pool_width - 1;
                let py = self.pool_height - 1;
                (px / 2, px - px / 2, py / 2, py - py / 2)
            }
        };
        self.out_width = (self.input_width + left + right - self.pool_width) / self.stride + 1;
        self.out_height = (self.input_height + top + bottom - self.pool_height) / self.stride + 1;

        let in_plane = self.input_width * self.input_height;
        let out_plane = self.out_width * self.out_height;
        self.in2out = vec![NOT_CONNECTED; self.input_depth * in_plane];
        self.out2ins = vec![Vec::new(); self.input_depth * out_plane];

        for d in 0..self.input_depth {
            for oy in 0..self.out_height {
                for ox in 0..self.out_width {
                    let out_idx = d * out_plane + oy * self.out_width + ox;
                    let mut ins = Vec::with_capacity(self.pool_width * self.pool_height);
                    for ky in 0..self.pool_height {
                        let y = (oy * self.stride + ky) as isize - top as isize;
                        if y < 0 || y >= self.input_height as isize {
                            continue;
                        }
                        for kx in 0..self.pool_width {
                            let x = (ox * self.stride + kx) as isize - left as isize;
                            if x < 0 || x >= self.input_width as isize {
                                continue;
                            }
                            let in_idx =
                                d * in_plane + y as usize * self.input_width + x as usize;
                            ins.push(in_idx);
                            self.in2out[in_idx] = out_idx;
                        }
                    }
                    self.out2ins[out_idx] = ins;
                }
            }
        }
    }

    fn input_size(&self) -> usize {
        self.input_depth * self.input_width * self.input_height
    }

    fn output_size(&self) -> usize {
        self.input_depth * self.out_width * self.out_height
    }

    fn forward_max(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(input.len(), n * in_size, "max pooling forward: bad input length");
        assert_eq!(
            output.len(),
            n * out_size,
            "max pooling forward: bad output length"
        );

        if ctx.training {
            let winners = ctx.scratch.index_all_mut(BUF_WINNERS);
            for_each_chunk_pair(output, out_size, winners, out_size, n > 1, |s, out, win| {
                let sample = &input[s * in_size..(s + 1) * in_size];
                for (o, ins) in self.out2ins.iter().enumerate() {
                    let mut best = ins[0];
                    let mut best_val = sample[best];
                    for &i in &ins[1..] {
                        if sample[i] > best_val {
                            best = i;
                            best_val = sample[i];
                        }
                    }
                    out[o] = best_val;
                    win[o] = best;
                }
            });
        } else {
            for_each_chunk(output, out_size, n > 1, |s, out| {
                let sample = &input[s * in_size..(s + 1) * in_size];
                for (o, ins) in self.out2ins.iter().enumerate() {
                    out[o] = ins
                        .iter()
                        .fold(f32::NEG_INFINITY, |acc, &i| acc.max(sample[i]));
                }
            });
        }
    }

    fn backward_max(&self, delta: &[f32], prev_delta: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(delta.len(), n * out_size, "max pooling backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * in_size,
            "max pooling backward: bad prev_delta length"
        );

        let winners_all = ctx.scratch.index_all(BUF_WINNERS);
        for_each_chunk(prev_delta, in_size, n > 1, |s, prev| {
            let del = &delta[s * out_size..(s + 1) * out_size];
            let win = &winners_all[s * out_size..(s + 1) * out_size];
            for (i, p) in prev.iter_mut().enumerate() {
                let o = self.in2out[i];
                *p = if o != NOT_CONNECTED && win[o] == i {
                    del[o]
                } else {
                    0.0
                };
            }
        });
    }

    fn forward_average(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(
            input.len(),
            n * in_size,
            "average pooling forward: bad input length"
        );
        assert_eq!(
            output.len(),
            n * out_size,
            "average pooling forward: bad output length"
        );

        for_each_chunk(output, out_size, n > 1, |s, out| {
            let sample = &input[s * in_size..(s + 1) * in_size];
            for (o, ins) in self.out2ins.iter().enumerate() {
                let sum: f32 = ins.iter().map(|&i| sample[i]).sum();
                out[o] = sum / ins.len() as f32;
            }
        });
    }

    fn backward_average(&self, delta: &[f32], prev_delta: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(
            delta.len(),
            n * out_size,
            "average pooling backward: bad delta length"
        );
        assert_eq!(
            prev_delta.len(),
            n * in_size,
            "average pooling backward: bad prev_delta length"
        );

        for_each_chunk(prev_delta, in_size, n > 1, |s, prev| {
            let del = &delta[s * out_size..(s + 1) * out_size];
            for (i, p) in prev.iter_mut().enumerate() {
                let o = self.in2out[i];
                *p = if o != NOT_CONNECTED {
                    del[o] / self.out2ins[o].len() as f32
                } else {
                    0.0
                };
            }
        });
    }
}

/// Max pooling: each output cell is the largest value of its window.
///
/// During training the winning input index is recorded per output cell so the
/// backward pass can hand the whole delta to the winner and zero to the rest.
///
/// # Example
///
/// ```
/// use annt::layers::{Layer, MaxPoolingLayer};
///
/// let pool = MaxPoolingLayer::new(4, 4, 1, 2);
/// assert_eq!(pool.input_size(), 16);
/// assert_eq!(pool.output_size(), 4);
/// ```
#[derive(Debug)]
pub struct MaxPoolingLayer {
    core: PoolingCore,
}

impl MaxPoolingLayer {
    /// Square `pool_size` window with stride equal to the window, `Valid`
    /// borders.
    pub fn new(input_width: usize, input_height: usize, input_depth: usize, pool_size: usize) -> Self {
        Self {
            core: PoolingCore::new(input_width, input_height, input_depth, pool_size),
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        assert!(stride > 0, "stride must be positive");
        self.core.stride = stride;
        self.core.rebuild();
        self
    }

    pub fn with_border_mode(mut self, mode: BorderMode) -> Self {
        self.core.border_mode = mode;
        self.core.rebuild();
        self
    }

    /// `(width, height)` of each output plane.
    pub fn output_dims(&self) -> (usize, usize) {
        (self.core.out_width, self.core.out_height)
    }
}

impl Layer for MaxPoolingLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::MaxPooling
    }

    fn input_size(&self) -> usize {
        self.core.input_size()
    }

    fn output_size(&self) -> usize {
        self.core.output_size()
    }

    fn scratch_spec(&self, training: bool) -> Vec<ScratchSpec> {
        if training {
            vec![ScratchSpec::index(
                BufferScope::PerSample,
                self.core.output_size(),
            )]
        } else {
            Vec::new()
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        self.core.forward_max(input, output, ctx);
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
        self.core.backward_max(delta, prev_delta, ctx);
    }
}

/// Average pooling: each output cell is the mean of its window's in-bounds
/// contributors, so `Same`-mode border cells still average to sensible values.
///
/// # Example
///
/// ```
/// use annt::layers::{AveragePoolingLayer, Layer};
///
/// let pool = AveragePoolingLayer::new(6, 6, 3, 2);
/// assert_eq!(pool.output_size(), 3 * 3 * 3);
/// ```
#[derive(Debug)]
pub struct AveragePoolingLayer {
    core: PoolingCore,
}

impl AveragePoolingLayer {
    /// Square `pool_size` window with stride equal to the window, `Valid`
    /// borders.
    pub fn new(input_width: usize, input_height: usize, input_depth: usize, pool_size: usize) -> Self {
        Self {
            core: PoolingCore::new(input_width, input_height, input_depth, pool_size),
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        assert!(stride > 0, "stride must be positive");
        self.core.stride = stride;
        self.core.rebuild();
        self
    }

    pub fn with_border_mode(mut self, mode: BorderMode) -> Self {
        self.core.border_mode = mode;
        self.core.rebuild();
        self
    }

    /// `(width, height)` of each output plane.
    pub fn output_dims(&self) -> (usize, usize) {
        (self.core.out_width, self.core.out_height)
    }
}

impl Layer for AveragePoolingLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::AveragePooling
    }

    fn input_size(&self) -> usize {
        self.core.input_size()
    }

    fn output_size(&self) -> usize {
        self.core.output_size()
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        self.core.forward_average(input, output, ctx);
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
        self.core.backward_average(delta, prev_delta, ctx);
    }
}
