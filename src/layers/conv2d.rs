//! 2D convolution layer.
//!
//! Slides a bank of learnable kernels over a stack of input feature maps and
//! produces one output map per kernel. Border handling follows the usual two
//! modes: `Valid` keeps the kernel inside the input, `Same` zero-pads so a
//! stride-1 convolution preserves the spatial dimensions. A connection table
//! can restrict which input maps feed which kernels.
//!
//! A sample is laid out plane-major: `depth` planes of `height * width`
//! values each, rows contiguous.

use std::io::{Read, Write};

use log::warn;

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::error::Result;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{init_limit, read_f32s, write_f32s};
use crate::math::parallel::{for_each_chunk, for_each_chunk_pair};
use crate::math::VectorOps;
use crate::utils::SimpleRng;

/// Border handling of convolution and pooling layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderMode {
    /// The kernel never leaves the input; output shrinks by `kernel - 1`.
    Valid,
    /// Zero-pad so that a stride-1 pass preserves the input dimensions.
    Same,
}

// Scratch buffer ids, materialized in Same mode only. The padded input is
// written by forward and read again by the weight-gradient pass; the padded
// delta collects backward contributions before the border is cut away.
const BUF_PADDED_IN: usize = 0;
const BUF_PADDED_DELTA: usize = 1;

/// Convolution layer: `kernel_count` kernels of
/// `input_depth * kernel_height * kernel_width` weights plus one bias each.
///
/// # Example
///
/// ```
/// use annt::layers::{BorderMode, Conv2DLayer, Layer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// // 28x28 grayscale input, eight 3x3 kernels, no padding.
/// let conv = Conv2DLayer::new(28, 28, 1, 8, 3, 3, &mut rng);
/// assert_eq!(conv.output_dims(), (26, 26));
/// assert_eq!(conv.output_size(), 8 * 26 * 26);
///
/// let padded = Conv2DLayer::new(28, 28, 1, 8, 3, 3, &mut rng)
///     .with_border_mode(BorderMode::Same);
/// assert_eq!(padded.output_dims(), (28, 28));
/// ```
#[derive(Debug)]
pub struct Conv2DLayer {
    input_width: usize,
    input_height: usize,
    input_depth: usize,
    kernel_width: usize,
    kernel_height: usize,
    kernel_count: usize,
    stride: usize,
    border_mode: BorderMode,
    // kernel_count * input_depth flags; all true when fully connected.
    connections: Vec<bool>,
    // [kernel][depth][ky][kx]
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl Conv2DLayer {
    /// Create a fully connected stride-1 `Valid` convolution with randomized
    /// weights. Border mode, stride and connection table are adjusted with
    /// the `with_*` builders.
    pub fn new(
        input_width: usize,
        input_height: usize,
        input_depth: usize,
        kernel_count: usize,
        kernel_width: usize,
        kernel_height: usize,
        rng: &mut SimpleRng,
    ) -> Self {
        assert!(
            input_width > 0 && input_height > 0 && input_depth > 0,
            "convolution input dimensions must be positive"
        );
        assert!(
            kernel_count > 0 && kernel_width > 0 && kernel_height > 0,
            "convolution kernel dimensions must be positive"
        );
        assert!(
            kernel_width <= input_width && kernel_height <= input_height,
            "kernel must fit inside the input"
        );

        let weight_count = kernel_count * input_depth * kernel_width * kernel_height;
        let mut layer = Self {
            input_width,
            input_height,
            input_depth,
            kernel_width,
            kernel_height,
            kernel_count,
            stride: 1,
            border_mode: BorderMode::Valid,
            connections: vec![true; kernel_count * input_depth],
            weights: vec![0.0; weight_count],
            biases: vec![0.0; kernel_count],
        };
        layer.randomize(rng);
        layer
    }

    pub fn with_border_mode(mut self, mode: BorderMode) -> Self {
        self.border_mode = mode;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        assert!(stride > 0, "stride must be positive");
        self.stride = stride;
        self
    }

    /// Restrict which input maps feed which kernels. The table holds
    /// `kernel_count * input_depth` flags, kernel-major. A table of the wrong
    /// length falls back to full connectivity.
    pub fn with_connections(mut self, table: Vec<bool>) -> Self {
        if table.len() == self.kernel_count * self.input_depth {
            self.connections = table;
        } else {
            warn!(
                "connection table of length {} does not match {} kernels x {} input maps, using full connectivity",
                table.len(),
                self.kernel_count,
                self.input_depth
            );
        }
        self
    }

    pub fn kernel_count(&self) -> usize {
        self.kernel_count
    }

    pub fn border_mode(&self) -> BorderMode {
        self.border_mode
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// `(width, height)` of each output feature map.
    pub fn output_dims(&self) -> (usize, usize) {
        let (pw, ph) = self.padded_dims();
        (
            (pw - self.kernel_width) / self.stride + 1,
            (ph - self.kernel_height) / self.stride + 1,
        )
    }

    // (left, right, top, bottom) zero rows/columns added around the input.
    fn padding(&self) -> (usize, usize, usize, usize) {
        match self.border_mode {
            BorderMode::Valid => (0, 0, 0, 0),
            BorderMode::Same => {
                let px = self.kernel_width - 1;
                let py = self.kernel_height - 1;
                (px / 2, px - px / 2, py / 2, py - py / 2)
            }
        }
    }

    fn padded_dims(&self) -> (usize, usize) {
        let (l, r, t, b) = self.padding();
        (self.input_width + l + r, self.input_height + t + b)
    }

    fn padded_size(&self) -> usize {
        let (pw, ph) = self.padded_dims();
        self.input_depth * pw * ph
    }

    fn kernel_span(&self) -> usize {
        self.input_depth * self.kernel_height * self.kernel_width
    }

    fn connected(&self, kernel: usize, depth: usize) -> bool {
        self.connections[kernel * self.input_depth + depth]
    }

    // Copy one sample into the interior of its padded slot. The border is
    // never written and stays zero from the arena build.
    fn pad_input(&self, src: &[f32], dst: &mut [f32]) {
        let (pw, ph) = self.padded_dims();
        let (left, _, top, _) = self.padding();
        let p_plane = pw * ph;
        let in_plane = self.input_width * self.input_height;
        for d in 0..self.input_depth {
            for y in 0..self.input_height {
                let src_row = d * in_plane + y * self.input_width;
                let dst_row = d * p_plane + (y + top) * pw + left;
                dst[dst_row..dst_row + self.input_width]
                    .copy_from_slice(&src[src_row..src_row + self.input_width]);
            }
        }
    }

    fn unpad(&self, src: &[f32], dst: &mut [f32]) {
        let (pw, ph) = self.padded_dims();
        let (left, _, top, _) = self.padding();
        let p_plane = pw * ph;
        let in_plane = self.input_width * self.input_height;
        for d in 0..self.input_depth {
            for y in 0..self.input_height {
                let src_row = d * p_plane + (y + top) * pw + left;
                let dst_row = d * in_plane + y * self.input_width;
                dst[dst_row..dst_row + self.input_width]
                    .copy_from_slice(&src[src_row..src_row + self.input_width]);
            }
        }
    }

    // Cross-correlate one (padded) sample with every kernel. Inner rows are
    // contiguous in both the kernel and the input, so they reduce to dots.
    fn convolve_sample(&self, src: &[f32], out: &mut [f32], math: VectorOps) {
        let (pw, ph) = self.padded_dims();
        let p_plane = pw * ph;
        let (ow, oh) = self.output_dims();
        let out_plane = ow * oh;
        let kernel_plane = self.kernel_height * self.kernel_width;
        let span = self.kernel_span();

        for k in 0..self.kernel_count {
            let w_k = &self.weights[k * span..(k + 1) * span];
            let out_k = &mut out[k * out_plane..(k + 1) * out_plane];
            for oy in 0..oh {
                let iy = oy * self.stride;
                for ox in 0..ow {
                    let ix = ox * self.stride;
                    let mut sum = self.biases[k];
                    for d in 0..self.input_depth {
                        if !self.connected(k, d) {
                            continue;
                        }
                        let plane = &src[d * p_plane..(d + 1) * p_plane];
                        let w_d = &w_k[d * kernel_plane..(d + 1) * kernel_plane];
                        for ky in 0..self.kernel_height {
                            let row = (iy + ky) * pw + ix;
                            sum += math.dot(
                                &w_d[ky * self.kernel_width..(ky + 1) * self.kernel_width],
                                &plane[row..row + self.kernel_width],
                            );
                        }
                    }
                    out_k[oy * ow + ox] = sum;
                }
            }
        }
    }

    // Scatter one sample's output delta back through the kernels into padded
    // input coordinates. `pad_delta` must come in zeroed.
    fn scatter_delta(&self, delta_s: &[f32], pad_delta: &mut [f32]) {
        let (pw, ph) = self.padded_dims();
        let p_plane = pw * ph;
        let (ow, oh) = self.output_dims();
        let out_plane = ow * oh;
        let kernel_plane = self.kernel_height * self.kernel_width;
        let span = self.kernel_span();

        for k in 0..self.kernel_count {
            let w_k = &self.weights[k * span..(k + 1) * span];
            let del_k = &delta_s[k * out_plane..(k + 1) * out_plane];
            for oy in 0..oh {
                let iy = oy * self.stride;
                for ox in 0..ow {
                    let ix = ox * self.stride;
                    let e = del_k[oy * ow + ox];
                    for d in 0..self.input_depth {
                        if !self.connected(k, d) {
                            continue;
                        }
                        let w_d = &w_k[d * kernel_plane..(d + 1) * kernel_plane];
                        for ky in 0..self.kernel_height {
                            let row = d * p_plane + (iy + ky) * pw + ix;
                            for kx in 0..self.kernel_width {
                                pad_delta[row + kx] += e * w_d[ky * self.kernel_width + kx];
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Layer for Conv2DLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Conv2D
    }

    fn input_size(&self) -> usize {
        self.input_depth * self.input_width * self.input_height
    }

    fn output_size(&self) -> usize {
        let (ow, oh) = self.output_dims();
        self.kernel_count * ow * oh
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn scratch_spec(&self, training: bool) -> Vec<ScratchSpec> {
        let mut specs = Vec::new();
        if self.border_mode == BorderMode::Same {
            specs.push(ScratchSpec::float(BufferScope::PerSample, self.padded_size()));
            if training {
                specs.push(ScratchSpec::float(BufferScope::PerSample, self.padded_size()));
            }
        }
        specs
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(input.len(), n * in_size, "conv forward: bad input length");
        assert_eq!(output.len(), n * out_size, "conv forward: bad output length");

        let math = ctx.math;
        match self.border_mode {
            BorderMode::Same => {
                let psize = self.padded_size();
                {
                    let padded_all = ctx.scratch.float_all_mut(BUF_PADDED_IN);
                    for_each_chunk(padded_all, psize, n > 1, |s, pad| {
                        self.pad_input(&input[s * in_size..(s + 1) * in_size], pad);
                    });
                }
                let padded_all = ctx.scratch.float_all(BUF_PADDED_IN);
                for_each_chunk(output, out_size, n > 1, |s, out| {
                    self.convolve_sample(&padded_all[s * psize..(s + 1) * psize], out, math);
                });
            }
            BorderMode::Valid => {
                for_each_chunk(output, out_size, n > 1, |s, out| {
                    self.convolve_sample(&input[s * in_size..(s + 1) * in_size], out, math);
                });
            }
        }
    }

    fn backward(
        &self,
        input: &[f32],
        _output: &[f32],
        delta: &[f32],
        prev_delta: &mut [f32],
        gradients: &mut [f32],
        ctx: &mut LayerContext<'_>,
    ) {
        let n = ctx.samples;
        let in_size = self.input_size();
        let out_size = self.output_size();
        assert_eq!(delta.len(), n * out_size, "conv backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * in_size,
            "conv backward: bad prev_delta length"
        );
        assert_eq!(
            gradients.len(),
            self.parameter_count(),
            "conv backward: bad gradient length"
        );

        // Route deltas back to the inputs, per sample.
        match self.border_mode {
            BorderMode::Same => {
                let psize = self.padded_size();
                let padded_delta = ctx.scratch.float_all_mut(BUF_PADDED_DELTA);
                for_each_chunk_pair(prev_delta, in_size, padded_delta, psize, n > 1, |s, prev, pad| {
                    pad.fill(0.0);
                    self.scatter_delta(&delta[s * out_size..(s + 1) * out_size], pad);
                    self.unpad(pad, prev);
                });
            }
            BorderMode::Valid => {
                for_each_chunk(prev_delta, in_size, n > 1, |s, prev| {
                    prev.fill(0.0);
                    self.scatter_delta(&delta[s * out_size..(s + 1) * out_size], prev);
                });
            }
        }

        // Weight and bias gradients, per kernel so accumulators stay disjoint.
        let (pw, ph) = self.padded_dims();
        let p_plane = pw * ph;
        let (ow, oh) = self.output_dims();
        let out_plane = ow * oh;
        let kernel_plane = self.kernel_height * self.kernel_width;
        let span = self.kernel_span();
        let src_all: &[f32] = match self.border_mode {
            BorderMode::Same => ctx.scratch.float_all(BUF_PADDED_IN),
            BorderMode::Valid => input,
        };
        let src_size = self.padded_size();

        let (grad_w, grad_b) = gradients.split_at_mut(self.weights.len());
        for_each_chunk_pair(grad_w, span, grad_b, 1, self.kernel_count > 1, |k, gw, gb| {
            for s in 0..n {
                let src = &src_all[s * src_size..(s + 1) * src_size];
                let del_k = &delta[s * out_size + k * out_plane..s * out_size + (k + 1) * out_plane];
                for oy in 0..oh {
                    let iy = oy * self.stride;
                    for ox in 0..ow {
                        let ix = ox * self.stride;
                        let e = del_k[oy * ow + ox];
                        gb[0] += e;
                        for d in 0..self.input_depth {
                            if !self.connected(k, d) {
                                continue;
                            }
                            let gw_d = &mut gw[d * kernel_plane..(d + 1) * kernel_plane];
                            for ky in 0..self.kernel_height {
                                let row = d * p_plane + (iy + ky) * pw + ix;
                                for kx in 0..self.kernel_width {
                                    gw_d[ky * self.kernel_width + kx] += e * src[row + kx];
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        let limit = init_limit(self.kernel_span());
        rng.fill_symmetric(&mut self.weights, limit);
        self.biases.fill(0.0);
    }

    fn add_to_parameters(&mut self, updates: &[f32]) {
        assert_eq!(
            updates.len(),
            self.parameter_count(),
            "conv update: bad update length"
        );
        let (w_upd, b_upd) = updates.split_at(self.weights.len());
        for (w, u) in self.weights.iter_mut().zip(w_upd) {
            *w += u;
        }
        for (b, u) in self.biases.iter_mut().zip(b_upd) {
            *b += u;
        }
    }

    fn save_params(&self, writer: &mut dyn Write) -> Result<()> {
        write_f32s(writer, &self.weights)?;
        write_f32s(writer, &self.biases)
    }

    fn load_params(&mut self, reader: &mut dyn Read) -> Result<()> {
        read_f32s(reader, &mut self.weights)?;
        read_f32s(reader, &mut self.biases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScratchArena;
    use approx::assert_relative_eq;

    fn run<F>(layer: &Conv2DLayer, samples: usize, training: bool, body: F)
    where
        F: FnOnce(&Conv2DLayer, &mut LayerContext<'_>),
    {
        let mut arena = ScratchArena::build(layer.scratch_spec(training), samples, 1);
        let mut ctx = LayerContext {
            samples,
            training,
            sequence_length: 1,
            math: VectorOps::auto(),
            scratch: &mut arena,
        };
        body(layer, &mut ctx);
    }

    #[test]
    fn output_dims_follow_border_mode_and_stride() {
        let mut rng = SimpleRng::new(1);
        let valid = Conv2DLayer::new(28, 28, 1, 4, 3, 3, &mut rng);
        assert_eq!(valid.output_dims(), (26, 26));

        let same = Conv2DLayer::new(28, 28, 1, 4, 3, 3, &mut rng)
            .with_border_mode(BorderMode::Same);
        assert_eq!(same.output_dims(), (28, 28));

        let strided = Conv2DLayer::new(28, 28, 1, 4, 4, 4, &mut rng).with_stride(2);
        assert_eq!(strided.output_dims(), (13, 13));
    }

    #[test]
    fn forward_matches_hand_computed_windows() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(3, 3, 1, 1, 2, 2, &mut rng);
        layer.weights = vec![1.0; 4];
        layer.biases = vec![0.5];

        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut output = vec![0.0; 4];
        run(&layer, 1, false, |l, ctx| l.forward(&input, &mut output, ctx));

        assert_eq!(output, vec![12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn same_mode_pads_with_zeros() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(2, 2, 1, 1, 3, 3, &mut rng)
            .with_border_mode(BorderMode::Same);
        layer.weights = vec![1.0; 9];
        layer.biases = vec![0.0];

        // Every 3x3 window over the zero-padded 2x2 covers all four inputs.
        let input = vec![1.0; 4];
        let mut output = vec![0.0; 4];
        run(&layer, 1, false, |l, ctx| l.forward(&input, &mut output, ctx));

        assert_eq!(output, vec![4.0; 4]);
    }

    #[test]
    fn stride_two_sums_disjoint_blocks() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(4, 4, 1, 1, 2, 2, &mut rng).with_stride(2);
        layer.weights = vec![1.0; 4];
        layer.biases = vec![0.0];

        let input: Vec<f32> = (1..=16).map(|v| v as f32).collect();
        let mut output = vec![0.0; 4];
        run(&layer, 1, false, |l, ctx| l.forward(&input, &mut output, ctx));

        // Quadrant sums of the 4x4 grid 1..16.
        assert_eq!(output, vec![14.0, 22.0, 46.0, 54.0]);
    }

    #[test]
    fn connection_table_masks_input_maps() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(1, 1, 2, 2, 1, 1, &mut rng)
            .with_connections(vec![true, false, false, true]);
        layer.weights = vec![1.0; 4];
        layer.biases = vec![0.0; 2];

        let input = vec![3.0, 5.0];
        let mut output = vec![0.0; 2];
        run(&layer, 1, false, |l, ctx| l.forward(&input, &mut output, ctx));

        assert_eq!(output, vec![3.0, 5.0]);
    }

    #[test]
    fn wrong_length_connection_table_keeps_full_connectivity() {
        let mut rng = SimpleRng::new(7);
        let layer = Conv2DLayer::new(1, 1, 2, 2, 1, 1, &mut rng)
            .with_connections(vec![true; 3]);
        assert!(layer.connections.iter().all(|&c| c));
        assert_eq!(layer.connections.len(), 4);
    }

    #[test]
    fn backward_routes_deltas_and_accumulates_gradients() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(2, 1, 1, 1, 2, 1, &mut rng);
        layer.weights = vec![2.0, 3.0];
        layer.biases = vec![0.0];

        let input = vec![4.0, 7.0];
        let output = vec![0.0; 1];
        let delta = vec![1.0];
        let mut prev = vec![0.0; 2];
        let mut grads = vec![0.0; layer.parameter_count()];
        run(&layer, 1, true, |l, ctx| {
            l.backward(&input, &output, &delta, &mut prev, &mut grads, ctx)
        });

        assert_eq!(prev, vec![2.0, 3.0]);
        assert_eq!(grads, vec![4.0, 7.0, 1.0]);

        // Gradients accumulate across calls.
        run(&layer, 1, true, |l, ctx| {
            l.backward(&input, &output, &delta, &mut prev, &mut grads, ctx)
        });
        assert_eq!(grads, vec![8.0, 14.0, 2.0]);
    }

    #[test]
    fn same_mode_backward_ignores_border_contributions() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(1, 1, 1, 1, 3, 3, &mut rng)
            .with_border_mode(BorderMode::Same);
        layer.weights = (0..9).map(|v| v as f32).collect();
        layer.biases = vec![0.0];

        let input = vec![6.0];
        let mut output = vec![0.0; 1];
        let delta = vec![2.0];
        let mut prev = vec![0.0; 1];
        let mut grads = vec![0.0; layer.parameter_count()];
        run(&layer, 1, true, |l, ctx| {
            l.forward(&input, &mut output, ctx);
            l.backward(&input, &output, &delta, &mut prev, &mut grads, ctx);
        });

        // Only the center tap sees the lone input value.
        assert_relative_eq!(output[0], 4.0 * 6.0, epsilon = 1e-6);
        assert_relative_eq!(prev[0], 2.0 * 4.0, epsilon = 1e-6);
        let mut expected_w = vec![0.0; 9];
        expected_w[4] = 2.0 * 6.0;
        assert_eq!(&grads[..9], expected_w.as_slice());
        assert_eq!(grads[9], 2.0);
    }

    #[test]
    fn batched_samples_convolve_independently() {
        let mut rng = SimpleRng::new(7);
        let mut layer = Conv2DLayer::new(2, 2, 1, 1, 2, 2, &mut rng);
        layer.weights = vec![1.0; 4];
        layer.biases = vec![0.0];

        let input = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
        let mut output = vec![0.0; 2];
        run(&layer, 2, false, |l, ctx| l.forward(&input, &mut output, ctx));

        assert_eq!(output, vec![4.0, 8.0]);
    }

    #[test]
    fn parameters_round_trip_through_bytes() {
        let mut rng = SimpleRng::new(9);
        let layer = Conv2DLayer::new(4, 4, 2, 3, 2, 2, &mut rng);
        let mut bytes = Vec::new();
        layer.save_params(&mut bytes).unwrap();
        assert_eq!(bytes.len(), layer.parameter_count() * 4);

        let mut restored = Conv2DLayer::new(4, 4, 2, 3, 2, 2, &mut SimpleRng::new(1));
        restored.load_params(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.weights, layer.weights);
        assert_eq!(restored.biases, layer.biases);
    }

    #[test]
    fn same_seed_randomizes_identically() {
        let mut rng1 = SimpleRng::new(12345);
        let layer1 = Conv2DLayer::new(8, 8, 3, 4, 3, 3, &mut rng1);
        let mut rng2 = SimpleRng::new(12345);
        let layer2 = Conv2DLayer::new(8, 8, 3, 4, 3, 3, &mut rng2);
        assert_eq!(layer1.weights, layer2.weights);
    }
}
