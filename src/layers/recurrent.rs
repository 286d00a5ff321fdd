//! Vanilla recurrent layer.
//!
//! Each step blends the current input with the previous hidden state and
//! projects the result to the layer output:
//!
//! ```text
//! H(t) = tanh(U X(t) + W H(t-1) + B)
//! O(t) = V H(t) + C
//! ```
//!
//! The hidden state has the layer's output size. Batches are grouped into
//! sequences of `ctx.sequence_length` consecutive samples; each sequence keeps
//! its own hidden state, which survives across calls until the execution
//! context's state reset. Samples are processed strictly in order, so this
//! layer never enters the thread pool.

use std::io::{Read, Write};

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::error::Result;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{init_limit, read_f32s, write_f32s};
use crate::utils::SimpleRng;

// Scratch layout. Inference uses [history, scratch hidden]; training swaps the
// per-batch hidden for per-sample saves of H(t) and H(t-1) plus the backward
// carry and two per-batch work vectors.
const BUF_HISTORY: usize = 0;
const BUF_INFER_H: usize = 1;
const BUF_CARRY: usize = 1;
const BUF_H_SAVE: usize = 2;
const BUF_H_PREV: usize = 3;
const BUF_DH: usize = 4;
const BUF_DU: usize = 5;

/// Basic tanh recurrence with a linear output projection.
///
/// # Example
///
/// ```
/// use annt::layers::{Layer, RecurrentLayer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let rnn = RecurrentLayer::new(8, 4, &mut rng);
/// assert_eq!(rnn.input_size(), 8);
/// assert_eq!(rnn.output_size(), 4);
/// // U, W, B, V, C packed together.
/// assert_eq!(rnn.parameter_count(), 4 * 8 + 4 * 4 + 4 + 4 * 4 + 4);
/// ```
#[derive(Debug)]
pub struct RecurrentLayer {
    inputs: usize,
    outputs: usize,
    // [U | W | B | V | C]
    weights: Vec<f32>,
}

impl RecurrentLayer {
    pub fn new(inputs: usize, outputs: usize, rng: &mut SimpleRng) -> Self {
        assert!(
            inputs > 0 && outputs > 0,
            "recurrent layer dimensions must be positive"
        );
        let total = outputs * inputs + outputs * outputs + outputs + outputs * outputs + outputs;
        let mut layer = Self {
            inputs,
            outputs,
            weights: vec![0.0; total],
        };
        layer.randomize(rng);
        layer
    }

    // (U, W, B, V, C) views into the packed parameter vector.
    fn split(&self) -> (&[f32], &[f32], &[f32], &[f32], &[f32]) {
        let (u, rest) = self.weights.split_at(self.outputs * self.inputs);
        let (w, rest) = rest.split_at(self.outputs * self.outputs);
        let (b, rest) = rest.split_at(self.outputs);
        let (v, c) = rest.split_at(self.outputs * self.outputs);
        (u, w, b, v, c)
    }

    fn split_mut(
        buf: &mut [f32],
        inputs: usize,
        outputs: usize,
    ) -> (&mut [f32], &mut [f32], &mut [f32], &mut [f32], &mut [f32]) {
        let (u, rest) = buf.split_at_mut(outputs * inputs);
        let (w, rest) = rest.split_at_mut(outputs * outputs);
        let (b, rest) = rest.split_at_mut(outputs);
        let (v, c) = rest.split_at_mut(outputs * outputs);
        (u, w, b, v, c)
    }
}

impl Layer for RecurrentLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Recurrent
    }

    fn input_size(&self) -> usize {
        self.inputs
    }

    fn output_size(&self) -> usize {
        self.outputs
    }

    fn parameter_count(&self) -> usize {
        self.weights.len()
    }

    fn scratch_spec(&self, training: bool) -> Vec<ScratchSpec> {
        let out = self.outputs;
        if training {
            vec![
                ScratchSpec::float(BufferScope::PerSequence, out),
                ScratchSpec::float(BufferScope::PerSequence, out),
                ScratchSpec::float(BufferScope::PerSample, out),
                ScratchSpec::float(BufferScope::PerSample, out),
                ScratchSpec::float(BufferScope::PerBatch, out),
                ScratchSpec::float(BufferScope::PerBatch, out),
            ]
        } else {
            vec![
                ScratchSpec::float(BufferScope::PerSequence, out),
                ScratchSpec::float(BufferScope::PerBatch, out),
            ]
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(input.len(), n * inputs, "recurrent forward: bad input length");
        assert_eq!(
            output.len(),
            n * outputs,
            "recurrent forward: bad output length"
        );

        let seq_len = ctx.sequence_length;
        let math = ctx.math;
        let (u, w, b, v, c) = self.split();

        if ctx.training {
            let [hist_all, h_all, hprev_all] =
                ctx.scratch
                    .float_bufs_mut([BUF_HISTORY, BUF_H_SAVE, BUF_H_PREV]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];
                hprev_all[s * outputs..(s + 1) * outputs].copy_from_slice(hist);

                let h = &mut h_all[s * outputs..(s + 1) * outputs];
                for o in 0..outputs {
                    let pre = b[o]
                        + math.dot(&u[o * inputs..(o + 1) * inputs], x)
                        + math.dot(&w[o * outputs..(o + 1) * outputs], hist);
                    h[o] = pre.tanh();
                }
                hist.copy_from_slice(h);

                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for o in 0..outputs {
                    out_s[o] = c[o] + math.dot(&v[o * outputs..(o + 1) * outputs], h);
                }
            }
        } else {
            let [hist_all, h_tmp] = ctx.scratch.float_bufs_mut([BUF_HISTORY, BUF_INFER_H]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];

                for o in 0..outputs {
                    let pre = b[o]
                        + math.dot(&u[o * inputs..(o + 1) * inputs], x)
                        + math.dot(&w[o * outputs..(o + 1) * outputs], hist);
                    h_tmp[o] = pre.tanh();
                }
                hist.copy_from_slice(h_tmp);

                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for o in 0..outputs {
                    out_s[o] = c[o] + math.dot(&v[o * outputs..(o + 1) * outputs], h_tmp);
                }
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
        assert!(ctx.training, "recurrent backward requires a training context");
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(delta.len(), n * outputs, "recurrent backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * inputs,
            "recurrent backward: bad prev_delta length"
        );
        assert_eq!(
            gradients.len(),
            self.parameter_count(),
            "recurrent backward: bad gradient length"
        );

        let seq_len = ctx.sequence_length;
        let (u, w, _, v, _) = self.split();
        let (gu, gw, gb, gv, gc) = Self::split_mut(gradients, inputs, outputs);

        let [carry_all, h_all, hprev_all, dh, du] = ctx
            .scratch
            .float_bufs_mut([BUF_CARRY, BUF_H_SAVE, BUF_H_PREV, BUF_DH, BUF_DU]);
        carry_all.fill(0.0);

        for s in (0..n).rev() {
            let q = s / seq_len;
            let e = &delta[s * outputs..(s + 1) * outputs];
            let h = &h_all[s * outputs..(s + 1) * outputs];
            let hp = &hprev_all[s * outputs..(s + 1) * outputs];
            let x = &input[s * inputs..(s + 1) * inputs];
            let carry = &mut carry_all[q * outputs..(q + 1) * outputs];

            // Output projection gradients, then fold V and the carried state
            // gradient into the hidden delta.
            for o in 0..outputs {
                let eo = e[o];
                gc[o] += eo;
                let gv_row = &mut gv[o * outputs..(o + 1) * outputs];
                for j in 0..outputs {
                    gv_row[j] += eo * h[j];
                }
            }
            for j in 0..outputs {
                let mut sum = carry[j];
                for o in 0..outputs {
                    sum += v[o * outputs + j] * e[o];
                }
                dh[j] = sum;
            }
            for o in 0..outputs {
                du[o] = dh[o] * (1.0 - h[o] * h[o]);
            }

            for o in 0..outputs {
                let d = du[o];
                gb[o] += d;
                let gu_row = &mut gu[o * inputs..(o + 1) * inputs];
                for (gi, &xi) in gu_row.iter_mut().zip(x) {
                    *gi += d * xi;
                }
                let gw_row = &mut gw[o * outputs..(o + 1) * outputs];
                for (gj, &hj) in gw_row.iter_mut().zip(hp) {
                    *gj += d * hj;
                }
            }

            let prev = &mut prev_delta[s * inputs..(s + 1) * inputs];
            for (i, p) in prev.iter_mut().enumerate() {
                let mut sum = 0.0;
                for o in 0..outputs {
                    sum += u[o * inputs + i] * du[o];
                }
                *p = sum;
            }
            for (j, cj) in carry.iter_mut().enumerate() {
                let mut sum = 0.0;
                for o in 0..outputs {
                    sum += w[o * outputs + j] * du[o];
                }
                *cj = sum;
            }
        }
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        let inputs = self.inputs;
        let outputs = self.outputs;
        let in_limit = init_limit(inputs);
        let out_limit = init_limit(outputs);
        let (u, w, b, v, c) = Self::split_mut(&mut self.weights, inputs, outputs);
        rng.fill_symmetric(u, in_limit);
        rng.fill_symmetric(w, out_limit);
        b.fill(0.0);
        rng.fill_symmetric(v, out_limit);
        c.fill(0.0);
    }

    fn add_to_parameters(&mut self, updates: &[f32]) {
        assert_eq!(
            updates.len(),
            self.weights.len(),
            "recurrent update: bad update length"
        );
        for (w, u) in self.weights.iter_mut().zip(updates) {
            *w += u;
        }
    }

    fn save_params(&self, writer: &mut dyn Write) -> Result<()> {
        write_f32s(writer, &self.weights)
    }

    fn load_params(&mut self, reader: &mut dyn Read) -> Result<()> {
        read_f32s(reader, &mut self.weights)
    }
}
