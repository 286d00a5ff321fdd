//! Gated recurrent unit layer.
//!
//! Each step gates how much of the previous hidden state survives and how
//! much is rewritten by a candidate computed from the reset-gated history:
//!
//! ```text
//! Z(t)  = sigmoid(Wz X(t) + Uz H(t-1) + Bz)
//! R(t)  = sigmoid(Wr X(t) + Ur H(t-1) + Br)
//! H'(t) = tanh(Wh X(t) + Uh (R(t) ⊙ H(t-1)) + Bh)
//! H(t)  = (1 - Z(t)) ⊙ H(t-1) + Z(t) ⊙ H'(t)
//! ```
//!
//! The hidden state is the layer output. Sequence handling matches the
//! vanilla recurrent layer: one persistent hidden state per sequence,
//! positions strictly ordered, backward-through-time with a per-sequence
//! carry. A configurable training depth truncates how far the carry travels.

use std::io::{Read, Write};

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::error::Result;
use crate::layers::activation::sigmoid;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{init_limit, read_f32s, write_f32s};
use crate::utils::SimpleRng;

// Training scratch layout. Inference keeps only the history plus per-batch
// gate temporaries (ids 1..4 re-map to z, r, candidate, reset⊙history).
const BUF_HISTORY: usize = 0;
const BUF_CARRY: usize = 1;
const BUF_H_PREV: usize = 2;
const BUF_Z: usize = 3;
const BUF_R: usize = 4;
const BUF_CAND: usize = 5;
const BUF_DH: usize = 6;
const BUF_DZ: usize = 7;
const BUF_DR: usize = 8;
const BUF_DC: usize = 9;
const BUF_DRH: usize = 10;
const BUF_RH: usize = 11;

// Inference scratch layout.
const INF_Z: usize = 1;
const INF_R: usize = 2;
const INF_CAND: usize = 3;
const INF_RH: usize = 4;

/// GRU layer with update/reset gating.
///
/// # Example
///
/// ```
/// use annt::layers::{GruLayer, Layer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let gru = GruLayer::new(8, 4, &mut rng);
/// assert_eq!(gru.output_size(), 4);
/// // Three gates, each with input weights, recurrent weights and a bias.
/// assert_eq!(gru.parameter_count(), 3 * (4 * 8 + 4 * 4 + 4));
/// ```
#[derive(Debug)]
pub struct GruLayer {
    inputs: usize,
    outputs: usize,
    // [Wz | Wr | Wh | Uz | Ur | Uh | Bz | Br | Bh]
    weights: Vec<f32>,
    training_depth: usize,
}

struct GateViews<'a> {
    wz: &'a [f32],
    wr: &'a [f32],
    wh: &'a [f32],
    uz: &'a [f32],
    ur: &'a [f32],
    uh: &'a [f32],
    bz: &'a [f32],
    br: &'a [f32],
    bh: &'a [f32],
}

impl GruLayer {
    pub fn new(inputs: usize, outputs: usize, rng: &mut SimpleRng) -> Self {
        assert!(
            inputs > 0 && outputs > 0,
            "gru layer dimensions must be positive"
        );
        let total = 3 * (outputs * inputs + outputs * outputs + outputs);
        let mut layer = Self {
            inputs,
            outputs,
            weights: vec![0.0; total],
            training_depth: 0,
        };
        layer.randomize(rng);
        layer
    }

    /// Bound backward-through-time accumulation: the carried state gradient is
    /// cleared every `depth` positions walking backward through a sequence.
    /// Zero (the default) runs the full sequence depth.
    pub fn set_training_depth(&mut self, depth: usize) {
        self.training_depth = depth;
    }

    pub fn training_depth(&self) -> usize {
        self.training_depth
    }

    fn views(&self) -> GateViews<'_> {
        let (wz, rest) = self.weights.split_at(self.outputs * self.inputs);
        let (wr, rest) = rest.split_at(self.outputs * self.inputs);
        let (wh, rest) = rest.split_at(self.outputs * self.inputs);
        let (uz, rest) = rest.split_at(self.outputs * self.outputs);
        let (ur, rest) = rest.split_at(self.outputs * self.outputs);
        let (uh, rest) = rest.split_at(self.outputs * self.outputs);
        let (bz, rest) = rest.split_at(self.outputs);
        let (br, bh) = rest.split_at(self.outputs);
        GateViews {
            wz,
            wr,
            wh,
            uz,
            ur,
            uh,
            bz,
            br,
            bh,
        }
    }

    #[allow(clippy::type_complexity)]
    fn split_mut(
        buf: &mut [f32],
        inputs: usize,
        outputs: usize,
    ) -> [&mut [f32]; 9] {
        let (wz, rest) = buf.split_at_mut(outputs * inputs);
        let (wr, rest) = rest.split_at_mut(outputs * inputs);
        let (wh, rest) = rest.split_at_mut(outputs * inputs);
        let (uz, rest) = rest.split_at_mut(outputs * outputs);
        let (ur, rest) = rest.split_at_mut(outputs * outputs);
        let (uh, rest) = rest.split_at_mut(outputs * outputs);
        let (bz, rest) = rest.split_at_mut(outputs);
        let (br, bh) = rest.split_at_mut(outputs);
        [wz, wr, wh, uz, ur, uh, bz, br, bh]
    }

    // One forward step from `hist` over input `x`, leaving the gate values in
    // `z`/`r`/`cand` and `r ⊙ hist` in `rh`.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        g: &GateViews<'_>,
        math: crate::math::VectorOps,
        x: &[f32],
        hist: &[f32],
        z: &mut [f32],
        r: &mut [f32],
        cand: &mut [f32],
        rh: &mut [f32],
    ) {
        let inputs = self.inputs;
        let outputs = self.outputs;
        for o in 0..outputs {
            z[o] = sigmoid(
                g.bz[o]
                    + math.dot(&g.wz[o * inputs..(o + 1) * inputs], x)
                    + math.dot(&g.uz[o * outputs..(o + 1) * outputs], hist),
            );
            r[o] = sigmoid(
                g.br[o]
                    + math.dot(&g.wr[o * inputs..(o + 1) * inputs], x)
                    + math.dot(&g.ur[o * outputs..(o + 1) * outputs], hist),
            );
        }
        for j in 0..outputs {
            rh[j] = r[j] * hist[j];
        }
        for o in 0..outputs {
            cand[o] = (g.bh[o]
                + math.dot(&g.wh[o * inputs..(o + 1) * inputs], x)
                + math.dot(&g.uh[o * outputs..(o + 1) * outputs], rh))
            .tanh();
        }
    }
}

impl Layer for GruLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Gru
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
            let mut specs = vec![
                ScratchSpec::float(BufferScope::PerSequence, out),
                ScratchSpec::float(BufferScope::PerSequence, out),
            ];
            for _ in BUF_H_PREV..=BUF_CAND {
                specs.push(ScratchSpec::float(BufferScope::PerSample, out));
            }
            for _ in BUF_DH..=BUF_RH {
                specs.push(ScratchSpec::float(BufferScope::PerBatch, out));
            }
            specs
        } else {
            let mut specs = vec![ScratchSpec::float(BufferScope::PerSequence, out)];
            for _ in INF_Z..=INF_RH {
                specs.push(ScratchSpec::float(BufferScope::PerBatch, out));
            }
            specs
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(input.len(), n * inputs, "gru forward: bad input length");
        assert_eq!(output.len(), n * outputs, "gru forward: bad output length");

        let seq_len = ctx.sequence_length;
        let math = ctx.math;
        let g = self.views();

        if ctx.training {
            let [hist_all, hprev_all, z_all, r_all, cand_all, rh] = ctx
                .scratch
                .float_bufs_mut([BUF_HISTORY, BUF_H_PREV, BUF_Z, BUF_R, BUF_CAND, BUF_RH]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];
                hprev_all[s * outputs..(s + 1) * outputs].copy_from_slice(hist);

                let z = &mut z_all[s * outputs..(s + 1) * outputs];
                let r = &mut r_all[s * outputs..(s + 1) * outputs];
                let cand = &mut cand_all[s * outputs..(s + 1) * outputs];
                self.step(&g, math, x, hist, z, r, cand, rh);

                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for j in 0..outputs {
                    out_s[j] = (1.0 - z[j]) * hist[j] + z[j] * cand[j];
                }
                hist.copy_from_slice(out_s);
            }
        } else {
            let [hist_all, z, r, cand, rh] = ctx
                .scratch
                .float_bufs_mut([BUF_HISTORY, INF_Z, INF_R, INF_CAND, INF_RH]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];
                self.step(&g, math, x, hist, z, r, cand, rh);

                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for j in 0..outputs {
                    out_s[j] = (1.0 - z[j]) * hist[j] + z[j] * cand[j];
                }
                hist.copy_from_slice(out_s);
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
        assert!(ctx.training, "gru backward requires a training context");
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(delta.len(), n * outputs, "gru backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * inputs,
            "gru backward: bad prev_delta length"
        );
        assert_eq!(
            gradients.len(),
            self.parameter_count(),
            "gru backward: bad gradient length"
        );

        let seq_len = ctx.sequence_length;
        let depth = self.training_depth;
        let g = self.views();
        let [gwz, gwr, gwh, guz, gur, guh, gbz, gbr, gbh] =
            Self::split_mut(gradients, inputs, outputs);

        let [carry_all, hprev_all, z_all, r_all, cand_all, dh, dz, dr, dc, drh, rh] =
            ctx.scratch.float_bufs_mut([
                BUF_CARRY, BUF_H_PREV, BUF_Z, BUF_R, BUF_CAND, BUF_DH, BUF_DZ, BUF_DR, BUF_DC,
                BUF_DRH, BUF_RH,
            ]);
        carry_all.fill(0.0);

        for s in (0..n).rev() {
            let q = s / seq_len;
            let t = s % seq_len;
            let e = &delta[s * outputs..(s + 1) * outputs];
            let hp = &hprev_all[s * outputs..(s + 1) * outputs];
            let z = &z_all[s * outputs..(s + 1) * outputs];
            let r = &r_all[s * outputs..(s + 1) * outputs];
            let cand = &cand_all[s * outputs..(s + 1) * outputs];
            let x = &input[s * inputs..(s + 1) * inputs];
            let carry = &mut carry_all[q * outputs..(q + 1) * outputs];

            for j in 0..outputs {
                dh[j] = e[j] + carry[j];
            }
            // Gate pre-activation deltas.
            for o in 0..outputs {
                dz[o] = dh[o] * (cand[o] - hp[o]) * z[o] * (1.0 - z[o]);
                dc[o] = dh[o] * z[o] * (1.0 - cand[o] * cand[o]);
            }
            for j in 0..outputs {
                let mut sum = 0.0;
                for o in 0..outputs {
                    sum += g.uh[o * outputs + j] * dc[o];
                }
                drh[j] = sum;
            }
            for j in 0..outputs {
                dr[j] = drh[j] * hp[j] * r[j] * (1.0 - r[j]);
            }

            // State gradient carried to the previous position.
            for j in 0..outputs {
                let mut sum = dh[j] * (1.0 - z[j]) + drh[j] * r[j];
                for o in 0..outputs {
                    sum += g.uz[o * outputs + j] * dz[o] + g.ur[o * outputs + j] * dr[o];
                }
                carry[j] = sum;
            }

            let prev = &mut prev_delta[s * inputs..(s + 1) * inputs];
            for (i, p) in prev.iter_mut().enumerate() {
                let mut sum = 0.0;
                for o in 0..outputs {
                    sum += g.wz[o * inputs + i] * dz[o]
                        + g.wr[o * inputs + i] * dr[o]
                        + g.wh[o * inputs + i] * dc[o];
                }
                *p = sum;
            }

            for j in 0..outputs {
                rh[j] = r[j] * hp[j];
            }
            for o in 0..outputs {
                gbz[o] += dz[o];
                gbr[o] += dr[o];
                gbh[o] += dc[o];
                let (wz_row, wr_row, wh_row) = (
                    &mut gwz[o * inputs..(o + 1) * inputs],
                    &mut gwr[o * inputs..(o + 1) * inputs],
                    &mut gwh[o * inputs..(o + 1) * inputs],
                );
                for i in 0..inputs {
                    wz_row[i] += dz[o] * x[i];
                    wr_row[i] += dr[o] * x[i];
                    wh_row[i] += dc[o] * x[i];
                }
                let (uz_row, ur_row, uh_row) = (
                    &mut guz[o * outputs..(o + 1) * outputs],
                    &mut gur[o * outputs..(o + 1) * outputs],
                    &mut guh[o * outputs..(o + 1) * outputs],
                );
                for j in 0..outputs {
                    uz_row[j] += dz[o] * hp[j];
                    ur_row[j] += dr[o] * hp[j];
                    uh_row[j] += dc[o] * rh[j];
                }
            }

            // Truncated backpropagation through time: cut the carry chain
            // every `depth` positions counted from the sequence end.
            if depth > 0 && (seq_len - t) % depth == 0 {
                carry.fill(0.0);
            }
        }
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        let inputs = self.inputs;
        let outputs = self.outputs;
        let in_limit = init_limit(inputs);
        let out_limit = init_limit(outputs);
        let [wz, wr, wh, uz, ur, uh, bz, br, bh] =
            Self::split_mut(&mut self.weights, inputs, outputs);
        rng.fill_symmetric(wz, in_limit);
        rng.fill_symmetric(wr, in_limit);
        rng.fill_symmetric(wh, in_limit);
        rng.fill_symmetric(uz, out_limit);
        rng.fill_symmetric(ur, out_limit);
        rng.fill_symmetric(uh, out_limit);
        bz.fill(0.0);
        // Biasing the reset gate shut eases early gradient flow through the
        // candidate path.
        br.fill(-1.0);
        bh.fill(0.0);
    }

    fn add_to_parameters(&mut self, updates: &[f32]) {
        assert_eq!(
            updates.len(),
            self.weights.len(),
            "gru update: bad update length"
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
