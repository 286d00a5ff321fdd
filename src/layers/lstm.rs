//! Long short-term memory layer.
//!
//! Alongside the hidden state each sequence carries a cell state, updated by
//! three sigmoid gates and a tanh candidate:
//!
//! ```text
//! F(t) = sigmoid(Wf X(t) + Uf H(t-1) + Bf)
//! I(t) = sigmoid(Wi X(t) + Ui H(t-1) + Bi)
//! O(t) = sigmoid(Wo X(t) + Uo H(t-1) + Bo)
//! Z(t) = tanh(Wz X(t) + Uz H(t-1) + Bz)
//! C(t) = F(t) ⊙ C(t-1) + I(t) ⊙ Z(t)
//! H(t) = O(t) ⊙ tanh(C(t))
//! ```
//!
//! The hidden state is the layer output. Backward-through-time maintains two
//! per-sequence carries, one for the hidden state and one for the cell state.

use std::io::{Read, Write};

use crate::context::{BufferScope, LayerContext, ScratchSpec};
use crate::error::Result;
use crate::layers::activation::sigmoid;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{init_limit, read_f32s, write_f32s};
use crate::utils::SimpleRng;

// Training scratch layout.
const BUF_HISTORY: usize = 0;
const BUF_CELL: usize = 1;
const BUF_CARRY_H: usize = 2;
const BUF_CARRY_C: usize = 3;
const BUF_H_PREV: usize = 4;
const BUF_C_PREV: usize = 5;
const BUF_F: usize = 6;
const BUF_I: usize = 7;
const BUF_O: usize = 8;
const BUF_Z: usize = 9;
const BUF_TANH_C: usize = 10;
const BUF_DH: usize = 11;
const BUF_DF: usize = 12;
const BUF_DI: usize = 13;
const BUF_DO: usize = 14;
const BUF_DZ: usize = 15;
const BUF_DC: usize = 16;

// Inference scratch layout: history, cell, then four per-batch gate temps.
const INF_F: usize = 2;
const INF_I: usize = 3;
const INF_O: usize = 4;
const INF_Z: usize = 5;

/// LSTM layer with forget/input/output gating over a persistent cell state.
///
/// # Example
///
/// ```
/// use annt::layers::{Layer, LstmLayer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let lstm = LstmLayer::new(8, 4, &mut rng);
/// assert_eq!(lstm.output_size(), 4);
/// // Four gates, each with input weights, recurrent weights and a bias.
/// assert_eq!(lstm.parameter_count(), 4 * (4 * 8 + 4 * 4 + 4));
/// ```
#[derive(Debug)]
pub struct LstmLayer {
    inputs: usize,
    outputs: usize,
    // [Wf | Wi | Wo | Wz | Uf | Ui | Uo | Uz | Bf | Bi | Bo | Bz]
    weights: Vec<f32>,
}

struct GateViews<'a> {
    wf: &'a [f32],
    wi: &'a [f32],
    wo: &'a [f32],
    wz: &'a [f32],
    uf: &'a [f32],
    ui: &'a [f32],
    uo: &'a [f32],
    uz: &'a [f32],
    bf: &'a [f32],
    bi: &'a [f32],
    bo: &'a [f32],
    bz: &'a [f32],
}

impl LstmLayer {
    pub fn new(inputs: usize, outputs: usize, rng: &mut SimpleRng) -> Self {
        assert!(
            inputs > 0 && outputs > 0,
            "lstm layer dimensions must be positive"
        );
        let total = 4 * (outputs * inputs + outputs * outputs + outputs);
        let mut layer = Self {
            inputs,
            outputs,
            weights: vec![0.0; total],
        };
        layer.randomize(rng);
        layer
    }

    fn views(&self) -> GateViews<'_> {
        let (wf, rest) = self.weights.split_at(self.outputs * self.inputs);
        let (wi, rest) = rest.split_at(self.outputs * self.inputs);
        let (wo, rest) = rest.split_at(self.outputs * self.inputs);
        let (wz, rest) = rest.split_at(self.outputs * self.inputs);
        let (uf, rest) = rest.split_at(self.outputs * self.outputs);
        let (ui, rest) = rest.split_at(self.outputs * self.outputs);
        let (uo, rest) = rest.split_at(self.outputs * self.outputs);
        let (uz, rest) = rest.split_at(self.outputs * self.outputs);
        let (bf, rest) = rest.split_at(self.outputs);
        let (bi, rest) = rest.split_at(self.outputs);
        let (bo, bz) = rest.split_at(self.outputs);
        GateViews {
            wf,
            wi,
            wo,
            wz,
            uf,
            ui,
            uo,
            uz,
            bf,
            bi,
            bo,
            bz,
        }
    }

    fn split_mut(buf: &mut [f32], inputs: usize, outputs: usize) -> [&mut [f32]; 12] {
        let (wf, rest) = buf.split_at_mut(outputs * inputs);
        let (wi, rest) = rest.split_at_mut(outputs * inputs);
        let (wo, rest) = rest.split_at_mut(outputs * inputs);
        let (wz, rest) = rest.split_at_mut(outputs * inputs);
        let (uf, rest) = rest.split_at_mut(outputs * outputs);
        let (ui, rest) = rest.split_at_mut(outputs * outputs);
        let (uo, rest) = rest.split_at_mut(outputs * outputs);
        let (uz, rest) = rest.split_at_mut(outputs * outputs);
        let (bf, rest) = rest.split_at_mut(outputs);
        let (bi, rest) = rest.split_at_mut(outputs);
        let (bo, bz) = rest.split_at_mut(outputs);
        [wf, wi, wo, wz, uf, ui, uo, uz, bf, bi, bo, bz]
    }

    // Gate activations for one step from `hist` over input `x`.
    #[allow(clippy::too_many_arguments)]
    fn gates(
        &self,
        g: &GateViews<'_>,
        math: crate::math::VectorOps,
        x: &[f32],
        hist: &[f32],
        f: &mut [f32],
        i: &mut [f32],
        o: &mut [f32],
        z: &mut [f32],
    ) {
        let inputs = self.inputs;
        let outputs = self.outputs;
        for k in 0..outputs {
            let xin = &x[..inputs];
            f[k] = sigmoid(
                g.bf[k]
                    + math.dot(&g.wf[k * inputs..(k + 1) * inputs], xin)
                    + math.dot(&g.uf[k * outputs..(k + 1) * outputs], hist),
            );
            i[k] = sigmoid(
                g.bi[k]
                    + math.dot(&g.wi[k * inputs..(k + 1) * inputs], xin)
                    + math.dot(&g.ui[k * outputs..(k + 1) * outputs], hist),
            );
            o[k] = sigmoid(
                g.bo[k]
                    + math.dot(&g.wo[k * inputs..(k + 1) * inputs], xin)
                    + math.dot(&g.uo[k * outputs..(k + 1) * outputs], hist),
            );
            z[k] = (g.bz[k]
                + math.dot(&g.wz[k * inputs..(k + 1) * inputs], xin)
                + math.dot(&g.uz[k * outputs..(k + 1) * outputs], hist))
            .tanh();
        }
    }
}

impl Layer for LstmLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Lstm
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
            let mut specs = Vec::with_capacity(BUF_DC + 1);
            for _ in BUF_HISTORY..=BUF_CARRY_C {
                specs.push(ScratchSpec::float(BufferScope::PerSequence, out));
            }
            for _ in BUF_H_PREV..=BUF_TANH_C {
                specs.push(ScratchSpec::float(BufferScope::PerSample, out));
            }
            for _ in BUF_DH..=BUF_DC {
                specs.push(ScratchSpec::float(BufferScope::PerBatch, out));
            }
            specs
        } else {
            let mut specs = vec![
                ScratchSpec::float(BufferScope::PerSequence, out),
                ScratchSpec::float(BufferScope::PerSequence, out),
            ];
            for _ in INF_F..=INF_Z {
                specs.push(ScratchSpec::float(BufferScope::PerBatch, out));
            }
            specs
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(input.len(), n * inputs, "lstm forward: bad input length");
        assert_eq!(output.len(), n * outputs, "lstm forward: bad output length");

        let seq_len = ctx.sequence_length;
        let math = ctx.math;
        let g = self.views();

        if ctx.training {
            let [hist_all, cell_all, hprev_all, cprev_all, f_all, i_all, o_all, z_all, tc_all] =
                ctx.scratch.float_bufs_mut([
                    BUF_HISTORY,
                    BUF_CELL,
                    BUF_H_PREV,
                    BUF_C_PREV,
                    BUF_F,
                    BUF_I,
                    BUF_O,
                    BUF_Z,
                    BUF_TANH_C,
                ]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let cell = &mut cell_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];
                hprev_all[s * outputs..(s + 1) * outputs].copy_from_slice(hist);
                cprev_all[s * outputs..(s + 1) * outputs].copy_from_slice(cell);

                let f = &mut f_all[s * outputs..(s + 1) * outputs];
                let i = &mut i_all[s * outputs..(s + 1) * outputs];
                let o = &mut o_all[s * outputs..(s + 1) * outputs];
                let z = &mut z_all[s * outputs..(s + 1) * outputs];
                self.gates(&g, math, x, hist, f, i, o, z);

                let tc = &mut tc_all[s * outputs..(s + 1) * outputs];
                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for k in 0..outputs {
                    cell[k] = f[k] * cell[k] + i[k] * z[k];
                    tc[k] = cell[k].tanh();
                    out_s[k] = o[k] * tc[k];
                }
                hist.copy_from_slice(out_s);
            }
        } else {
            let [hist_all, cell_all, f, i, o, z] = ctx
                .scratch
                .float_bufs_mut([BUF_HISTORY, BUF_CELL, INF_F, INF_I, INF_O, INF_Z]);
            for s in 0..n {
                let q = s / seq_len;
                let hist = &mut hist_all[q * outputs..(q + 1) * outputs];
                let cell = &mut cell_all[q * outputs..(q + 1) * outputs];
                let x = &input[s * inputs..(s + 1) * inputs];
                self.gates(&g, math, x, hist, f, i, o, z);

                let out_s = &mut output[s * outputs..(s + 1) * outputs];
                for k in 0..outputs {
                    cell[k] = f[k] * cell[k] + i[k] * z[k];
                    out_s[k] = o[k] * cell[k].tanh();
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
        assert!(ctx.training, "lstm backward requires a training context");
        let n = ctx.samples;
        let inputs = self.inputs;
        let outputs = self.outputs;
        assert_eq!(delta.len(), n * outputs, "lstm backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * inputs,
            "lstm backward: bad prev_delta length"
        );
        assert_eq!(
            gradients.len(),
            self.parameter_count(),
            "lstm backward: bad gradient length"
        );

        let seq_len = ctx.sequence_length;
        let g = self.views();
        let [gwf, gwi, gwo, gwz, guf, gui, guo, guz, gbf, gbi, gbo, gbz] =
            Self::split_mut(gradients, inputs, outputs);

        let [carry_h_all, carry_c_all, hprev_all, cprev_all, f_all, i_all, o_all, z_all, tc_all, dh, df, di, dout, dz, dc] =
            ctx.scratch.float_bufs_mut([
                BUF_CARRY_H,
                BUF_CARRY_C,
                BUF_H_PREV,
                BUF_C_PREV,
                BUF_F,
                BUF_I,
                BUF_O,
                BUF_Z,
                BUF_TANH_C,
                BUF_DH,
                BUF_DF,
                BUF_DI,
                BUF_DO,
                BUF_DZ,
                BUF_DC,
            ]);
        carry_h_all.fill(0.0);
        carry_c_all.fill(0.0);

        for s in (0..n).rev() {
            let q = s / seq_len;
            let e = &delta[s * outputs..(s + 1) * outputs];
            let hp = &hprev_all[s * outputs..(s + 1) * outputs];
            let cp = &cprev_all[s * outputs..(s + 1) * outputs];
            let f = &f_all[s * outputs..(s + 1) * outputs];
            let i = &i_all[s * outputs..(s + 1) * outputs];
            let o = &o_all[s * outputs..(s + 1) * outputs];
            let z = &z_all[s * outputs..(s + 1) * outputs];
            let tc = &tc_all[s * outputs..(s + 1) * outputs];
            let x = &input[s * inputs..(s + 1) * inputs];
            let carry_h = &mut carry_h_all[q * outputs..(q + 1) * outputs];
            let carry_c = &mut carry_c_all[q * outputs..(q + 1) * outputs];

            for k in 0..outputs {
                dh[k] = e[k] + carry_h[k];
            }
            // Cell-state and gate pre-activation deltas; the cell carry feeds
            // straight into dc.
            for k in 0..outputs {
                dout[k] = dh[k] * tc[k] * o[k] * (1.0 - o[k]);
                dc[k] = dh[k] * o[k] * (1.0 - tc[k] * tc[k]) + carry_c[k];
                df[k] = dc[k] * cp[k] * f[k] * (1.0 - f[k]);
                di[k] = dc[k] * z[k] * i[k] * (1.0 - i[k]);
                dz[k] = dc[k] * i[k] * (1.0 - z[k] * z[k]);
                carry_c[k] = dc[k] * f[k];
            }

            for j in 0..outputs {
                let mut sum = 0.0;
                for k in 0..outputs {
                    sum += g.uf[k * outputs + j] * df[k]
                        + g.ui[k * outputs + j] * di[k]
                        + g.uo[k * outputs + j] * dout[k]
                        + g.uz[k * outputs + j] * dz[k];
                }
                carry_h[j] = sum;
            }

            let prev = &mut prev_delta[s * inputs..(s + 1) * inputs];
            for (idx, p) in prev.iter_mut().enumerate() {
                let mut sum = 0.0;
                for k in 0..outputs {
                    sum += g.wf[k * inputs + idx] * df[k]
                        + g.wi[k * inputs + idx] * di[k]
                        + g.wo[k * inputs + idx] * dout[k]
                        + g.wz[k * inputs + idx] * dz[k];
                }
                *p = sum;
            }

            for k in 0..outputs {
                gbf[k] += df[k];
                gbi[k] += di[k];
                gbo[k] += dout[k];
                gbz[k] += dz[k];
                for idx in 0..inputs {
                    gwf[k * inputs + idx] += df[k] * x[idx];
                    gwi[k * inputs + idx] += di[k] * x[idx];
                    gwo[k * inputs + idx] += dout[k] * x[idx];
                    gwz[k * inputs + idx] += dz[k] * x[idx];
                }
                for j in 0..outputs {
                    guf[k * outputs + j] += df[k] * hp[j];
                    gui[k * outputs + j] += di[k] * hp[j];
                    guo[k * outputs + j] += dout[k] * hp[j];
                    guz[k * outputs + j] += dz[k] * hp[j];
                }
            }
        }
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        let inputs = self.inputs;
        let outputs = self.outputs;
        let in_limit = init_limit(inputs);
        let out_limit = init_limit(outputs);
        let [wf, wi, wo, wz, uf, ui, uo, uz, bf, bi, bo, bz] =
            Self::split_mut(&mut self.weights, inputs, outputs);
        rng.fill_symmetric(wf, in_limit);
        rng.fill_symmetric(wi, in_limit);
        rng.fill_symmetric(wo, in_limit);
        rng.fill_symmetric(wz, in_limit);
        rng.fill_symmetric(uf, out_limit);
        rng.fill_symmetric(ui, out_limit);
        rng.fill_symmetric(uo, out_limit);
        rng.fill_symmetric(uz, out_limit);
        // Starting with the forget gate open lets gradients reach early cell
        // states before the gate has learned anything.
        bf.fill(1.0);
        bi.fill(0.0);
        bo.fill(0.0);
        bz.fill(0.0);
    }

    fn add_to_parameters(&mut self, updates: &[f32]) {
        assert_eq!(
            updates.len(),
            self.weights.len(),
            "lstm update: bad update length"
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
