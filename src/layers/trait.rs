//! Layer trait definition.
//!
//! This module defines the core Layer trait that all layer types implement.
//! The trait covers forward/backward propagation, scratch-memory declaration,
//! weight initialization and learned-parameter persistence.

use std::io::{Read, Write};

use crate::context::{LayerContext, ScratchSpec};
use crate::error::Result;
use crate::utils::SimpleRng;

/// Identifies a layer variant in saved model files.
///
/// The numeric value is the on-disk tag of a layer's parameter block; it must
/// never change for a variant once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LayerKind {
    Dense = 1,
    Conv2D = 2,
    MaxPooling = 3,
    AveragePooling = 4,
    BatchNorm = 5,
    Dropout = 6,
    Activation = 7,
    Recurrent = 8,
    Gru = 9,
    Lstm = 10,
}

impl LayerKind {
    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            1 => Self::Dense,
            2 => Self::Conv2D,
            3 => Self::MaxPooling,
            4 => Self::AveragePooling,
            5 => Self::BatchNorm,
            6 => Self::Dropout,
            7 => Self::Activation,
            8 => Self::Recurrent,
            9 => Self::Gru,
            10 => Self::Lstm,
            _ => return None,
        })
    }
}

/// Core trait for neural network layers.
///
/// Layers work with `f32` data for compatibility with BLAS operations. A batch
/// of `n` samples is one flat buffer of `n × size` values, sample-major.
///
/// Layers own their parameters but no per-batch storage: anything a layer
/// needs across a forward/backward pair is declared via [`Layer::scratch_spec`]
/// and handed back through the [`LayerContext`], so a layer can serve any
/// batch size its context was prepared for without allocating.
pub trait Layer: std::fmt::Debug {
    /// Which variant this layer is, used to tag its saved parameter block.
    fn kind(&self) -> LayerKind;

    /// Expected number of input values per sample. Zero for a shapeless layer
    /// that has not been connected yet.
    fn input_size(&self) -> usize;

    /// Number of output values per sample.
    fn output_size(&self) -> usize;

    /// Connect a shapeless layer (activation, dropout) to its predecessor.
    ///
    /// Fixed-shape layers ignore this; the network only calls it while the
    /// layer reports an input size of zero.
    fn set_input_size(&mut self, _size: usize) {}

    /// Total count of trainable values (weights plus biases).
    fn parameter_count(&self) -> usize {
        0
    }

    /// Scratch buffers this layer needs for the given run mode.
    ///
    /// Called when context buffers are (re)built for a batch geometry; the
    /// order of the returned specs defines the buffer ids the layer uses when
    /// it addresses its arena inside `forward`/`backward`.
    fn scratch_spec(&self, _training: bool) -> Vec<ScratchSpec> {
        Vec::new()
    }

    /// Forward propagation.
    ///
    /// # Arguments
    ///
    /// * `input` - Flat input batch (`ctx.samples × input_size`)
    /// * `output` - Flat output buffer (`ctx.samples × output_size`)
    /// * `ctx` - Batch geometry, run mode, vector primitives and scratch
    ///
    /// Training-only behavior (batch statistics, dropout masks, saving
    /// intermediates for backward) keys off `ctx.training`.
    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>);

    /// Backward propagation.
    ///
    /// Writes the error gradient for the preceding layer into `prev_delta`
    /// and, for trainable layers, *accumulates* parameter gradients into
    /// `gradients` (flat, `parameter_count` long, weights then biases).
    /// Accumulation must sum across calls; the training driver zeroes the
    /// buffer after each optimizer step.
    ///
    /// # Arguments
    ///
    /// * `input` - The batch given to the matching `forward` call
    /// * `output` - The batch produced by the matching `forward` call
    /// * `delta` - Gradient of the loss w.r.t. this layer's output
    /// * `prev_delta` - Out: gradient w.r.t. this layer's input
    /// * `gradients` - In/out: the layer's gradient accumulator
    /// * `ctx` - Same context the forward pass ran under
    fn backward(
        &self,
        input: &[f32],
        output: &[f32],
        delta: &[f32],
        prev_delta: &mut [f32],
        gradients: &mut [f32],
        ctx: &mut LayerContext<'_>,
    );

    /// Re-initialize weights with a symmetric uniform distribution scaled by
    /// `sqrt(3 / fan_in)`; biases get layer-specific constants (zero for most,
    /// −1 for the GRU reset gate, +1 for the LSTM forget gate).
    fn randomize(&mut self, _rng: &mut SimpleRng) {}

    /// Add optimizer-produced deltas to the trainable parameters, in the same
    /// flat order as `gradients` in [`Layer::backward`].
    fn add_to_parameters(&mut self, _updates: &[f32]) {}

    /// Number of values in this layer's saved parameter block. Zero means the
    /// layer writes no block at all. Trainable layers default to
    /// `parameter_count`; batch normalization overrides this to persist its
    /// running statistics.
    fn saved_param_count(&self) -> usize {
        self.parameter_count()
    }

    /// Write exactly `saved_param_count` values to `writer`.
    fn save_params(&self, _writer: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Read exactly `saved_param_count` values from `reader`.
    fn load_params(&mut self, _reader: &mut dyn Read) -> Result<()> {
        Ok(())
    }
}
