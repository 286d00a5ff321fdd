//! Fully connected layer.
//!
//! Performs the transformation `output[o] = dot(input, weights[o]) + bias[o]`
//! for every sample. The batched forward/backward products run through BLAS.

use std::io::{Read, Write};

use crate::context::LayerContext;
use crate::error::Result;
use crate::layers::r#trait::{Layer, LayerKind};
use crate::layers::{init_limit, read_f32s, write_f32s};
use crate::math::gemm::{accumulate_rows, add_bias, gemm};
use crate::utils::SimpleRng;

/// Fully connected layer.
///
/// Weights are stored row-major with one row per output
/// (`output_size × input_size`), followed logically by `output_size` biases;
/// gradient accumulators and saved parameter blocks use the same order.
///
/// # Example
///
/// ```
/// use annt::layers::{DenseLayer, Layer};
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(784, 512, &mut rng);
/// assert_eq!(layer.input_size(), 784);
/// assert_eq!(layer.output_size(), 512);
/// assert_eq!(layer.parameter_count(), 784 * 512 + 512);
/// ```
#[derive(Debug)]
pub struct DenseLayer {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    /// Create a layer with `sqrt(3 / fan_in)` uniform weight initialization
    /// and zero biases.
    pub fn new(input_size: usize, output_size: usize, rng: &mut SimpleRng) -> Self {
        assert!(
            input_size > 0 && output_size > 0,
            "dense layer sizes must be positive"
        );
        let mut layer = Self {
            input_size,
            output_size,
            weights: vec![0.0; input_size * output_size],
            biases: vec![0.0; output_size],
        };
        layer.randomize(rng);
        layer
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }
}

impl Layer for DenseLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dense
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn forward(&self, input: &[f32], output: &mut [f32], ctx: &mut LayerContext<'_>) {
        let n = ctx.samples;
        assert_eq!(input.len(), n * self.input_size, "dense forward: bad input length");
        assert_eq!(output.len(), n * self.output_size, "dense forward: bad output length");

        // output = input · Wᵀ, then broadcast biases.
        gemm(
            n,
            self.output_size,
            self.input_size,
            input,
            self.input_size,
            false,
            &self.weights,
            self.input_size,
            true,
            output,
            self.output_size,
            1.0,
            0.0,
        );
        add_bias(output, n, self.output_size, &self.biases);
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
        assert_eq!(delta.len(), n * self.output_size, "dense backward: bad delta length");
        assert_eq!(
            prev_delta.len(),
            n * self.input_size,
            "dense backward: bad prev_delta length"
        );
        assert_eq!(
            gradients.len(),
            self.parameter_count(),
            "dense backward: bad gradient length"
        );

        // prev_delta = delta · W
        gemm(
            n,
            self.input_size,
            self.output_size,
            delta,
            self.output_size,
            false,
            &self.weights,
            self.input_size,
            false,
            prev_delta,
            self.input_size,
            1.0,
            0.0,
        );

        // grad_w += deltaᵀ · input (beta = 1 keeps prior contributions),
        // grad_b += column sums of delta.
        let (grad_w, grad_b) = gradients.split_at_mut(self.weights.len());
        gemm(
            self.output_size,
            self.input_size,
            n,
            delta,
            self.output_size,
            true,
            input,
            self.input_size,
            false,
            grad_w,
            self.input_size,
            1.0,
            1.0,
        );
        accumulate_rows(delta, n, self.output_size, grad_b);
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        rng.fill_symmetric(&mut self.weights, init_limit(self.input_size));
        self.biases.fill(0.0);
    }

    fn add_to_parameters(&mut self, updates: &[f32]) {
        assert_eq!(updates.len(), self.parameter_count());
        let (w, b) = updates.split_at(self.weights.len());
        for (weight, update) in self.weights.iter_mut().zip(w) {
            *weight += *update;
        }
        for (bias, update) in self.biases.iter_mut().zip(b) {
            *bias += *update;
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
