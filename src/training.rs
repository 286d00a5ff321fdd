//! Training driver: batched forward/backward passes and weight updates.
//!
//! Extends the inference driver with per-layer output/delta storage, gradient
//! accumulators and optimizer state. Storage is (re)allocated only when the
//! batch size changes, so epochs of equally sized batches pay the allocation
//! cost once. One training call runs: forward pass, cost evaluation (mean
//! loss plus per-sample output deltas), backward pass in reverse layer order
//! (producing a discarded delta for the network input as the final step), and
//! the optimizer update that turns each layer's accumulated gradients into
//! applied parameter deltas.

use log::debug;

use crate::context::{ExecutionContext, LayerContext};
use crate::costs::CostFunction;
use crate::inference::InferenceDriver;
use crate::math::VectorOps;
use crate::network::Network;
use crate::optimizers::Optimizer;
use crate::utils::{argmax, one_hot, SimpleRng};

/// How `train_epoch` picks samples for each batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleSelection {
    /// Walk the dataset in storage order.
    Sequential,
    /// Draw every batch member independently at random (with replacement).
    RandomPick,
    /// Shuffle the whole dataset once per epoch, then walk in order.
    Shuffle,
}

/// Owns everything training needs beyond the network itself.
///
/// # Example
///
/// ```
/// use annt::costs::CostFunction;
/// use annt::layers::{ActivationKind, ActivationLayer, DenseLayer};
/// use annt::network::Network;
/// use annt::optimizers::Sgd;
/// use annt::training::TrainingDriver;
/// use annt::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut net = Network::new();
/// net.add(Box::new(DenseLayer::new(2, 1, &mut rng))).unwrap();
/// net.add(Box::new(ActivationLayer::new(ActivationKind::Sigmoid))).unwrap();
///
/// let mut driver = TrainingDriver::new(&net, Box::new(Sgd::new(0.1)), CostFunction::Mse);
/// let cost = driver.train_sample(&mut net, &[1.0, 0.0], &[1.0]);
/// assert!(cost >= 0.0);
/// ```
pub struct TrainingDriver {
    optimizer: Box<dyn Optimizer>,
    cost: CostFunction,
    ctx: ExecutionContext,
    infer: InferenceDriver,
    math: VectorOps,
    rng: SimpleRng,

    // Per-layer training storage, all flat and sample-major.
    outputs: Vec<Vec<f32>>,
    deltas: Vec<Vec<f32>>,
    input_delta: Vec<f32>,
    gradients: Vec<Vec<f32>>,
    param_state: Vec<Vec<f32>>,
    layer_state: Vec<Vec<f32>>,

    flat_input: Vec<f32>,
    samples_allocated: usize,
    average_gradients: bool,
}

impl TrainingDriver {
    /// Build a driver for `network`'s current structure. Gradient accumulators
    /// and optimizer state are sized per layer here and persist across the
    /// whole training run.
    pub fn new(network: &Network, optimizer: Box<dyn Optimizer>, cost: CostFunction) -> Self {
        let gradients: Vec<Vec<f32>> = network
            .layers()
            .iter()
            .map(|l| vec![0.0; l.parameter_count()])
            .collect();
        let param_state: Vec<Vec<f32>> = network
            .layers()
            .iter()
            .map(|l| vec![0.0; l.parameter_count() * optimizer.param_state_vars()])
            .collect();
        let layer_state: Vec<Vec<f32>> = network
            .layers()
            .iter()
            .map(|l| {
                if l.parameter_count() > 0 {
                    vec![0.0; optimizer.layer_state_len()]
                } else {
                    Vec::new()
                }
            })
            .collect();

        Self {
            optimizer,
            cost,
            ctx: ExecutionContext::new(true),
            infer: InferenceDriver::new(),
            math: VectorOps::auto(),
            rng: SimpleRng::from_time(),
            outputs: Vec::new(),
            deltas: Vec::new(),
            input_delta: Vec::new(),
            gradients,
            param_state,
            layer_state,
            flat_input: Vec::new(),
            samples_allocated: 0,
            average_gradients: true,
        }
    }

    /// Seed the generator behind random-pick and shuffle sample selection.
    pub fn set_rng(&mut self, rng: SimpleRng) {
        self.rng = rng;
    }

    /// Group training samples into sequences of `length` consecutive steps
    /// for recurrent layers. Batch sample counts must be multiples of it.
    pub fn set_sequence_length(&mut self, length: usize) {
        self.ctx.set_sequence_length(length);
        self.samples_allocated = 0;
    }

    /// Divide accumulated gradients by the batch size before the optimizer
    /// step (the default). Off means raw summed gradients.
    pub fn set_average_gradients(&mut self, enabled: bool) {
        self.average_gradients = enabled;
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// Adjust the optimizer's step size, e.g. from a learning-rate schedule.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.optimizer.set_learning_rate(learning_rate);
    }

    /// Forget all recurrent state in both the training and evaluation
    /// contexts, so the next call starts fresh sequences.
    pub fn reset_state(&mut self) {
        self.ctx.reset_state();
        self.infer.reset_state();
    }

    /// Train on a single sample. Returns its cost before the update.
    pub fn train_sample(&mut self, network: &mut Network, input: &[f32], target: &[f32]) -> f32 {
        assert_eq!(
            input.len(),
            network.input_size(),
            "train_sample: bad input length"
        );
        self.flat_input.clear();
        self.flat_input.extend_from_slice(input);
        self.train_prepared(network, 1, &[target])
    }

    /// Train on one batch. Returns the mean cost over the batch before the
    /// update.
    pub fn train_batch(
        &mut self,
        network: &mut Network,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
    ) -> f32 {
        assert_eq!(
            inputs.len(),
            targets.len(),
            "train_batch: inputs/targets length mismatch"
        );
        assert!(!inputs.is_empty(), "train_batch: empty batch");

        self.flat_input.clear();
        for sample in inputs {
            assert_eq!(
                sample.len(),
                network.input_size(),
                "train_batch: bad input length"
            );
            self.flat_input.extend_from_slice(sample);
        }
        let target_refs: Vec<&[f32]> = targets.iter().map(|t| t.as_slice()).collect();
        self.train_prepared(network, inputs.len(), &target_refs)
    }

    /// Train one epoch in batches of `batch_size`, picking samples per
    /// `selection`. A trailing partial batch is skipped so every update sees
    /// a full batch. Returns the mean cost over all trained batches.
    pub fn train_epoch(
        &mut self,
        network: &mut Network,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        batch_size: usize,
        selection: SampleSelection,
    ) -> f32 {
        assert_eq!(
            inputs.len(),
            targets.len(),
            "train_epoch: inputs/targets length mismatch"
        );
        assert!(batch_size > 0, "train_epoch: batch size must be positive");
        let batches = inputs.len() / batch_size;
        assert!(batches > 0, "train_epoch: fewer samples than one batch");

        let mut order: Vec<usize> = (0..inputs.len()).collect();
        if selection == SampleSelection::Shuffle {
            self.rng.shuffle(&mut order);
        }

        let mut total = 0.0;
        let mut picks = vec![0usize; batch_size];
        for batch in 0..batches {
            let indices: &[usize] = match selection {
                SampleSelection::Sequential | SampleSelection::Shuffle => {
                    &order[batch * batch_size..(batch + 1) * batch_size]
                }
                SampleSelection::RandomPick => {
                    for slot in picks.iter_mut() {
                        *slot = self.rng.index(inputs.len());
                    }
                    &picks
                }
            };

            self.flat_input.clear();
            for &index in indices {
                assert_eq!(
                    inputs[index].len(),
                    network.input_size(),
                    "train_epoch: bad input length"
                );
                self.flat_input.extend_from_slice(&inputs[index]);
            }
            let target_refs: Vec<&[f32]> =
                indices.iter().map(|&i| targets[i].as_slice()).collect();
            total += self.train_prepared(network, batch_size, &target_refs);
        }
        total / batches as f32
    }

    /// Cost of one sample under the current weights, evaluated in inference
    /// mode (no dropout, running batch-norm statistics).
    pub fn test_sample(&mut self, network: &Network, input: &[f32], target: &[f32]) -> f32 {
        let output = self.infer.run(network, input);
        self.cost.cost(output, target)
    }

    /// Evaluate a classification set: returns the mean cost against one-hot
    /// targets and the number of samples whose argmax matches the label.
    pub fn test_classification(
        &mut self,
        network: &Network,
        inputs: &[Vec<f32>],
        labels: &[usize],
    ) -> (f32, usize) {
        assert_eq!(
            inputs.len(),
            labels.len(),
            "test_classification: inputs/labels length mismatch"
        );
        assert!(!inputs.is_empty(), "test_classification: empty set");

        let classes = network.output_size();
        let mut total = 0.0;
        let mut correct = 0;
        for (input, &label) in inputs.iter().zip(labels) {
            let output = self.infer.run(network, input);
            let target = one_hot(label, classes);
            total += self.cost.cost(output, &target);
            if argmax(output) == label {
                correct += 1;
            }
        }
        (total / inputs.len() as f32, correct)
    }

    // Forward, cost, backward, update over `self.flat_input`.
    fn train_prepared(
        &mut self,
        network: &mut Network,
        samples: usize,
        targets: &[&[f32]],
    ) -> f32 {
        assert_eq!(
            network.len(),
            self.gradients.len(),
            "network structure changed since the driver was built"
        );
        assert_eq!(targets.len(), samples, "bad target count");

        self.prepare_storage(network, samples);
        self.forward_pass(network, samples);

        // Mean cost plus the output delta that seeds the backward pass.
        let output_size = network.output_size();
        let last = network.len() - 1;
        let mut total = 0.0;
        for (s, target) in targets.iter().enumerate() {
            assert_eq!(target.len(), output_size, "bad target length");
            let out_s = &self.outputs[last][s * output_size..(s + 1) * output_size];
            total += self.cost.cost(out_s, target);
            self.cost.gradient(
                out_s,
                target,
                &mut self.deltas[last][s * output_size..(s + 1) * output_size],
            );
        }

        self.backward_pass(network, samples);
        self.update_weights(network, samples);
        total / samples as f32
    }

    fn prepare_storage(&mut self, network: &Network, samples: usize) {
        self.ctx.prepare(network.layers(), samples);
        if self.samples_allocated == samples && self.outputs.len() == network.len() {
            return;
        }
        debug!(
            "allocating training buffers for {} samples across {} layers",
            samples,
            network.len()
        );
        self.outputs = network
            .layers()
            .iter()
            .map(|l| vec![0.0; samples * l.output_size()])
            .collect();
        self.deltas = network
            .layers()
            .iter()
            .map(|l| vec![0.0; samples * l.output_size()])
            .collect();
        self.input_delta = vec![0.0; samples * network.input_size()];
        self.samples_allocated = samples;
    }

    fn forward_pass(&mut self, network: &Network, samples: usize) {
        for (index, layer) in network.layers().iter().enumerate() {
            let (before, rest) = self.outputs.split_at_mut(index);
            let layer_input = if index == 0 {
                self.flat_input.as_slice()
            } else {
                before[index - 1].as_slice()
            };
            let mut layer_ctx = LayerContext {
                samples,
                training: true,
                sequence_length: self.ctx.sequence_length(),
                math: self.math,
                scratch: self.ctx.arena_mut(index),
            };
            layer.forward(layer_input, &mut rest[0], &mut layer_ctx);
        }
    }

    fn backward_pass(&mut self, network: &Network, samples: usize) {
        for index in (0..network.len()).rev() {
            let layer = network.layer(index);
            let layer_input = if index == 0 {
                self.flat_input.as_slice()
            } else {
                self.outputs[index - 1].as_slice()
            };
            let (before, rest) = self.deltas.split_at_mut(index);
            let prev_delta = if index == 0 {
                self.input_delta.as_mut_slice()
            } else {
                before[index - 1].as_mut_slice()
            };
            let mut layer_ctx = LayerContext {
                samples,
                training: true,
                sequence_length: self.ctx.sequence_length(),
                math: self.math,
                scratch: self.ctx.arena_mut(index),
            };
            layer.backward(
                layer_input,
                &self.outputs[index],
                &rest[0],
                prev_delta,
                &mut self.gradients[index],
                &mut layer_ctx,
            );
        }
    }

    fn update_weights(&mut self, network: &mut Network, samples: usize) {
        let scale = 1.0 / samples as f32;
        for index in 0..network.len() {
            let gradients = &mut self.gradients[index];
            if gradients.is_empty() {
                continue;
            }
            if self.average_gradients && samples > 1 {
                for g in gradients.iter_mut() {
                    *g *= scale;
                }
            }
            self.optimizer.compute_updates(
                gradients,
                &mut self.param_state[index],
                &mut self.layer_state[index],
            );
            network.layer_mut(index).add_to_parameters(gradients);
            gradients.fill(0.0);
        }
    }
}
