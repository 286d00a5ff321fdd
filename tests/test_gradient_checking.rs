//! Finite-difference checks of layer backward passes.
//!
//! Loss is `L = dot(output, probe)` for a fixed probe vector, so the output
//! delta is the probe itself. Analytic input and weight gradients must agree
//! with central differences to within float32 noise.

use annt::context::{LayerContext, ScratchArena};
use annt::layers::{ActivationLayer, DenseLayer, Layer};
use annt::math::VectorOps;
use annt::utils::SimpleRng;
use approx::assert_relative_eq;

const EPS: f32 = 1e-2;

fn forward_once(layer: &dyn Layer, input: &[f32]) -> Vec<f32> {
    let mut arena = ScratchArena::build(layer.scratch_spec(true), 1, 1);
    let mut ctx = LayerContext {
        samples: 1,
        training: true,
        sequence_length: 1,
        math: VectorOps::portable(),
        scratch: &mut arena,
    };
    let mut output = vec![0.0; layer.output_size()];
    layer.forward(input, &mut output, &mut ctx);
    output
}

fn loss(layer: &dyn Layer, input: &[f32], probe: &[f32]) -> f32 {
    forward_once(layer, input)
        .iter()
        .zip(probe)
        .map(|(y, p)| y * p)
        .sum()
}

// Analytic (prev_delta, gradients) from one forward/backward pair over the
// same arena.
fn analytic_gradients(layer: &dyn Layer, input: &[f32], probe: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mut arena = ScratchArena::build(layer.scratch_spec(true), 1, 1);
    let mut ctx = LayerContext {
        samples: 1,
        training: true,
        sequence_length: 1,
        math: VectorOps::portable(),
        scratch: &mut arena,
    };
    let mut output = vec![0.0; layer.output_size()];
    layer.forward(input, &mut output, &mut ctx);
    let mut prev_delta = vec![0.0; layer.input_size()];
    let mut gradients = vec![0.0; layer.parameter_count()];
    layer.backward(
        input,
        &output,
        probe,
        &mut prev_delta,
        &mut gradients,
        &mut ctx,
    );
    (prev_delta, gradients)
}

fn check_input_gradient(layer: &dyn Layer, input: &[f32], probe: &[f32]) {
    let (prev_delta, _) = analytic_gradients(layer, input, probe);
    let mut perturbed = input.to_vec();
    for i in 0..input.len() {
        perturbed[i] = input[i] + EPS;
        let up = loss(layer, &perturbed, probe);
        perturbed[i] = input[i] - EPS;
        let down = loss(layer, &perturbed, probe);
        perturbed[i] = input[i];
        let numeric = (up - down) / (2.0 * EPS);
        assert_relative_eq!(prev_delta[i], numeric, epsilon = 1e-3, max_relative = 1e-2);
    }
}

fn check_weight_gradient(layer: &mut dyn Layer, input: &[f32], probe: &[f32]) {
    let (_, gradients) = analytic_gradients(layer, input, probe);
    let count = layer.parameter_count();
    let mut basis = vec![0.0; count];
    for i in 0..count {
        basis[i] = EPS;
        layer.add_to_parameters(&basis);
        let up = loss(layer, input, probe);
        basis[i] = -2.0 * EPS;
        layer.add_to_parameters(&basis);
        let down = loss(layer, input, probe);
        basis[i] = EPS;
        layer.add_to_parameters(&basis);
        basis[i] = 0.0;
        let numeric = (up - down) / (2.0 * EPS);
        assert_relative_eq!(gradients[i], numeric, epsilon = 1e-3, max_relative = 1e-2);
    }
}

#[test]
fn dense_input_and_weight_gradients_match_finite_differences() {
    let mut rng = SimpleRng::new(42);
    let mut layer = DenseLayer::new(3, 2, &mut rng);
    let input = [0.4, -0.9, 0.2];
    let probe = [1.0, -0.5];
    check_input_gradient(&layer, &input, &probe);
    check_weight_gradient(&mut layer, &input, &probe);
}

#[test]
fn elementwise_activation_gradients_match_finite_differences() {
    // Inputs chosen away from the ReLU-family kinks at zero.
    let input = [0.7, -0.6, 1.3, -1.1];
    let probe = [1.0, -0.5, 0.25, 2.0];
    let layers = [
        ActivationLayer::sigmoid(),
        ActivationLayer::tanh(),
        ActivationLayer::relu(),
        ActivationLayer::leaky_relu(0.1),
        ActivationLayer::elu(1.0),
    ];
    for mut layer in layers {
        layer.set_input_size(input.len());
        check_input_gradient(&layer, &input, &probe);
    }
}

#[test]
fn softmax_jacobian_matches_finite_differences() {
    // The probe mixes signs so the off-diagonal Jacobian terms matter.
    let input = [0.2, -0.4, 0.9];
    let probe = [1.0, -1.0, 0.5];
    let mut layer = ActivationLayer::softmax();
    layer.set_input_size(input.len());
    check_input_gradient(&layer, &input, &probe);
}

#[test]
fn recurrent_weight_gradients_match_finite_differences() {
    use annt::layers::RecurrentLayer;

    let mut rng = SimpleRng::new(7);
    let mut layer = RecurrentLayer::new(2, 2, &mut rng);
    let input = [0.5, -0.3];
    let probe = [1.0, -0.5];
    check_weight_gradient(&mut layer, &input, &probe);
}
